use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use operations_api::{create_app, AppState};
use operations_core::config::AppConfig;
use operations_core::traits::{NodeRepository, ServiceRepository, TaskLogStore, TaskRepository};
use operations_dispatcher::{OperatorDispatcher, TaskRecoveryService, TaskSupervisor};
use operations_domain::{EntityStore, TaskLedger};
use operations_infrastructure::{
    DatabaseManager, FileTaskLogStore, LogCleanupService, SqliteNodeRepository,
    SqliteServiceRepository, SqliteTaskRepository,
};
use operations_worker::create_backend;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

/// 主应用程序
///
/// 持有数据库、领域服务和后台任务，`run` 负责对外提供接口直到收到关闭信号。
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    state: AppState,
    supervisor: Arc<TaskSupervisor>,
    log_cleanup: Mutex<LogCleanupService>,
}

impl Application {
    /// 创建应用实例
    ///
    /// `metrics` 为空时不暴露指标接口，指标记录器由调用方安装。
    pub async fn new(config: AppConfig, metrics: Option<PrometheusHandle>) -> Result<Self> {
        info!("初始化应用程序");

        let database = DatabaseManager::new(&config.database).await?;
        database.migrate().await?;

        let pool = database.pool().clone();
        let service_repo: Arc<dyn ServiceRepository> =
            Arc::new(SqliteServiceRepository::new(pool.clone()));
        let node_repo: Arc<dyn NodeRepository> = Arc::new(SqliteNodeRepository::new(pool.clone()));
        let task_repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool));
        let log_store: Arc<dyn TaskLogStore> =
            Arc::new(FileTaskLogStore::new(&config.log_store.directory));

        let ledger = Arc::new(TaskLedger::new(
            task_repo.clone(),
            service_repo.clone(),
            node_repo.clone(),
            log_store.clone(),
        ));
        let entity_store = Arc::new(EntityStore::new(
            service_repo.clone(),
            node_repo.clone(),
            task_repo,
        ));

        let backend = create_backend(&config.executor).context("创建执行后端失败")?;
        let dispatcher = Arc::new(OperatorDispatcher::new(
            service_repo,
            node_repo,
            ledger.clone(),
            backend,
            config.dispatcher.clone(),
        ));

        let supervisor = Arc::new(TaskSupervisor::new(
            ledger.clone(),
            config.dispatcher.clone(),
        ));
        let log_cleanup = LogCleanupService::new(log_store, config.log_store.clone());

        let state = AppState {
            entity_store,
            ledger,
            dispatcher,
            metrics,
        };

        Ok(Self {
            config,
            database,
            state,
            supervisor,
            log_cleanup: Mutex::new(log_cleanup),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// 绑定配置中的监听地址
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = &self.config.api.bind_address;
        TcpListener::bind(address)
            .await
            .with_context(|| format!("绑定地址失败: {address}"))
    }

    /// 运行应用程序直到收到关闭信号
    ///
    /// 启动前先把上次未结束的任务置为失败，再启动超时监督和日志清理。
    pub async fn run(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        if self.config.dispatcher.recover_on_startup {
            let recovery = TaskRecoveryService::new(self.state.ledger.clone());
            match recovery.recover_interrupted_tasks().await {
                Ok(report) if !report.errors.is_empty() => {
                    warn!("部分中断任务恢复失败: {:?}", report.errors);
                }
                Ok(_) => {}
                Err(e) => error!("恢复中断任务失败: {}", e),
            }
        }

        self.supervisor.clone().start().await;
        self.log_cleanup.lock().await.start();

        let app = create_app(
            self.state.clone(),
            &self.config.api,
            &self.config.observability.metrics_endpoint,
        );
        let local_addr: SocketAddr = listener.local_addr().context("获取监听地址失败")?;
        info!(
            "API服务器启动在 http://{}，执行后端: {}",
            local_addr,
            self.state.dispatcher.backend_name()
        );

        let served = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await;

        self.supervisor.stop().await;
        self.log_cleanup.lock().await.stop().await;
        self.database.close().await;

        served.context("API服务器运行失败")?;
        info!("应用程序已停止");
        Ok(())
    }
}
