use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use operations_core::config::DispatcherConfig;
use operations_core::errors::OperationsResult;
use operations_core::models::Task;
use operations_domain::TaskLedger;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// 未结束任务的超时监督
///
/// 执行后端异常退出或 Agent 失联时任务不会再收到回报，
/// 超过 `task_timeout_seconds` 仍未结束的任务被置为失败。
pub struct TaskSupervisor {
    ledger: Arc<TaskLedger>,
    config: DispatcherConfig,
    running: Arc<RwLock<bool>>,
}

impl TaskSupervisor {
    pub fn new(ledger: Arc<TaskLedger>, config: DispatcherConfig) -> Self {
        Self {
            ledger,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.task_timeout_seconds > 0
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 在后台启动监督循环，未启用超时监督时直接返回
    pub async fn start(self: Arc<Self>) {
        if !self.is_enabled() {
            info!("任务超时为0，不启动任务超时监督");
            return;
        }
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
        }

        info!(
            "启动任务超时监督: 超时 {} 秒，每 {} 秒检查一次",
            self.config.task_timeout_seconds, self.config.supervise_interval_seconds
        );
        tokio::spawn(async move { self.supervise_loop().await });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        if *running {
            *running = false;
            info!("停止任务超时监督");
        }
    }

    async fn supervise_loop(&self) {
        let period = Duration::from_secs(self.config.supervise_interval_seconds.max(1));
        loop {
            tokio::time::sleep(period).await;
            if !*self.running.read().await {
                debug!("收到停止信号，退出任务超时监督循环");
                break;
            }

            match self.supervise_once().await {
                Ok(expired) if !expired.is_empty() => {
                    info!("{} 个任务执行超时，已置为失败: {:?}", expired.len(), expired);
                }
                Ok(_) => {}
                Err(e) => error!("检查超时任务时出错: {}", e),
            }
        }
    }

    /// 检查一次，返回本次置为失败的任务ID
    pub async fn supervise_once(&self) -> OperationsResult<Vec<i64>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        let mut expired = Vec::new();
        for task in self.ledger.active_tasks().await? {
            if !self.is_expired(&task) {
                continue;
            }
            let reason = format!("执行超时，超过{}秒未结束", self.config.task_timeout_seconds);
            match self.ledger.fail_task(task.id, &reason).await {
                Ok(outcome) if outcome.is_applied() => {
                    counter!("operations_tasks_timed_out_total").increment(1);
                    expired.push(task.id);
                }
                Ok(_) => {}
                // 检查期间任务刚好结束或被删除
                Err(e) => debug!("跳过超时任务 {}: {}", task.id, e),
            }
        }
        Ok(expired)
    }

    fn is_expired(&self, task: &Task) -> bool {
        let since = task.started_at.unwrap_or(task.created_at);
        let elapsed = Utc::now() - since;
        elapsed.num_seconds() >= self.config.task_timeout_seconds as i64
    }
}
