use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use operations_core::config::LogStoreConfig;
use operations_core::errors::OperationsResult;
use operations_core::traits::TaskLogStore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// 单次清理的统计
#[derive(Debug, Clone, Default)]
pub struct CleanupStats {
    pub removed: usize,
    pub duration: Duration,
}

/// 任务日志保留期清理
///
/// 按 `cleanup_interval_seconds` 周期删除超过 `keep_days` 天的日志文件，
/// `keep_days` 为 0 时不启动。
pub struct LogCleanupService {
    log_store: Arc<dyn TaskLogStore>,
    config: LogStoreConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl LogCleanupService {
    pub fn new(log_store: Arc<dyn TaskLogStore>, config: LogStoreConfig) -> Self {
        Self {
            log_store,
            config,
            shutdown_tx: None,
            cleanup_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cleanup_handle.is_some()
    }

    pub fn start(&mut self) {
        if self.config.keep_days == 0 {
            info!("任务日志保留期为0，不启动日志清理");
            return;
        }
        if self.is_running() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let log_store = self.log_store.clone();
        let keep_days = self.config.keep_days;
        let period = Duration::from_secs(self.config.cleanup_interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = Self::perform_cleanup(log_store.as_ref(), keep_days).await {
                            error!("清理任务日志失败: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("日志清理收到停止信号");
                        break;
                    }
                }
            }
        });

        self.cleanup_handle = Some(handle);
        info!(
            "日志清理已启动: 保留 {} 天，每 {:?} 执行一次",
            keep_days, period
        );
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(e) = handle.await {
                warn!("等待日志清理停止失败: {}", e);
            }
            info!("日志清理已停止");
        }
    }

    /// 立即执行一次清理
    pub async fn cleanup_once(&self) -> OperationsResult<CleanupStats> {
        if self.config.keep_days == 0 {
            return Ok(CleanupStats::default());
        }
        Self::perform_cleanup(self.log_store.as_ref(), self.config.keep_days).await
    }

    async fn perform_cleanup(
        log_store: &dyn TaskLogStore,
        keep_days: u32,
    ) -> OperationsResult<CleanupStats> {
        let started = Instant::now();
        let removed = log_store.cleanup_older_than(keep_days).await?;
        counter!("operations_task_logs_removed_total").increment(removed as u64);

        let stats = CleanupStats {
            removed,
            duration: started.elapsed(),
        };
        debug!("日志清理完成: 删除 {} 个，用时 {:?}", stats.removed, stats.duration);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileTaskLogStore;

    fn config(keep_days: u32) -> LogStoreConfig {
        LogStoreConfig {
            keep_days,
            cleanup_interval_seconds: 3600,
            ..LogStoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_when_keep_days_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileTaskLogStore::new(dir.path()));
        let mut service = LogCleanupService::new(store, config(0));

        service.start();
        assert!(!service.is_running());
        assert_eq!(service.cleanup_once().await.unwrap().removed, 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileTaskLogStore::new(dir.path()));
        let mut service = LogCleanupService::new(store, config(7));

        service.start();
        assert!(service.is_running());
        service.stop().await;
        assert!(!service.is_running());
    }
}
