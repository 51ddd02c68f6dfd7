use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use operations_core::errors::OperationsResult;
use operations_domain::TaskLedger;
use tracing::{error, info, warn};

/// 启动恢复时写入任务的失败原因
pub const INTERRUPTED_REASON: &str = "服务重启，执行被中断";

/// 启动恢复报告
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub recovered_task_ids: Vec<i64>,
    pub errors: Vec<String>,
    pub recovery_duration_ms: u64,
}

/// 启动恢复服务
///
/// 执行后端只存在于进程内，上次进程退出时仍处于待执行或执行中的任务
/// 不会再有回报，启动时统一置为失败，避免任务永远停在未结束状态。
pub struct TaskRecoveryService {
    ledger: Arc<TaskLedger>,
}

impl TaskRecoveryService {
    pub fn new(ledger: Arc<TaskLedger>) -> Self {
        Self { ledger }
    }

    pub async fn recover_interrupted_tasks(&self) -> OperationsResult<RecoveryReport> {
        let started = Instant::now();
        info!("开始恢复中断的任务");

        let active = self.ledger.active_tasks().await?;
        let mut report = RecoveryReport::default();

        for task in active {
            match self.ledger.fail_task(task.id, INTERRUPTED_REASON).await {
                Ok(_) => report.recovered_task_ids.push(task.id),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!("恢复任务 {} 失败: {}", task.id, e);
                    report.errors.push(format!("任务 {}: {}", task.id, e));
                }
            }
        }

        counter!("operations_tasks_recovered_total")
            .increment(report.recovered_task_ids.len() as u64);
        report.recovery_duration_ms = started.elapsed().as_millis() as u64;

        if report.errors.is_empty() {
            info!(
                "任务恢复完成: 处理 {} 个，用时 {}ms",
                report.recovered_task_ids.len(),
                report.recovery_duration_ms
            );
        } else {
            warn!(
                "任务恢复完成但有 {} 个错误: 处理 {} 个",
                report.errors.len(),
                report.recovered_task_ids.len()
            );
        }
        Ok(report)
    }
}
