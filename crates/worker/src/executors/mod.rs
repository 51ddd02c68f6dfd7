mod agent;
mod shell;
mod simulated;

pub use agent::AgentExecutor;
pub use shell::ShellExecutor;
pub use simulated::SimulatedExecutor;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use operations_core::models::TaskTransition;
use operations_core::traits::TaskReporter;
use tracing::{debug, warn};

/// 后台执行计数，离开作用域时自动减一
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 上报一次状态，返回是否应继续执行
///
/// 任务已被外部置为终态或删除时上报会失败，执行方应当停止。
async fn report(reporter: &dyn TaskReporter, task_id: i64, transition: TaskTransition) -> bool {
    match reporter.report(task_id, transition).await {
        Ok(outcome) => {
            if !outcome.is_applied() {
                debug!("任务 {} 的进度上报被忽略", task_id);
            }
            true
        }
        Err(e) => {
            warn!("任务 {} 状态上报失败，停止执行: {}", task_id, e);
            false
        }
    }
}
