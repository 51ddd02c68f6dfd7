use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use operations_core::config::SimulatedExecutorConfig;
use operations_core::errors::OperationsResult;
use operations_core::models::{OperatorType, TaskTransition};
use operations_core::traits::{ExecutionBackend, ExecutionRequest, TaskReporter};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info};

use super::{report, ActiveGuard};

const DEPLOY_STEPS: [&str; 7] = [
    "检查节点状态",
    "备份当前版本",
    "下载新版本文件",
    "停止旧服务",
    "部署新版本",
    "启动新服务",
    "验证服务状态",
];

const RESTART_STEPS: [&str; 5] = [
    "检查节点状态",
    "停止服务",
    "清理临时文件",
    "启动服务",
    "验证服务状态",
];

/// 模拟执行器
///
/// 逐步上报进度，最后按配置的失败率随机成功或失败。
pub struct SimulatedExecutor {
    config: SimulatedExecutorConfig,
    active: Arc<AtomicUsize>,
}

impl SimulatedExecutor {
    pub fn new(config: SimulatedExecutorConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn steps(operator_type: OperatorType) -> &'static [&'static str] {
        match operator_type {
            OperatorType::Deploy => &DEPLOY_STEPS,
            OperatorType::Restart => &RESTART_STEPS,
        }
    }

    /// 第 `index` 步（从1开始）完成后的进度，最高 95
    pub fn step_progress(index: usize, total: usize) -> u8 {
        let progress = index * 100 / (total + 1);
        progress.min(95) as u8
    }

    fn step_delay(config: &SimulatedExecutorConfig) -> Duration {
        let (min, max) = (config.step_delay_min_ms, config.step_delay_max_ms);
        let millis = if min >= max {
            min
        } else {
            rand::rng().random_range(min..=max)
        };
        Duration::from_millis(millis)
    }

    fn roll_success(config: &SimulatedExecutorConfig, operator_type: OperatorType) -> bool {
        let failure_rate = match operator_type {
            OperatorType::Deploy => config.deploy_failure_rate,
            OperatorType::Restart => config.restart_failure_rate,
        };
        rand::rng().random::<f64>() >= failure_rate
    }

    async fn run(
        config: SimulatedExecutorConfig,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) {
        let task_id = request.task_id;
        let operator_type = request.operator_type;
        let reporter = reporter.as_ref();

        let started = TaskTransition::running(0)
            .with_log(format!("开始执行{}任务", operator_type.display_name()));
        if !report(reporter, task_id, started).await {
            return;
        }

        let steps = Self::steps(operator_type);
        for (index, step) in steps.iter().enumerate() {
            sleep(Self::step_delay(&config)).await;
            let progress = Self::step_progress(index + 1, steps.len());
            if !report(reporter, task_id, TaskTransition::running(progress).with_log(*step)).await {
                return;
            }
        }

        sleep(Self::step_delay(&config)).await;
        let finished = if Self::roll_success(&config, operator_type) {
            TaskTransition::succeeded().with_log("任务执行成功")
        } else {
            TaskTransition::failed("模拟执行失败，请检查日志").with_log("任务执行失败")
        };
        let status = finished.status;
        if report(reporter, task_id, finished).await {
            debug!("模拟任务 {} 结束: {}", task_id, status);
        }
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn submit(
        &self,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) -> OperationsResult<()> {
        info!(
            "模拟执行{}任务: task_id={}, node={}:{}",
            request.operator_type.display_name(),
            request.task_id,
            request.ip,
            request.port
        );
        counter!("operations_backend_submissions_total", "backend" => "simulated").increment(1);

        let guard = ActiveGuard::enter(&self.active);
        let config = self.config.clone();
        tokio::spawn(async move {
            let _guard = guard;
            Self::run(config, request, reporter).await;
        });
        Ok(())
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_progress_caps_at_95() {
        let deploy: Vec<u8> = (1..=7).map(|i| SimulatedExecutor::step_progress(i, 7)).collect();
        assert_eq!(deploy, vec![12, 25, 37, 50, 62, 75, 87]);

        let restart: Vec<u8> = (1..=5).map(|i| SimulatedExecutor::step_progress(i, 5)).collect();
        assert_eq!(restart, vec![16, 33, 50, 66, 83]);

        assert_eq!(SimulatedExecutor::step_progress(99, 5), 95);
    }

    #[test]
    fn test_steps_per_operator() {
        assert_eq!(SimulatedExecutor::steps(OperatorType::Deploy).len(), 7);
        assert_eq!(SimulatedExecutor::steps(OperatorType::Restart).len(), 5);
    }

    #[test]
    fn test_failure_rate_bounds() {
        let mut config = SimulatedExecutorConfig::default();
        config.deploy_failure_rate = 0.0;
        config.restart_failure_rate = 1.0;
        for _ in 0..20 {
            assert!(SimulatedExecutor::roll_success(&config, OperatorType::Deploy));
            assert!(!SimulatedExecutor::roll_success(&config, OperatorType::Restart));
        }
    }
}
