use std::sync::Arc;
use std::time::Duration;

use operations_core::models::{OperatorType, Task};
use operations_core::traits::{ExecutionRequest, TaskReporter};
use operations_domain::TaskLedger;
use operations_testing_utils::{
    MockRepository, MockTaskLogStore, NodeBuilder, ServiceBuilder, TaskBuilder, TestEnv,
};

pub struct Harness {
    pub ledger: Arc<TaskLedger>,
    pub repo: MockRepository,
    pub logs: MockTaskLogStore,
}

impl Harness {
    pub fn new() -> Self {
        let repo = MockRepository::new();
        let logs = MockTaskLogStore::new();
        let ledger = Arc::new(TaskLedger::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(logs.clone()),
        ));
        Self { ledger, repo, logs }
    }

    pub fn reporter(&self) -> Arc<dyn TaskReporter> {
        self.ledger.clone()
    }

    /// 创建一个待执行任务并返回对应的执行请求
    pub async fn pending(&self, operator_type: OperatorType) -> ExecutionRequest {
        let service = ServiceBuilder::new().with_code("order").build();
        let node = NodeBuilder::new().with_id(10).with_port(8022).build();
        let task = TaskBuilder::for_target(operator_type, &service, &node).build();
        let task = self.ledger.create_tasks(vec![task]).await.unwrap().remove(0);
        ExecutionRequest::new(&task, &service, &node)
    }

    pub async fn wait_terminal(&self, task_id: i64) -> Task {
        let repo = self.repo.clone();
        let finished = TestEnv::wait_for(
            || {
                let repo = repo.clone();
                async move {
                    repo.stored_task(task_id)
                        .map(|t| t.is_terminal())
                        .unwrap_or(false)
                }
            },
            Duration::from_secs(10),
        )
        .await;
        assert!(finished, "任务 {task_id} 未在限定时间内结束");
        self.repo.stored_task(task_id).unwrap()
    }

    pub fn log_lines(&self, task: &Task) -> Vec<String> {
        self.logs.lines(task.log_path.as_deref().unwrap())
    }
}
