//! 执行后端接口
//!
//! 执行后端负责真正的部署/重启动作（脚本、Agent 调用等），
//! 通过 `TaskReporter` 把状态、进度和日志回报给任务台账。
//!
//! 取消目前不支持：任务一旦提交就会运行到终态。若需要取消，
//! 应在任务状态中增加 `cancelling → cancelled`，并在本接口上增加取消钩子。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OperationsResult;
use crate::models::{Node, OperatorType, Service, Task, TaskTransition, TransitionOutcome};

/// 提交给执行后端的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub task_id: i64,
    pub operator_type: OperatorType,
    pub service_id: i64,
    pub service_code: String,
    pub node_id: i64,
    pub ip: String,
    pub port: u16,
    pub operator_name: Option<String>,
}

impl ExecutionRequest {
    pub fn new(task: &Task, service: &Service, node: &Node) -> Self {
        Self {
            task_id: task.id,
            operator_type: task.operator_type,
            service_id: service.id,
            service_code: service.code.clone(),
            node_id: node.id,
            ip: node.ip.clone(),
            port: node.port,
            operator_name: task
                .params
                .as_node_operator()
                .and_then(|p| p.operator_name.clone()),
        }
    }
}

/// 状态回报接口，由任务台账实现
#[async_trait]
pub trait TaskReporter: Send + Sync {
    async fn report(
        &self,
        task_id: i64,
        transition: TaskTransition,
    ) -> OperationsResult<TransitionOutcome>;
}

/// 执行后端接口
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// 提交一个任务
    ///
    /// 必须尽快返回，实际执行在后台进行。返回错误表示后端不可用，
    /// 派发器会把任务标记为失败。
    async fn submit(
        &self,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) -> OperationsResult<()>;

    /// 后台仍在执行的任务数量
    fn active_count(&self) -> usize {
        0
    }
}
