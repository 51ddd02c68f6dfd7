use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use operations_core::config::DispatcherConfig;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{
    DispatchResult, DispatchedTask, ExecuteRequest, Node, OperatorMeta, OperatorType, Service,
    Task, TaskStatus,
};
use operations_core::traits::{
    ExecutionBackend, ExecutionRequest, NodeRepository, ServiceRepository, TaskReporter,
};
use operations_domain::TaskLedger;
use tracing::{debug, info, instrument, warn};

/// 校验通过的单个目标
struct Target {
    service: Service,
    node: Node,
}

/// 运维操作派发器
///
/// 一次执行请求按 服务模块 × 节点 展开，每个目标生成一个任务。
/// 所有校验在写入任何任务之前完成，任一目标不合法时整个请求被拒绝。
/// 任务入库后并发提交给执行后端，提交失败的任务立即置为失败，
/// 不影响同一请求中的其它任务。
pub struct OperatorDispatcher {
    service_repo: Arc<dyn ServiceRepository>,
    node_repo: Arc<dyn NodeRepository>,
    ledger: Arc<TaskLedger>,
    backend: Arc<dyn ExecutionBackend>,
    config: DispatcherConfig,
}

impl OperatorDispatcher {
    pub fn new(
        service_repo: Arc<dyn ServiceRepository>,
        node_repo: Arc<dyn NodeRepository>,
        ledger: Arc<TaskLedger>,
        backend: Arc<dyn ExecutionBackend>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            service_repo,
            node_repo,
            ledger,
            backend,
            config,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    #[instrument(skip(self, request), fields(operator_type = %request.operator_type))]
    pub async fn execute(&self, request: ExecuteRequest) -> OperationsResult<DispatchResult> {
        let operator_type = match request.operator_type.trim().parse::<OperatorType>() {
            Ok(operator_type) => operator_type,
            Err(e) => return Err(Self::rejected(e)),
        };
        let operator_name = request
            .operator_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let targets = self
            .resolve_targets(&request.operator_metas)
            .await
            .map_err(Self::rejected)?;

        let tasks: Vec<Task> = targets
            .iter()
            .map(|t| Task::for_target(operator_type, &t.service, &t.node, operator_name.clone()))
            .collect();
        // 校验与写入之间目标可能被停用或移出，写入事务内再复核一次
        let created = self
            .ledger
            .create_target_tasks(tasks)
            .await
            .map_err(Self::rejected)?;

        let reporter: Arc<dyn TaskReporter> = self.ledger.clone();
        let submissions = created.iter().zip(targets.iter()).map(|(task, target)| {
            let reporter = reporter.clone();
            async move { self.submit(task, target, reporter).await }
        });
        let dispatched = join_all(submissions).await;

        let result = DispatchResult::new(operator_type, dispatched);
        info!(
            "{}请求已派发: 任务 {:?}，执行后端 {}",
            operator_type.display_name(),
            result.task_ids,
            self.backend.name()
        );
        Ok(result)
    }

    /// 提交单个任务，失败时把任务置为失败并在结果中带上原因
    async fn submit(
        &self,
        task: &Task,
        target: &Target,
        reporter: Arc<dyn TaskReporter>,
    ) -> DispatchedTask {
        let request = ExecutionRequest::new(task, &target.service, &target.node);
        let backend = self.backend.name().to_string();

        let (task_status, error_message) = match self.backend.submit(request, reporter).await {
            Ok(()) => {
                debug!("任务 {} 已提交到 {}", task.id, backend);
                (TaskStatus::Pending, None)
            }
            Err(e) => {
                counter!("operations_dispatch_submit_failures_total", "backend" => backend)
                    .increment(1);
                let reason = format!("提交执行失败: {e}");
                warn!("任务 {} {}", task.id, reason);
                if let Err(fail_err) = self.ledger.fail_task(task.id, &reason).await {
                    warn!("标记任务 {} 失败时出错: {}", task.id, fail_err);
                }
                (TaskStatus::Failed, Some(reason))
            }
        };

        DispatchedTask {
            task_id: task.id,
            service_id: target.service.id,
            node_id: target.node.id,
            task_status,
            error_message,
        }
    }

    /// 校验并展开目标，保持请求中的先后顺序
    ///
    /// 同一服务模块下重复的节点（包括分散在多个分组中的）只保留第一次出现。
    async fn resolve_targets(&self, metas: &[OperatorMeta]) -> OperationsResult<Vec<Target>> {
        if metas.is_empty() {
            return Err(OperationsError::validation("请选择要操作的服务模块"));
        }

        let service_ids: Vec<i64> = dedup(metas.iter().map(|m| m.service_id));
        let node_ids: Vec<i64> = dedup(metas.iter().flat_map(|m| m.node_ids.iter().copied()));

        let services: HashMap<i64, Service> = self
            .service_repo
            .get_by_ids(&service_ids)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        let nodes: HashMap<i64, Node> = if node_ids.is_empty() {
            HashMap::new()
        } else {
            self.node_repo
                .get_by_ids(&node_ids)
                .await?
                .into_iter()
                .map(|n| (n.id, n))
                .collect()
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for meta in metas {
            let service = services.get(&meta.service_id).ok_or_else(|| {
                OperationsError::validation(format!("服务模块不存在: {}", meta.service_id))
            })?;
            if !service.enabled {
                return Err(OperationsError::validation(format!(
                    "服务模块已停用: {}({})",
                    service.name, service.id
                )));
            }
            if meta.node_ids.is_empty() {
                return Err(OperationsError::validation(format!(
                    "服务模块 {} 未选择节点",
                    service.id
                )));
            }

            for node_id in &meta.node_ids {
                let node = nodes.get(node_id).ok_or_else(|| {
                    OperationsError::validation(format!("节点不存在: {node_id}"))
                })?;
                if !node.belongs_to(service.id) {
                    return Err(OperationsError::validation(format!(
                        "节点 {} 不属于服务模块 {}",
                        node_id, service.id
                    )));
                }
                if !node.enabled {
                    return Err(OperationsError::validation(format!(
                        "节点已停用: {}({})",
                        node.address(),
                        node.id
                    )));
                }
                if seen.insert((service.id, node.id)) {
                    targets.push(Target {
                        service: service.clone(),
                        node: node.clone(),
                    });
                }
            }
        }

        if targets.len() > self.config.max_targets_per_request {
            return Err(OperationsError::validation(format!(
                "单次最多操作 {} 个节点，本次选择了 {} 个",
                self.config.max_targets_per_request,
                targets.len()
            )));
        }
        Ok(targets)
    }

    fn rejected(err: OperationsError) -> OperationsError {
        if matches!(err, OperationsError::Validation(_)) {
            counter!("operations_dispatch_rejected_total").increment(1);
            warn!("执行请求被拒绝: {}", err);
        }
        err
    }
}

fn dedup(ids: impl Iterator<Item = i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}
