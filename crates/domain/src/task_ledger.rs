use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{
    Page, PageRequest, Task, TaskDetail, TaskFilter, TaskStatus, TaskTransition,
    TransitionOutcome,
};
use operations_core::traits::{
    NodeRepository, ServiceRepository, TaskLogStore, TaskReporter, TaskRepository,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_RECENT_LIMIT: i64 = 20;
pub const MAX_RECENT_LIMIT: i64 = 100;

/// 版本冲突（其它进程写入）时的最大重试次数
const MAX_CAS_ATTEMPTS: usize = 5;

const CREATED_LOG_LINE: &str = "任务创建成功，等待执行";

/// 任务台账
///
/// 任务状态的唯一写入入口。同一任务的并发上报在进程内按任务ID串行化，
/// 写入存储时再用 `version` 做比较并交换，保证状态机和进度单调性。
/// 不同任务之间的上报互不阻塞。
pub struct TaskLedger {
    task_repo: Arc<dyn TaskRepository>,
    service_repo: Arc<dyn ServiceRepository>,
    node_repo: Arc<dyn NodeRepository>,
    log_store: Arc<dyn TaskLogStore>,
    task_locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

/// 任务锁的使用凭证
///
/// 释放时没有其他调用方持有同一把锁就把它从映射中移除，
/// 映射大小只取决于并发中的上报数量。
struct TaskLockLease<'a> {
    locks: &'a StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
    task_id: i64,
    lock: Arc<Mutex<()>>,
}

impl Drop for TaskLockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 映射和本凭证各持有一份
        let idle = locks
            .get(&self.task_id)
            .is_some_and(|held| Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2);
        if idle {
            locks.remove(&self.task_id);
        }
    }
}

enum Decision {
    Write(Task),
    Regressed { task: Task, attempted: u8 },
}

impl TaskLedger {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        service_repo: Arc<dyn ServiceRepository>,
        node_repo: Arc<dyn NodeRepository>,
        log_store: Arc<dyn TaskLogStore>,
    ) -> Self {
        Self {
            task_repo,
            service_repo,
            node_repo,
            log_store,
            task_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// 创建待执行任务
    ///
    /// 为每个任务分配日志文件并在一个事务内写入，返回顺序与输入一致。
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub async fn create_tasks(&self, tasks: Vec<Task>) -> OperationsResult<Vec<Task>> {
        self.insert_pending(tasks, false).await
    }

    /// 为派发请求创建任务
    ///
    /// 与 `create_tasks` 相同，但目标（服务模块启用、节点启用且仍属于该服务模块）
    /// 在写入任务的同一事务内复核，复核失败时不留下任何任务。
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub async fn create_target_tasks(&self, tasks: Vec<Task>) -> OperationsResult<Vec<Task>> {
        self.insert_pending(tasks, true).await
    }

    async fn insert_pending(
        &self,
        mut tasks: Vec<Task>,
        verify_targets: bool,
    ) -> OperationsResult<Vec<Task>> {
        for task in tasks.iter_mut() {
            task.task_status = TaskStatus::Pending;
            task.log_path = Some(self.log_store.allocate(task).await?);
        }

        let created = if verify_targets {
            self.task_repo.create_batch_for_targets(&tasks).await?
        } else {
            self.task_repo.create_batch(&tasks).await?
        };

        for task in &created {
            counter!("operations_tasks_created_total", "operator" => task.operator_type.as_str())
                .increment(1);
            self.append_log(task, CREATED_LOG_LINE).await;
        }
        debug!("创建任务 {} 个", created.len());
        Ok(created)
    }

    /// 状态转换
    ///
    /// - 非法转换（包括离开终态）返回 `InvalidTransition`，存储不变
    /// - 运行中进度回退时整条上报被拒绝，只记录告警，返回 `ProgressRegressed`
    /// - 进入成功状态时进度固定为 100
    #[instrument(skip(self, transition), fields(status = %transition.status))]
    pub async fn transition(
        &self,
        task_id: i64,
        transition: TaskTransition,
    ) -> OperationsResult<TransitionOutcome> {
        if let Some(progress) = transition.progress {
            if progress > 100 {
                return Err(OperationsError::validation(format!(
                    "进度必须在0-100之间: {progress}"
                )));
            }
        }

        let lease = self.task_lock(task_id);
        let _guard = lease.lock.lock().await;

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let current = self.get_task(task_id).await?;

            match Self::decide(&current, &transition) {
                Err(err) => {
                    counter!("operations_task_reports_rejected_total", "reason" => "invalid_transition")
                        .increment(1);
                    warn!("拒绝任务 {} 的状态上报: {}", task_id, err);
                    return Err(err);
                }
                Ok(Decision::Regressed { task, attempted }) => {
                    counter!("operations_task_reports_rejected_total", "reason" => "progress_regressed")
                        .increment(1);
                    warn!(
                        "任务 {} 进度回退被拒绝: 当前 {} 上报 {}",
                        task_id, task.progress, attempted
                    );
                    break TransitionOutcome::ProgressRegressed { task, attempted };
                }
                Ok(Decision::Write(next)) => {
                    if self.task_repo.update_versioned(&next).await? {
                        let mut stored = next;
                        stored.version += 1;
                        break TransitionOutcome::Applied(stored);
                    }
                    if attempts >= MAX_CAS_ATTEMPTS {
                        return Err(OperationsError::conflict(format!(
                            "任务 {task_id} 并发更新冲突，请稍后重试"
                        )));
                    }
                    debug!("任务 {} 版本冲突，重新读取后重试", task_id);
                }
            }
        };

        if let TransitionOutcome::Applied(task) = &outcome {
            counter!("operations_task_transitions_total", "status" => task.task_status.as_str())
                .increment(1);
            if let Some(line) = transition.log_append.as_deref() {
                self.append_log(task, line).await;
            }
            if task.is_terminal() {
                info!(
                    "任务 {} 结束: {} ({}, {})",
                    task.id,
                    task.task_status,
                    task.operator_type,
                    task.ip
                );
            }
        }

        Ok(outcome)
    }

    fn decide(current: &Task, transition: &TaskTransition) -> OperationsResult<Decision> {
        let from = current.task_status;
        let to = transition.status;
        if !from.can_transition_to(to) {
            return Err(OperationsError::InvalidTransition {
                task_id: current.id,
                from,
                to,
            });
        }

        if let Some(progress) = transition.progress {
            if from == TaskStatus::Running && to == TaskStatus::Running && progress < current.progress
            {
                return Ok(Decision::Regressed {
                    task: current.clone(),
                    attempted: progress,
                });
            }
        }

        let mut next = current.clone();
        if from != to {
            next.update_status(to);
        } else {
            next.updated_at = Utc::now();
        }
        if to != TaskStatus::Pending && to != TaskStatus::Succeeded {
            if let Some(progress) = transition.progress {
                next.progress = next.progress.max(progress);
            }
        }
        if let Some(message) = &transition.error_message {
            next.error_message = Some(message.clone());
        }
        Ok(Decision::Write(next))
    }

    fn task_lock(&self, task_id: i64) -> TaskLockLease<'_> {
        let mut locks = self.task_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        TaskLockLease {
            locks: &self.task_locks,
            task_id,
            lock,
        }
    }

    /// 正在使用的任务锁数量，没有进行中的上报时为 0
    pub fn held_task_locks(&self) -> usize {
        self.task_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn append_log(&self, task: &Task, line: &str) {
        let Some(log_path) = task.log_path.as_deref() else {
            return;
        };
        if let Err(e) = self.log_store.append(log_path, line).await {
            warn!("写入任务 {} 日志失败: {}", task.id, e);
        }
    }

    /// 把任务置为失败，用于提交失败、重启恢复和超时监督
    pub async fn fail_task(
        &self,
        task_id: i64,
        reason: &str,
    ) -> OperationsResult<TransitionOutcome> {
        self.transition(
            task_id,
            TaskTransition::failed(reason).with_log(format!("任务失败: {reason}")),
        )
        .await
    }

    pub async fn get_task(&self, id: i64) -> OperationsResult<Task> {
        self.task_repo
            .get_by_id(id)
            .await?
            .ok_or(OperationsError::TaskNotFound { id })
    }

    /// 任务详情：关联的服务模块、节点（已删除时为空）以及日志大小
    pub async fn task_detail(&self, id: i64) -> OperationsResult<TaskDetail> {
        let task = self.get_task(id).await?;
        let service = self.service_repo.get_by_id(task.service_id).await?;
        let node = self.node_repo.get_by_id(task.node_id).await?;
        let log_size = match task.log_path.as_deref() {
            Some(path) => match self.log_store.size(path).await {
                Ok(size) => size,
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            },
            None => 0,
        };
        Ok(TaskDetail {
            task,
            service,
            node,
            log_size,
        })
    }

    pub async fn read_log(&self, id: i64) -> OperationsResult<String> {
        let task = self.get_task(id).await?;
        let log_path = task
            .log_path
            .ok_or_else(|| OperationsError::LogNotFound("任务未生成日志".to_string()))?;
        self.log_store.read(&log_path).await
    }

    pub async fn log_size(&self, id: i64) -> OperationsResult<u64> {
        let task = self.get_task(id).await?;
        let log_path = task
            .log_path
            .ok_or_else(|| OperationsError::LogNotFound("任务未生成日志".to_string()))?;
        self.log_store.size(&log_path).await
    }

    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> OperationsResult<Page<Task>> {
        let (items, total) = self.task_repo.list(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    /// 最近的任务，默认 20 条，最多 100 条
    pub async fn recent_tasks(&self, limit: Option<i64>) -> OperationsResult<Vec<Task>> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_RECENT_LIMIT)
            .min(MAX_RECENT_LIMIT);
        self.task_repo.recent(limit).await
    }

    pub async fn active_tasks(&self) -> OperationsResult<Vec<Task>> {
        self.task_repo
            .find_by_status(&TaskStatus::active_statuses())
            .await
    }

    /// 批量删除任务
    ///
    /// 只允许删除已结束的任务，任一任务不存在或未结束时整体拒绝。
    /// 删除后清理日志文件，清理失败只记录告警。
    #[instrument(skip(self))]
    pub async fn delete_tasks(&self, ids: &[i64]) -> OperationsResult<u64> {
        if ids.is_empty() {
            return Err(OperationsError::validation("请选择要删除的任务"));
        }
        let mut seen = HashSet::new();
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut tasks = Vec::with_capacity(ids.len());
        for id in &ids {
            let task = self.get_task(*id).await?;
            if task.is_active() {
                return Err(OperationsError::conflict(format!(
                    "任务 {} 尚未结束({})，不能删除",
                    task.id, task.task_status
                )));
            }
            tasks.push(task);
        }

        let deleted = self.task_repo.delete_many(&ids).await?;
        counter!("operations_tasks_deleted_total").increment(deleted);

        for task in &tasks {
            if let Some(path) = task.log_path.as_deref() {
                if let Err(e) = self.log_store.remove(path).await {
                    warn!("删除任务 {} 日志失败: {}", task.id, e);
                }
            }
        }
        info!("删除任务 {} 个: {:?}", deleted, ids);
        Ok(deleted)
    }
}

#[async_trait]
impl TaskReporter for TaskLedger {
    async fn report(
        &self,
        task_id: i64,
        transition: TaskTransition,
    ) -> OperationsResult<TransitionOutcome> {
        self.transition(task_id, transition).await
    }
}
