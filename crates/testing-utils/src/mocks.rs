//! 仓储、日志存储与执行后端的内存实现
//!
//! 这些实现不依赖数据库或外部进程，供各 crate 的单元测试使用。
//! 三个仓储接口由同一个 `MockRepository` 实现，保证服务树、
//! 成员关系计数等跨实体查询与 SQLite 实现的语义一致。

use async_trait::async_trait;
use chrono::Utc;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{
    Node, NodeFilter, PageRequest, Service, ServiceFilter, ServiceWithNodes, Task, TaskFilter,
    TaskStatus, TaskTransition, TransitionOutcome,
};
use operations_core::traits::{
    ExecutionBackend, ExecutionRequest, NodeRepository, ServiceRepository, TaskLogStore,
    TaskReporter, TaskRepository,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockData {
    services: HashMap<i64, Service>,
    nodes: HashMap<i64, Node>,
    tasks: HashMap<i64, Task>,
    next_service_id: i64,
    next_node_id: i64,
    next_task_id: i64,
    /// 接下来若干次 CAS 写入模拟被其它写入者抢先
    concurrent_writes: usize,
}

impl MockData {
    fn insert_tasks(&mut self, tasks: &[Task]) -> Vec<Task> {
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            self.next_task_id += 1;
            let mut task = task.clone();
            task.id = self.next_task_id;
            task.version = 0;
            self.tasks.insert(task.id, task.clone());
            created.push(task);
        }
        created
    }

    fn verify_target(&self, service_id: i64, node_id: i64) -> OperationsResult<()> {
        let reason = match (self.services.get(&service_id), self.nodes.get(&node_id)) {
            (None, _) => format!("服务模块不存在: {service_id}"),
            (Some(service), _) if !service.enabled => format!("服务模块已停用: {service_id}"),
            (_, None) => format!("节点不存在: {node_id}"),
            (_, Some(node)) if !node.belongs_to(service_id) => {
                format!("节点 {node_id} 不属于服务模块 {service_id}")
            }
            (_, Some(node)) if !node.enabled => format!("节点已停用: {node_id}"),
            _ => return Ok(()),
        };
        Err(OperationsError::validation(reason))
    }
}

fn page_of<T: Clone>(mut items: Vec<T>, page: PageRequest) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let offset = page.offset() as usize;
    let items = if offset >= items.len() {
        Vec::new()
    } else {
        items
            .drain(offset..)
            .take(page.page_size as usize)
            .collect()
    };
    (items, total)
}

/// 内存仓储，同时实现服务模块、节点与任务三个仓储接口
#[derive(Debug, Clone, Default)]
pub struct MockRepository {
    data: Arc<Mutex<MockData>>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入服务模块，保留传入的ID
    pub fn insert_service(&self, service: Service) {
        let mut data = self.data.lock().unwrap();
        data.next_service_id = data.next_service_id.max(service.id);
        data.services.insert(service.id, service);
    }

    pub fn insert_node(&self, node: Node) {
        let mut data = self.data.lock().unwrap();
        data.next_node_id = data.next_node_id.max(node.id);
        data.nodes.insert(node.id, node);
    }

    pub fn insert_task(&self, task: Task) {
        let mut data = self.data.lock().unwrap();
        data.next_task_id = data.next_task_id.max(task.id);
        data.tasks.insert(task.id, task);
    }

    pub fn task_count(&self) -> usize {
        self.data.lock().unwrap().tasks.len()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        let data = self.data.lock().unwrap();
        let mut tasks: Vec<Task> = data.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    pub fn stored_task(&self, id: i64) -> Option<Task> {
        self.data.lock().unwrap().tasks.get(&id).cloned()
    }

    /// 让接下来 `count` 次 `update_versioned` 遇到版本冲突
    pub fn simulate_concurrent_writes(&self, count: usize) {
        self.data.lock().unwrap().concurrent_writes = count;
    }
}

#[async_trait]
impl ServiceRepository for MockRepository {
    async fn create(&self, service: &Service) -> OperationsResult<Service> {
        let mut data = self.data.lock().unwrap();
        if data.services.values().any(|s| s.code == service.code) {
            return Err(OperationsError::conflict(format!(
                "服务模块编码已存在: {}",
                service.code
            )));
        }
        data.next_service_id += 1;
        let mut created = service.clone();
        created.id = data.next_service_id;
        data.services.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Service>> {
        Ok(self.data.lock().unwrap().services.get(&id).cloned())
    }

    async fn get_by_ids(&self, ids: &[i64]) -> OperationsResult<Vec<Service>> {
        let data = self.data.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| data.services.get(id).cloned())
            .collect())
    }

    async fn get_by_name(&self, name: &str) -> OperationsResult<Option<Service>> {
        let data = self.data.lock().unwrap();
        Ok(data.services.values().find(|s| s.name == name).cloned())
    }

    async fn get_by_code(&self, code: &str) -> OperationsResult<Option<Service>> {
        let data = self.data.lock().unwrap();
        Ok(data.services.values().find(|s| s.code == code).cloned())
    }

    async fn update(&self, service: &Service) -> OperationsResult<Service> {
        let mut data = self.data.lock().unwrap();
        let Some(existing) = data.services.get(&service.id) else {
            return Err(OperationsError::ServiceNotFound { id: service.id });
        };
        let mut updated = service.clone();
        updated.code = existing.code.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        data.services.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64> {
        let mut data = self.data.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| data.services.remove(*id).is_some())
            .count() as u64)
    }

    async fn list(
        &self,
        filter: &ServiceFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Service>, i64)> {
        let data = self.data.lock().unwrap();
        let mut services: Vec<Service> = data
            .services
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        services.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page_of(services, page))
    }

    async fn service_tree(
        &self,
        filter: &ServiceFilter,
    ) -> OperationsResult<Vec<ServiceWithNodes>> {
        let data = self.data.lock().unwrap();
        let mut services: Vec<Service> = data
            .services
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        services.sort_by_key(|s| s.id);
        Ok(services
            .into_iter()
            .map(|service| {
                let mut nodes: Vec<Node> = data
                    .nodes
                    .values()
                    .filter(|n| n.belongs_to(service.id))
                    .cloned()
                    .collect();
                nodes.sort_by_key(|n| n.id);
                ServiceWithNodes { service, nodes }
            })
            .collect())
    }
}

#[async_trait]
impl NodeRepository for MockRepository {
    async fn create(&self, node: &Node) -> OperationsResult<Node> {
        let mut data = self.data.lock().unwrap();
        if data
            .nodes
            .values()
            .any(|n| n.ip == node.ip && n.port == node.port)
        {
            return Err(OperationsError::conflict(format!(
                "节点已存在: {}",
                node.address()
            )));
        }
        data.next_node_id += 1;
        let mut created = node.clone();
        created.id = data.next_node_id;
        data.nodes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Node>> {
        Ok(self.data.lock().unwrap().nodes.get(&id).cloned())
    }

    async fn get_by_ids(&self, ids: &[i64]) -> OperationsResult<Vec<Node>> {
        let data = self.data.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| data.nodes.get(id).cloned())
            .collect())
    }

    async fn find_by_address(&self, ip: &str, port: u16) -> OperationsResult<Option<Node>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .nodes
            .values()
            .find(|n| n.ip == ip && n.port == port)
            .cloned())
    }

    async fn update(&self, node: &Node) -> OperationsResult<Node> {
        let mut data = self.data.lock().unwrap();
        let Some(existing) = data.nodes.get(&node.id) else {
            return Err(OperationsError::NodeNotFound { id: node.id });
        };
        let mut updated = node.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        data.nodes.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64> {
        let mut data = self.data.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| data.nodes.remove(*id).is_some())
            .count() as u64)
    }

    async fn list(
        &self,
        filter: &NodeFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Node>, i64)> {
        let data = self.data.lock().unwrap();
        let mut nodes: Vec<Node> = data
            .nodes
            .values()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page_of(nodes, page))
    }

    async fn count_by_service(&self, service_id: i64) -> OperationsResult<i64> {
        let data = self.data.lock().unwrap();
        Ok(data
            .nodes
            .values()
            .filter(|n| n.belongs_to(service_id))
            .count() as i64)
    }

    async fn detach(&self, service_id: i64, node_id: i64) -> OperationsResult<bool> {
        let mut data = self.data.lock().unwrap();
        let Some(node) = data.nodes.get_mut(&node_id) else {
            return Ok(false);
        };
        let before = node.service_ids.len();
        node.service_ids.retain(|id| *id != service_id);
        Ok(node.service_ids.len() != before)
    }
}

#[async_trait]
impl TaskRepository for MockRepository {
    async fn create_batch(&self, tasks: &[Task]) -> OperationsResult<Vec<Task>> {
        Ok(self.data.lock().unwrap().insert_tasks(tasks))
    }

    async fn create_batch_for_targets(&self, tasks: &[Task]) -> OperationsResult<Vec<Task>> {
        let mut data = self.data.lock().unwrap();
        for task in tasks {
            data.verify_target(task.service_id, task.node_id)?;
        }
        Ok(data.insert_tasks(tasks))
    }

    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Task>> {
        Ok(self.data.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn update_versioned(&self, task: &Task) -> OperationsResult<bool> {
        let mut data = self.data.lock().unwrap();
        if data.concurrent_writes > 0 {
            data.concurrent_writes -= 1;
            if let Some(stored) = data.tasks.get_mut(&task.id) {
                stored.version += 1;
            }
            return Ok(false);
        }
        match data.tasks.get(&task.id) {
            Some(stored) if stored.version == task.version => {
                let mut updated = task.clone();
                updated.version += 1;
                data.tasks.insert(updated.id, updated);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64> {
        let mut data = self.data.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| data.tasks.remove(*id).is_some())
            .count() as u64)
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Task>, i64)> {
        let data = self.data.lock().unwrap();
        let mut tasks: Vec<Task> = data
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(page_of(tasks, page))
    }

    async fn recent(&self, limit: i64) -> OperationsResult<Vec<Task>> {
        let data = self.data.lock().unwrap();
        let mut tasks: Vec<Task> = data.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.id.cmp(&a.id));
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn find_by_status(&self, statuses: &[TaskStatus]) -> OperationsResult<Vec<Task>> {
        let data = self.data.lock().unwrap();
        let mut tasks: Vec<Task> = data
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.task_status))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    async fn count_active_by_nodes(&self, node_ids: &[i64]) -> OperationsResult<i64> {
        let data = self.data.lock().unwrap();
        Ok(data
            .tasks
            .values()
            .filter(|t| node_ids.contains(&t.node_id) && t.is_active())
            .count() as i64)
    }
}

/// 内存任务日志
#[derive(Debug, Clone, Default)]
pub struct MockTaskLogStore {
    logs: Arc<Mutex<HashMap<String, Vec<String>>>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockTaskLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self, log_path: &str) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .get(log_path)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, log_path: &str) -> bool {
        self.logs.lock().unwrap().contains_key(log_path)
    }

    /// 模拟日志被清理
    pub fn purge(&self, log_path: &str) {
        self.logs.lock().unwrap().remove(log_path);
    }
}

#[async_trait]
impl TaskLogStore for MockTaskLogStore {
    async fn allocate(&self, task: &Task) -> OperationsResult<String> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        Ok(format!(
            "{}_{}_{}.log",
            task.operator_type,
            task.ip.replace(['.', ':'], "-"),
            *next_id
        ))
    }

    async fn append(&self, log_path: &str, line: &str) -> OperationsResult<()> {
        self.logs
            .lock()
            .unwrap()
            .entry(log_path.to_string())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    async fn read(&self, log_path: &str) -> OperationsResult<String> {
        let logs = self.logs.lock().unwrap();
        logs.get(log_path)
            .map(|lines| lines.iter().map(|l| format!("{l}\n")).collect())
            .ok_or_else(|| OperationsError::LogNotFound("日志文件不存在或已清理".to_string()))
    }

    async fn size(&self, log_path: &str) -> OperationsResult<u64> {
        Ok(self.read(log_path).await?.len() as u64)
    }

    async fn remove(&self, log_path: &str) -> OperationsResult<()> {
        self.logs.lock().unwrap().remove(log_path);
        Ok(())
    }

    async fn cleanup_older_than(&self, _keep_days: u32) -> OperationsResult<usize> {
        Ok(0)
    }
}

/// 记录提交请求的执行后端，不做任何实际执行
///
/// 测试通过 [`RecordingBackend::reporter`] 拿到台账回报接口，手动驱动状态转换。
#[derive(Clone, Default)]
pub struct RecordingBackend {
    requests: Arc<Mutex<Vec<ExecutionRequest>>>,
    reporters: Arc<Mutex<Vec<Arc<dyn TaskReporter>>>>,
    unavailable_nodes: Arc<Mutex<HashSet<i64>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交到这些节点的任务返回后端不可用
    pub fn with_unavailable_nodes(self, node_ids: &[i64]) -> Self {
        self.unavailable_nodes
            .lock()
            .unwrap()
            .extend(node_ids.iter().copied());
        self
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reporter(&self) -> Option<Arc<dyn TaskReporter>> {
        self.reporters.lock().unwrap().first().cloned()
    }

    pub async fn report(
        &self,
        task_id: i64,
        transition: TaskTransition,
    ) -> OperationsResult<TransitionOutcome> {
        let reporter = self
            .reporter()
            .ok_or_else(|| OperationsError::internal("尚未收到任何提交"))?;
        reporter.report(task_id, transition).await
    }
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn submit(
        &self,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) -> OperationsResult<()> {
        if self.unavailable_nodes.lock().unwrap().contains(&request.node_id) {
            return Err(OperationsError::backend_unavailable(format!(
                "节点 {} 的执行通道不可用",
                request.ip
            )));
        }
        self.requests.lock().unwrap().push(request);
        self.reporters.lock().unwrap().push(reporter);
        Ok(())
    }
}

/// 总是不可用的执行后端
#[derive(Debug, Clone, Default)]
pub struct FailingBackend;

#[async_trait]
impl ExecutionBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn submit(
        &self,
        _request: ExecutionRequest,
        _reporter: Arc<dyn TaskReporter>,
    ) -> OperationsResult<()> {
        Err(OperationsError::backend_unavailable("执行后端连接失败"))
    }
}
