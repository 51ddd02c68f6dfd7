//! 数据仓储层接口定义
//!
//! - `ServiceRepository` 服务模块的增删改查与服务树
//! - `NodeRepository` 节点及其服务模块成员关系
//! - `TaskRepository` 任务记录，写入使用 `version` 做乐观并发控制
//!
//! 所有接口要求 `Send + Sync`，SQLite 实现在 infrastructure crate，
//! 内存实现在 testing-utils crate。

use async_trait::async_trait;

use crate::errors::OperationsResult;
use crate::models::{
    Node, NodeFilter, PageRequest, Service, ServiceFilter, ServiceWithNodes, Task, TaskFilter,
    TaskStatus,
};

/// 服务模块仓储接口
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// 创建服务模块，返回带数据库生成ID的记录
    async fn create(&self, service: &Service) -> OperationsResult<Service>;

    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Service>>;

    /// 批量查询，结果顺序不保证，不存在的ID直接忽略
    async fn get_by_ids(&self, ids: &[i64]) -> OperationsResult<Vec<Service>>;

    async fn get_by_name(&self, name: &str) -> OperationsResult<Option<Service>>;

    async fn get_by_code(&self, code: &str) -> OperationsResult<Option<Service>>;

    /// 更新服务模块，`code` 不会被修改
    async fn update(&self, service: &Service) -> OperationsResult<Service>;

    /// 在一个事务内删除全部服务模块，返回删除数量
    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64>;

    /// 分页查询，按创建时间倒序，返回 (当前页, 总数)
    async fn list(
        &self,
        filter: &ServiceFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Service>, i64)>;

    /// 服务树：每个服务模块及其挂载的节点，在同一快照中读取
    async fn service_tree(&self, filter: &ServiceFilter)
        -> OperationsResult<Vec<ServiceWithNodes>>;
}

/// 节点仓储接口
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// 创建节点并写入成员关系
    async fn create(&self, node: &Node) -> OperationsResult<Node>;

    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Node>>;

    async fn get_by_ids(&self, ids: &[i64]) -> OperationsResult<Vec<Node>>;

    async fn find_by_address(&self, ip: &str, port: u16) -> OperationsResult<Option<Node>>;

    /// 更新节点，成员关系整体替换为 `node.service_ids`
    async fn update(&self, node: &Node) -> OperationsResult<Node>;

    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64>;

    async fn list(&self, filter: &NodeFilter, page: PageRequest)
        -> OperationsResult<(Vec<Node>, i64)>;

    /// 挂载在某个服务模块下的节点数量
    async fn count_by_service(&self, service_id: i64) -> OperationsResult<i64>;

    /// 解除一条成员关系，关系不存在时返回 false
    async fn detach(&self, service_id: i64, node_id: i64) -> OperationsResult<bool>;
}

/// 任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 在一个事务内按顺序创建任务，返回的任务与输入顺序一致
    async fn create_batch(&self, tasks: &[Task]) -> OperationsResult<Vec<Task>>;

    /// 同 `create_batch`，并在同一事务内复核每个任务的目标
    ///
    /// 服务模块必须存在且启用，节点必须存在、启用并仍属于该服务模块。
    /// 任一目标不满足时整批回滚，返回 `Validation`。
    async fn create_batch_for_targets(&self, tasks: &[Task]) -> OperationsResult<Vec<Task>>;

    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Task>>;

    /// 比较并交换写入
    ///
    /// 仅当存储中的 `version` 等于 `task.version` 时写入，并把版本号加一。
    /// 版本不匹配（已被其它写入者修改）返回 `Ok(false)`。
    async fn update_versioned(&self, task: &Task) -> OperationsResult<bool>;

    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64>;

    async fn list(&self, filter: &TaskFilter, page: PageRequest)
        -> OperationsResult<(Vec<Task>, i64)>;

    /// 最近创建的任务
    async fn recent(&self, limit: i64) -> OperationsResult<Vec<Task>>;

    async fn find_by_status(&self, statuses: &[TaskStatus]) -> OperationsResult<Vec<Task>>;

    /// 给定节点上未结束的任务数量
    async fn count_active_by_nodes(&self, node_ids: &[i64]) -> OperationsResult<i64>;
}
