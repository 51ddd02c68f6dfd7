//! 运维编排领域层
//!
//! - [`EntityStore`] 服务模块与节点的维护规则
//! - [`TaskLedger`] 任务状态机、按任务串行化的状态转换以及任务日志

pub mod entity_store;
pub mod task_ledger;

pub use entity_store::EntityStore;
pub use task_ledger::{TaskLedger, DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT};
