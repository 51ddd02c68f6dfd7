//! # 数据模型
//!
//! 运维编排的核心数据结构：服务模块、节点、任务以及请求时的操作分组。
//!
//! ## 关系
//!
//! - 服务模块与节点是多对多关系，节点通过 `service_ids` 挂载到服务模块
//! - 任务对应一次 (服务模块, 节点, 操作类型) 的执行，创建时保存两者快照
//! - `OperatorMeta` 只在请求中出现，不做持久化
//!
//! ## 任务状态流转
//! ```text
//! pending → running → succeeded
//!    │         │
//!    └─────────┴────→ failed
//! ```

pub mod node;
pub mod operator;
pub mod pagination;
pub mod service;
pub mod task;

pub use node::*;
pub use operator::*;
pub use pagination::*;
pub use service::{Service, ServiceFilter, ServiceForm, ServiceWithNodes};
pub use task::*;
