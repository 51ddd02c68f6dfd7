//! # Operations Testing Utils
//!
//! 各 crate 共用的测试工具。
//!
//! - **Mock Repositories**: 三个仓储接口的内存实现
//! - **Mock Log Store**: 内存任务日志
//! - **Backends**: 只记录提交的执行后端和总是失败的执行后端
//! - **Builders**: 服务模块、节点、任务的测试数据构建器
//!
//! ```toml
//! [dev-dependencies]
//! operations-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
