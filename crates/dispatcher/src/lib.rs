//! 运维操作派发
//!
//! - [`OperatorDispatcher`]: 校验执行请求、展开目标、创建任务并提交给执行后端
//! - [`TaskRecoveryService`]: 启动时处理上次进程遗留的未结束任务
//! - [`TaskSupervisor`]: 周期检查长时间未结束的任务

pub mod operator_dispatcher;
pub mod recovery_service;
pub mod task_supervisor;

pub use operator_dispatcher::OperatorDispatcher;
pub use recovery_service::{RecoveryReport, TaskRecoveryService, INTERRUPTED_REASON};
pub use task_supervisor::TaskSupervisor;
