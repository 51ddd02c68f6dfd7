//! 执行后端实现
//!
//! - `simulated`：按步骤模拟部署/重启，用于演示和测试
//! - `shell`：在本机执行配置的命令
//! - `agent`：把任务转交给远端 Agent，由 Agent 通过上报接口回报状态

pub mod executor_factory;
pub mod executors;

pub use executor_factory::create_backend;
pub use executors::{AgentExecutor, ShellExecutor, SimulatedExecutor};
