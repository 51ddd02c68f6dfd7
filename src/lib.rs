//! 运维编排服务
//!
//! 二进制入口见 `main.rs`，这里导出应用装配和关闭管理，供集成测试直接启动完整服务。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
