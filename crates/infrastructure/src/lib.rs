//! 存储与日志的基础设施实现：SQLite 仓储、文件任务日志和日志保留期清理

pub mod cleanup_service;
pub mod database;
pub mod log_store;

pub use cleanup_service::{CleanupStats, LogCleanupService};
pub use database::{
    DatabaseManager, SqliteNodeRepository, SqliteServiceRepository, SqliteTaskRepository,
};
pub use log_store::FileTaskLogStore;
