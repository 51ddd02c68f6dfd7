use async_trait::async_trait;

use crate::errors::OperationsResult;
use crate::models::Task;

/// 任务日志存储接口
///
/// 日志只追加，不修改。`read`/`size` 在日志不存在时返回 `LogNotFound`。
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    /// 为任务分配日志位置，返回写入 `Task::log_path` 的值
    async fn allocate(&self, task: &Task) -> OperationsResult<String>;

    /// 追加一行，实现负责添加时间前缀
    async fn append(&self, log_path: &str, line: &str) -> OperationsResult<()>;

    async fn read(&self, log_path: &str) -> OperationsResult<String>;

    /// 日志字节数，用于在读取全文前探测大小
    async fn size(&self, log_path: &str) -> OperationsResult<u64>;

    async fn remove(&self, log_path: &str) -> OperationsResult<()>;

    /// 删除超过保留天数的日志，返回删除数量
    async fn cleanup_older_than(&self, keep_days: u32) -> OperationsResult<usize>;
}
