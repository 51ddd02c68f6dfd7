use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{Local, Utc};
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::Task;
use operations_core::traits::TaskLogStore;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOG_EXTENSION: &str = "log";

/// 基于本地文件的任务日志
///
/// 每个任务一个文件，任务上记录的是目录内的文件名。
/// 每行带本地时间前缀 `[YYYY-MM-DD HH:MM:SS]`。
pub struct FileTaskLogStore {
    directory: PathBuf,
}

impl FileTaskLogStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn resolve(&self, log_path: &str) -> OperationsResult<PathBuf> {
        let name = Path::new(log_path);
        let plain = name.components().count() == 1
            && name.file_name().map(|f| f == name.as_os_str()).unwrap_or(false);
        if !plain {
            return Err(OperationsError::validation(format!("无效的日志路径: {log_path}")));
        }
        Ok(self.directory.join(name))
    }

    fn not_found() -> OperationsError {
        OperationsError::LogNotFound("日志文件不存在或已清理".to_string())
    }

    fn file_name(task: &Task) -> String {
        let ip = task.ip.replace(['.', ':'], "-");
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}_{}.{}",
            task.operator_type.as_str(),
            ip,
            Utc::now().format("%Y%m%d%H%M%S"),
            &suffix[..8],
            LOG_EXTENSION
        )
    }
}

#[async_trait]
impl TaskLogStore for FileTaskLogStore {
    async fn allocate(&self, task: &Task) -> OperationsResult<String> {
        fs::create_dir_all(&self.directory).await?;
        let name = Self::file_name(task);
        debug!("分配任务日志文件: {}", name);
        Ok(name)
    }

    async fn append(&self, log_path: &str, line: &str) -> OperationsResult<()> {
        let path = self.resolve(log_path)?;
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut content = String::new();
        for text in line.lines() {
            content.push_str(&format!("[{timestamp}] {text}\n"));
        }
        if content.is_empty() {
            content = format!("[{timestamp}] \n");
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, log_path: &str) -> OperationsResult<String> {
        let path = self.resolve(log_path)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found()),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, log_path: &str) -> OperationsResult<u64> {
        let path = self.resolve(log_path)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, log_path: &str) -> OperationsResult<()> {
        let path = self.resolve(log_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// 删除修改时间早于 `keep_days` 天的日志文件，0 表示不清理
    async fn cleanup_older_than(&self, keep_days: u32) -> OperationsResult<usize> {
        if keep_days == 0 {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(u64::from(keep_days) * 24 * 3600))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            if modified < cutoff {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("删除过期日志失败 {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!("清理过期任务日志 {} 个", removed);
        }
        Ok(removed)
    }
}
