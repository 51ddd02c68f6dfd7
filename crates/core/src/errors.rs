use thiserror::Error;

use crate::models::TaskStatus;

/// 运维编排错误类型定义
#[derive(Debug, Error)]
pub enum OperationsError {
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("服务模块不存在: id={id}")]
    ServiceNotFound { id: i64 },

    #[error("节点不存在: id={id}")]
    NodeNotFound { id: i64 },

    #[error("任务不存在: id={id}")]
    TaskNotFound { id: i64 },

    #[error("任务日志不存在: {0}")]
    LogNotFound(String),

    #[error("任务 {task_id} 状态转换无效: {from} -> {to}")]
    InvalidTransition {
        task_id: i64,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("执行后端不可用: {0}")]
    BackendUnavailable(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("远端返回错误: code={code}, message={message}")]
    Remote { code: i32, message: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type OperationsResult<T> = std::result::Result<T, OperationsError>;

impl OperationsError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            OperationsError::ServiceNotFound { .. }
                | OperationsError::NodeNotFound { .. }
                | OperationsError::TaskNotFound { .. }
                | OperationsError::LogNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            OperationsError::Conflict(_) | OperationsError::InvalidTransition { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperationsError::Database(_)
                | OperationsError::Network(_)
                | OperationsError::BackendUnavailable(_)
        )
    }

    /// 响应信封中使用的业务错误码，0 保留给成功响应
    pub fn code(&self) -> i32 {
        match self {
            OperationsError::Validation(_) => 10001,
            OperationsError::ServiceNotFound { .. }
            | OperationsError::NodeNotFound { .. }
            | OperationsError::TaskNotFound { .. }
            | OperationsError::LogNotFound(_) => 10002,
            OperationsError::Conflict(_) => 10003,
            OperationsError::InvalidTransition { .. } => 10004,
            OperationsError::BackendUnavailable(_) => 10005,
            OperationsError::Remote { code, .. } => *code,
            _ => 10000,
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            OperationsError::Validation(_) => "输入数据验证失败",
            OperationsError::Conflict(_) => "操作与当前资源状态冲突",
            OperationsError::ServiceNotFound { .. } => "请求的服务模块不存在",
            OperationsError::NodeNotFound { .. } => "请求的节点不存在",
            OperationsError::TaskNotFound { .. } => "请求的任务不存在",
            OperationsError::LogNotFound(_) => "任务日志不存在或已清理",
            OperationsError::InvalidTransition { .. } => "任务状态转换无效",
            OperationsError::BackendUnavailable(_) => "执行后端不可用，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for OperationsError {
    fn from(err: serde_json::Error) -> Self {
        OperationsError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OperationsError {
    fn from(err: anyhow::Error) -> Self {
        OperationsError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(OperationsError::validation("x").code(), 10001);
        assert_eq!(OperationsError::TaskNotFound { id: 1 }.code(), 10002);
        assert_eq!(OperationsError::conflict("x").code(), 10003);
        assert_eq!(
            OperationsError::InvalidTransition {
                task_id: 1,
                from: TaskStatus::Succeeded,
                to: TaskStatus::Running,
            }
            .code(),
            10004
        );
        assert_eq!(OperationsError::backend_unavailable("x").code(), 10005);
        assert_eq!(OperationsError::internal("x").code(), 10000);
    }

    #[test]
    fn test_error_classification() {
        assert!(OperationsError::NodeNotFound { id: 3 }.is_not_found());
        assert!(!OperationsError::validation("bad").is_not_found());
        assert!(OperationsError::conflict("busy").is_conflict());
        assert!(OperationsError::backend_unavailable("down").is_retryable());
        assert!(!OperationsError::validation("bad").is_retryable());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = OperationsError::InvalidTransition {
            task_id: 7,
            from: TaskStatus::Failed,
            to: TaskStatus::Running,
        };
        assert_eq!(err.to_string(), "任务 7 状态转换无效: failed -> running");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OperationsError = json_err.into();
        assert!(matches!(err, OperationsError::Serialization(_)));
    }
}
