use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OperationsError;
use crate::models::TaskStatus;

/// 操作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperatorType {
    Deploy,
    Restart,
}

impl OperatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorType::Deploy => "deploy",
            OperatorType::Restart => "restart",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OperatorType::Deploy => "部署",
            OperatorType::Restart => "重启",
        }
    }
}

impl fmt::Display for OperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorType {
    type Err = OperationsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(OperatorType::Deploy),
            "restart" => Ok(OperatorType::Restart),
            other => Err(OperationsError::validation(format!(
                "不支持的操作类型: {other}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for OperatorType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for OperatorType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "deploy" => Ok(OperatorType::Deploy),
            "restart" => Ok(OperatorType::Restart),
            _ => Err(format!("Invalid operator type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for OperatorType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 请求时的目标分组：一个服务模块下的若干节点，不做持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMeta {
    pub service_id: i64,
    #[serde(default)]
    pub node_ids: Vec<i64>,
}

impl OperatorMeta {
    pub fn new(service_id: i64, node_ids: Vec<i64>) -> Self {
        Self {
            service_id,
            node_ids,
        }
    }
}

/// 执行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub operator_type: String,
    pub operator_metas: Vec<OperatorMeta>,
    /// 触发人，写入任务参数快照
    #[serde(default)]
    pub operator_name: Option<String>,
}

/// 单个目标的派发结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedTask {
    pub task_id: i64,
    pub service_id: i64,
    pub node_id: i64,
    pub task_status: TaskStatus,
    pub error_message: Option<String>,
}

/// 派发结果，任务按目标校验顺序排列
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchResult {
    pub message: String,
    pub task_ids: Vec<i64>,
    pub task_count: usize,
    pub tasks: Vec<DispatchedTask>,
}

impl DispatchResult {
    pub fn new(operator_type: OperatorType, tasks: Vec<DispatchedTask>) -> Self {
        let task_ids: Vec<i64> = tasks.iter().map(|t| t.task_id).collect();
        let submit_failed = tasks
            .iter()
            .filter(|t| t.task_status == TaskStatus::Failed)
            .count();
        let message = if submit_failed == 0 {
            format!(
                "{}任务已创建，共{}个",
                operator_type.display_name(),
                task_ids.len()
            )
        } else {
            format!(
                "{}任务已创建，共{}个，其中{}个提交失败",
                operator_type.display_name(),
                task_ids.len(),
                submit_failed
            )
        };
        Self {
            message,
            task_count: task_ids.len(),
            task_ids,
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_type_parse() {
        assert_eq!("deploy".parse::<OperatorType>().unwrap(), OperatorType::Deploy);
        assert_eq!("restart".parse::<OperatorType>().unwrap(), OperatorType::Restart);
        let err = "stop".parse::<OperatorType>().unwrap_err();
        assert!(err.to_string().contains("stop"));
    }

    #[test]
    fn test_dispatch_result_message() {
        let tasks = vec![
            DispatchedTask {
                task_id: 1,
                service_id: 1,
                node_id: 10,
                task_status: TaskStatus::Pending,
                error_message: None,
            },
            DispatchedTask {
                task_id: 2,
                service_id: 1,
                node_id: 11,
                task_status: TaskStatus::Failed,
                error_message: Some("down".to_string()),
            },
        ];
        let result = DispatchResult::new(OperatorType::Deploy, tasks);
        assert_eq!(result.task_ids, vec![1, 2]);
        assert_eq!(result.task_count, 2);
        assert!(result.message.contains("1个提交失败"));
    }
}
