use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OperationsError;
use crate::models::{Node, OperatorType, Service};

/// 任务执行状态
///
/// ```text
/// Pending → Running → Succeeded
///    │         │
///    └─────────┴────→ Failed
/// ```
///
/// 终态 (Succeeded/Failed) 不允许再发生任何转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// 检查状态转换是否有效
    ///
    /// 非终态允许同状态上报（运行中的进度、等待中的日志）；
    /// `pending → failed` 用于提交失败和重启恢复，`pending → succeeded` 不允许。
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Running)
                | (Pending, Failed)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }

    pub fn active_statuses() -> [TaskStatus; 2] {
        [TaskStatus::Pending, TaskStatus::Running]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = OperationsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(OperationsError::validation(format!(
                "无效的任务状态: {other}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 任务类型，目前只有节点操作一种
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    NodeOperator,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::NodeOperator => "node_operator",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "node_operator" => Ok(TaskType::NodeOperator),
            _ => Err(format!("Invalid task type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 创建任务时服务模块的快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub id: i64,
    pub name: String,
    pub code: String,
}

/// 创建任务时节点的快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: i64,
    pub ip: String,
    pub port: u16,
}

/// 节点操作任务参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeOperatorParams {
    pub operator_type: OperatorType,
    #[serde(default)]
    pub operator_name: Option<String>,
    pub trigger_time: DateTime<Utc>,
    pub service: ServiceSnapshot,
    pub node: NodeSnapshot,
}

/// 任务参数
///
/// 已知的操作类型使用强类型结构，其它来源写入的参数保留为原始 JSON。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskParams {
    NodeOperator(NodeOperatorParams),
    Opaque(serde_json::Value),
}

impl TaskParams {
    /// 从数据库文本还原参数，无法解析的文本包装成 `{"raw": text}`
    pub fn from_db_text(text: &str) -> Self {
        match serde_json::from_str::<TaskParams>(text) {
            Ok(params) => params,
            Err(_) => TaskParams::Opaque(serde_json::json!({ "raw": text })),
        }
    }

    pub fn to_db_text(&self) -> Result<String, OperationsError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn as_node_operator(&self) -> Option<&NodeOperatorParams> {
        match self {
            TaskParams::NodeOperator(params) => Some(params),
            TaskParams::Opaque(_) => None,
        }
    }
}

/// 任务
///
/// 一次针对 (服务模块, 节点) 的部署或重启操作。由派发器创建，
/// 之后只能通过任务台账的状态转换修改，`version` 用于乐观并发控制。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_type: TaskType,
    pub operator_type: OperatorType,
    pub task_status: TaskStatus,
    pub progress: u8,
    pub service_id: i64,
    pub node_id: i64,
    pub ip: String,
    pub params: TaskParams,
    pub log_path: Option<String>,
    pub error_message: Option<String>,
    pub project: Option<String>,
    pub idc: Option<String>,
    pub module_group: Option<String>,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub version: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// 为一个已校验的 (服务模块, 节点) 目标创建待执行任务
    pub fn for_target(
        operator_type: OperatorType,
        service: &Service,
        node: &Node,
        operator_name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let params = TaskParams::NodeOperator(NodeOperatorParams {
            operator_type,
            operator_name,
            trigger_time: now,
            service: ServiceSnapshot {
                id: service.id,
                name: service.name.clone(),
                code: service.code.clone(),
            },
            node: NodeSnapshot {
                id: node.id,
                ip: node.ip.clone(),
                port: node.port,
            },
        });
        Self {
            id: 0, // 将由数据库生成
            task_type: TaskType::NodeOperator,
            operator_type,
            task_status: TaskStatus::Pending,
            progress: 0,
            service_id: service.id,
            node_id: node.id,
            ip: node.ip.clone(),
            params,
            log_path: None,
            error_message: None,
            project: node.project.clone().or_else(|| service.project.clone()),
            idc: node.idc.clone(),
            module_group: service.module_group.clone(),
            version: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.task_status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// 更新状态并维护开始/完成时间，进入成功状态时进度固定为 100
    pub fn update_status(&mut self, status: TaskStatus) {
        let now = Utc::now();
        if status == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if status == TaskStatus::Succeeded {
            self.progress = 100;
        }
        self.task_status = status;
        self.updated_at = now;
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }
}

/// 一次状态上报
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub log_append: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskTransition {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            progress: None,
            log_append: None,
            error_message: None,
        }
    }

    pub fn running(progress: u8) -> Self {
        Self::to(TaskStatus::Running).with_progress(progress)
    }

    pub fn succeeded() -> Self {
        Self::to(TaskStatus::Succeeded)
    }

    pub fn failed<S: Into<String>>(error_message: S) -> Self {
        Self::to(TaskStatus::Failed).with_error(error_message)
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_log<S: Into<String>>(mut self, line: S) -> Self {
        self.log_append = Some(line.into());
        self
    }

    pub fn with_error<S: Into<String>>(mut self, message: S) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// 状态上报的处理结果
///
/// 非法状态转换以错误返回；进度回退只被拒绝并记录，不视为错误。
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Task),
    ProgressRegressed { task: Task, attempted: u8 },
}

impl TransitionOutcome {
    pub fn task(&self) -> &Task {
        match self {
            TransitionOutcome::Applied(task) => task,
            TransitionOutcome::ProgressRegressed { task, .. } => task,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// 任务过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub operator_type: Option<OperatorType>,
    pub task_status: Option<TaskStatus>,
    pub service_id: Option<i64>,
    pub node_id: Option<i64>,
    pub project: Option<String>,
    pub idc: Option<String>,
    pub module_group: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.operator_type.map_or(true, |t| task.operator_type == t)
            && self.task_status.map_or(true, |s| task.task_status == s)
            && self.service_id.map_or(true, |id| task.service_id == id)
            && self.node_id.map_or(true, |id| task.node_id == id)
            && self
                .project
                .as_deref()
                .map_or(true, |p| task.project.as_deref() == Some(p))
            && self
                .idc
                .as_deref()
                .map_or(true, |idc| task.idc.as_deref() == Some(idc))
            && self
                .module_group
                .as_deref()
                .map_or(true, |g| task.module_group.as_deref() == Some(g))
            && self.created_from.map_or(true, |from| task.created_at >= from)
            && self.created_to.map_or(true, |to| task.created_at <= to)
    }
}

/// 任务详情：任务本身、关联的服务模块与节点（若仍存在）以及日志大小
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub service: Option<Service>,
    pub node: Option<Node>,
    pub log_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> (Service, Node) {
        let mut service = Service::new("订单服务".to_string(), "order".to_string());
        service.id = 1;
        service.module_group = Some("trade".to_string());
        let mut node = Node::new("10.0.0.1".to_string(), 22, vec![1]);
        node.id = 10;
        node.idc = Some("bj".to_string());
        (service, node)
    }

    #[test]
    fn test_state_machine() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Succeeded, Failed] {
            for next in [Pending, Running, Succeeded, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_for_target_snapshots_service_and_node() {
        let (service, node) = target();
        let task = Task::for_target(OperatorType::Deploy, &service, &node, Some("ops".into()));
        assert_eq!(task.task_status, TaskStatus::Pending);
        assert_eq!(task.ip, "10.0.0.1");
        assert_eq!(task.idc.as_deref(), Some("bj"));
        assert_eq!(task.module_group.as_deref(), Some("trade"));

        let params = task.params.as_node_operator().unwrap();
        assert_eq!(params.service.code, "order");
        assert_eq!(params.node.id, 10);
        assert_eq!(params.operator_name.as_deref(), Some("ops"));
    }

    #[test]
    fn test_update_status_sets_timestamps() {
        let (service, node) = target();
        let mut task = Task::for_target(OperatorType::Restart, &service, &node, None);
        task.update_status(TaskStatus::Running);
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_none());

        task.progress = 40;
        task.update_status(TaskStatus::Succeeded);
        assert!(task.completed_at.is_some());
        assert_eq!(task.progress, 100);
        assert!(task.execution_duration_ms().is_some());
    }

    #[test]
    fn test_params_from_db_text() {
        let (service, node) = target();
        let task = Task::for_target(OperatorType::Deploy, &service, &node, None);
        let text = task.params.to_db_text().unwrap();
        assert!(matches!(
            TaskParams::from_db_text(&text),
            TaskParams::NodeOperator(_)
        ));

        let foreign = TaskParams::from_db_text(r#"{"script":"x.sh"}"#);
        assert_eq!(
            foreign,
            TaskParams::Opaque(serde_json::json!({"script": "x.sh"}))
        );

        let broken = TaskParams::from_db_text("not json");
        assert_eq!(
            broken,
            TaskParams::Opaque(serde_json::json!({"raw": "not json"}))
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
        assert_eq!("running".parse::<TaskStatus>().unwrap(), TaskStatus::Running);
    }
}
