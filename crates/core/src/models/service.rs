use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OperationsError, OperationsResult};
use crate::models::Node;

pub const SERVICE_NAME_MAX_LEN: usize = 100;
pub const SERVICE_CODE_MAX_LEN: usize = 50;

/// 服务模块
///
/// 可部署的逻辑单元，`code` 全局唯一且创建后不可修改。
/// 节点通过成员关系挂载到服务模块下，服务模块本身是稳定标识。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub project: Option<String>,
    pub module_group: Option<String>,
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn new(name: String, code: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            name,
            code,
            enabled: true,
            description: None,
            project: None,
            module_group: None,
            creator: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 服务模块创建/更新表单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceForm {
    pub name: String,
    pub code: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub module_group: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ServiceForm {
    /// 规范化并校验表单：名称去除空格，编码以字母开头且只含字母/数字/下划线
    pub fn normalized(mut self) -> OperationsResult<Self> {
        self.name = self.name.replace(' ', "");
        if self.name.is_empty() {
            return Err(OperationsError::validation("服务模块名称不能为空"));
        }
        if self.name.chars().count() > SERVICE_NAME_MAX_LEN {
            return Err(OperationsError::validation(format!(
                "服务模块名称长度不能超过{SERVICE_NAME_MAX_LEN}"
            )));
        }

        self.code = self.code.trim().to_string();
        if self.code.is_empty() {
            return Err(OperationsError::validation("服务模块编码不能为空"));
        }
        if self.code.len() > SERVICE_CODE_MAX_LEN {
            return Err(OperationsError::validation(format!(
                "服务模块编码长度不能超过{SERVICE_CODE_MAX_LEN}"
            )));
        }
        let mut chars = self.code.chars();
        let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(OperationsError::validation(
                "服务模块编码必须以字母开头，且仅包含字母/数字/下划线",
            ));
        }

        self.description = non_blank(self.description);
        self.project = non_blank(self.project);
        self.module_group = non_blank(self.module_group);
        Ok(self)
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 服务模块过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub name: Option<String>,
    pub code: Option<String>,
    pub enabled: Option<bool>,
    pub project: Option<String>,
    pub module_group: Option<String>,
}

impl ServiceFilter {
    pub fn matches(&self, service: &Service) -> bool {
        self.name
            .as_deref()
            .map_or(true, |name| service.name.contains(name))
            && self.code.as_deref().map_or(true, |code| service.code == code)
            && self.enabled.map_or(true, |enabled| service.enabled == enabled)
            && self
                .project
                .as_deref()
                .map_or(true, |p| service.project.as_deref() == Some(p))
            && self
                .module_group
                .as_deref()
                .map_or(true, |g| service.module_group.as_deref() == Some(g))
    }
}

/// 带节点列表的服务模块，服务树与详情接口使用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceWithNodes {
    #[serde(flatten)]
    pub service: Service,
    pub nodes: Vec<Node>,
}
