use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OperationsError, OperationsResult};
use crate::models::service::non_blank;

pub const DEFAULT_NODE_PORT: u16 = 22;

/// 节点
///
/// 可寻址的运行实例 (ip:port)，可以同时挂载到多个服务模块下。
/// `(ip, port)` 在整个存储中唯一，派发时据此保证同一目标只执行一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub ip: String,
    pub port: u16,
    pub enabled: bool,
    pub description: Option<String>,
    pub project: Option<String>,
    pub idc: Option<String>,
    pub tags: Option<String>,
    /// 所属服务模块，单服务模块的旧模型是只有一个元素的特例
    pub service_ids: Vec<i64>,
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(ip: String, port: u16, service_ids: Vec<i64>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            ip,
            port,
            enabled: true,
            description: None,
            project: None,
            idc: None,
            tags: None,
            service_ids,
            creator: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn belongs_to(&self, service_id: i64) -> bool {
        self.service_ids.contains(&service_id)
    }
}

/// 节点创建/更新表单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeForm {
    pub service_ids: Vec<i64>,
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub idc: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl NodeForm {
    pub fn normalized(mut self) -> OperationsResult<Self> {
        self.ip = self.ip.trim().to_string();
        if self.ip.is_empty() {
            return Err(OperationsError::validation("节点IP地址不能为空"));
        }
        if self.ip.parse::<Ipv4Addr>().is_err() {
            return Err(OperationsError::validation(format!(
                "IP地址格式不正确: {}",
                self.ip
            )));
        }

        let port = self.port.unwrap_or(DEFAULT_NODE_PORT);
        if port == 0 {
            return Err(OperationsError::validation("端口号必须在1-65535范围内"));
        }
        self.port = Some(port);

        if self.service_ids.is_empty() {
            return Err(OperationsError::validation("节点必须至少属于一个服务模块"));
        }
        if let Some(id) = self.service_ids.iter().find(|id| **id <= 0) {
            return Err(OperationsError::validation(format!("服务模块ID无效: {id}")));
        }
        let mut seen = std::collections::HashSet::new();
        self.service_ids.retain(|id| seen.insert(*id));

        self.description = non_blank(self.description);
        self.project = non_blank(self.project);
        self.idc = non_blank(self.idc);
        self.tags = non_blank(self.tags);
        Ok(self)
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_NODE_PORT)
    }
}

/// 节点过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeFilter {
    pub ip: Option<String>,
    pub service_id: Option<i64>,
    pub enabled: Option<bool>,
    pub project: Option<String>,
    pub idc: Option<String>,
}

impl NodeFilter {
    pub fn matches(&self, node: &Node) -> bool {
        self.ip.as_deref().map_or(true, |ip| node.ip.contains(ip))
            && self.service_id.map_or(true, |id| node.belongs_to(id))
            && self.enabled.map_or(true, |enabled| node.enabled == enabled)
            && self
                .project
                .as_deref()
                .map_or(true, |p| node.project.as_deref() == Some(p))
            && self
                .idc
                .as_deref()
                .map_or(true, |idc| node.idc.as_deref() == Some(idc))
    }
}
