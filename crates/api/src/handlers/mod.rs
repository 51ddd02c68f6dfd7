pub mod execute;
pub mod health;
pub mod metrics;
pub mod nodes;
pub mod services;
pub mod tasks;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// 批量删除请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

/// 批量删除结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted: u64,
}

/// 查询参数中的空字符串视为未设置
pub(crate) fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
