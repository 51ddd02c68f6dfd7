//! # Operations API
//!
//! 运维编排的 HTTP 接口，基于 Axum 构建，是任务台账、服务模块/节点存储和
//! 操作派发器之上的一层薄适配。
//!
//! ## API 端点
//!
//! 以下路径均位于 `/api/operations` 之下。
//!
//! ### 服务模块
//! - `GET /service/page` - 分页查询
//! - `GET /service/tree` - 服务树（含节点）
//! - `GET /service/{id}` - 详情（含节点）
//! - `POST /service` - 创建
//! - `POST /service/{id}/update` - 更新，编码不可修改
//! - `POST /service/delete` - 批量删除 `{"ids": [..]}`
//! - `POST /service/{service_id}/node/{node_id}/detach` - 解除节点关联
//!
//! ### 节点
//! - `GET /node/page`、`GET /node/{id}`、`POST /node`、`POST /node/{id}/update`、`POST /node/delete`
//!
//! ### 执行与任务
//! - `POST /execute` - 执行部署/重启
//! - `GET /task/page`、`GET /task/recent`、`GET /task/{id}`、`GET /task/{id}/log`
//! - `POST /task/delete` - 批量删除已结束的任务
//! - `POST /task/{id}/report` - 执行端回报状态
//!
//! 另有 `GET /health` 和 Prometheus 指标端点（默认 `/metrics`）。
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "code": 0,
//!   "message": "操作成功",
//!   "data": { "id": 1 },
//!   "success": true,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 失败时 `code` 非 0、`data` 为 null，`message` 为可读的失败原因。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::{extract::DefaultBodyLimit, Router};
use operations_core::config::ApiConfig;

use middleware::{cors_layer, request_logging, request_timeout, trace_layer};
pub use routes::{create_routes, AppState, API_PREFIX};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig, metrics_endpoint: &str) -> Router {
    let timeout = Duration::from_secs(api_config.request_timeout_seconds.max(1));
    let body_limit = api_config.max_request_size_mb * 1024 * 1024;

    let mut app = create_routes(state, metrics_endpoint)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn_with_state(timeout, request_timeout))
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer());

    if api_config.cors_enabled {
        app = app.layer(cors_layer(&api_config.cors_origins));
    }
    app
}
