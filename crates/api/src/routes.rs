use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use operations_dispatcher::OperatorDispatcher;
use operations_domain::{EntityStore, TaskLedger};
use std::sync::Arc;

use crate::handlers::{
    execute::execute_task,
    health::health_check,
    metrics::render_metrics,
    nodes::{create_node, delete_nodes, get_node, list_nodes, update_node},
    not_found,
    services::{
        create_service, delete_services, detach_node, get_service, list_services,
        service_tree, update_service,
    },
    tasks::{delete_tasks, get_task, get_task_log, list_tasks, recent_tasks, report_task},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub entity_store: Arc<EntityStore>,
    pub ledger: Arc<TaskLedger>,
    pub dispatcher: Arc<OperatorDispatcher>,
    /// 未启用指标导出时为空
    pub metrics: Option<PrometheusHandle>,
}

pub const API_PREFIX: &str = "/api/operations";

/// 创建API路由
pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    let operations = Router::new()
        // 服务模块
        .route("/service", post(create_service))
        .route("/service/page", get(list_services))
        .route("/service/tree", get(service_tree))
        .route("/service/delete", post(delete_services))
        .route("/service/{id}", get(get_service))
        .route("/service/{id}/update", post(update_service))
        .route(
            "/service/{service_id}/node/{node_id}/detach",
            post(detach_node),
        )
        // 节点
        .route("/node", post(create_node))
        .route("/node/page", get(list_nodes))
        .route("/node/delete", post(delete_nodes))
        .route("/node/{id}", get(get_node))
        .route("/node/{id}/update", post(update_node))
        // 执行
        .route("/execute", post(execute_task))
        // 任务
        .route("/task/page", get(list_tasks))
        .route("/task/recent", get(recent_tasks))
        .route("/task/delete", post(delete_tasks))
        .route("/task/{id}", get(get_task))
        .route("/task/{id}/log", get(get_task_log))
        .route("/task/{id}/report", post(report_task));

    Router::new()
        .route("/health", get(health_check))
        .route(metrics_endpoint, get(render_metrics))
        .nest(API_PREFIX, operations)
        .fallback(not_found)
        .with_state(state)
}
