use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use operations_core::models::{
    Node, Page, PageRequest, Service, ServiceFilter, ServiceForm, ServiceWithNodes,
};
use serde::Deserialize;

use super::{non_blank, DeleteResult, IdsRequest};
use crate::{
    error::ApiResult,
    response::{created, success, ApiResponse},
    routes::AppState,
};

/// 服务模块查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ServiceQueryParams {
    pub name: Option<String>,
    pub code: Option<String>,
    pub enabled: Option<bool>,
    pub project: Option<String>,
    pub module_group: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ServiceQueryParams {
    fn filter(&self) -> ServiceFilter {
        ServiceFilter {
            name: non_blank(&self.name),
            code: non_blank(&self.code),
            enabled: self.enabled,
            project: non_blank(&self.project),
            module_group: non_blank(&self.module_group),
        }
    }
}

/// 分页查询服务模块
pub async fn list_services(
    State(state): State<AppState>,
    params: Result<Query<ServiceQueryParams>, QueryRejection>,
) -> ApiResult<ApiResponse<Page<Service>>> {
    let Query(params) = params?;
    let page = PageRequest::new(params.page, params.page_size);
    let result = state
        .entity_store
        .list_services(&params.filter(), page)
        .await?;
    Ok(success(result))
}

/// 服务树：每个服务模块及其挂载的节点
pub async fn service_tree(
    State(state): State<AppState>,
    params: Result<Query<ServiceQueryParams>, QueryRejection>,
) -> ApiResult<ApiResponse<Vec<ServiceWithNodes>>> {
    let Query(params) = params?;
    let tree = state.entity_store.service_tree(&params.filter()).await?;
    Ok(success(tree))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<ServiceWithNodes>> {
    let detail = state.entity_store.service_detail(id).await?;
    Ok(success(detail))
}

pub async fn create_service(
    State(state): State<AppState>,
    payload: Result<Json<ServiceForm>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(form) = payload?;
    let service = state.entity_store.create_service(form).await?;
    Ok(created(service))
}

pub async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<ServiceForm>, JsonRejection>,
) -> ApiResult<ApiResponse<Service>> {
    let Json(form) = payload?;
    let service = state.entity_store.update_service(id, form).await?;
    Ok(success(service))
}

pub async fn delete_services(
    State(state): State<AppState>,
    payload: Result<Json<IdsRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<DeleteResult>> {
    let Json(request) = payload?;
    let deleted = state.entity_store.delete_services(&request.ids).await?;
    Ok(ApiResponse::success_with_message(
        DeleteResult { deleted },
        format!("已删除 {deleted} 个服务模块"),
    ))
}

/// 解除节点与服务模块的关联，返回更新后的节点
pub async fn detach_node(
    State(state): State<AppState>,
    Path((service_id, node_id)): Path<(i64, i64)>,
) -> ApiResult<ApiResponse<Node>> {
    let node = state.entity_store.detach_node(service_id, node_id).await?;
    Ok(success(node))
}
