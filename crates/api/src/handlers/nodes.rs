use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use operations_core::models::{Node, NodeFilter, NodeForm, Page, PageRequest};
use serde::Deserialize;

use super::{non_blank, DeleteResult, IdsRequest};
use crate::{
    error::ApiResult,
    response::{created, success, ApiResponse},
    routes::AppState,
};

/// 节点查询参数
#[derive(Debug, Default, Deserialize)]
pub struct NodeQueryParams {
    pub ip: Option<String>,
    pub service_id: Option<i64>,
    pub enabled: Option<bool>,
    pub project: Option<String>,
    pub idc: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_nodes(
    State(state): State<AppState>,
    params: Result<Query<NodeQueryParams>, QueryRejection>,
) -> ApiResult<ApiResponse<Page<Node>>> {
    let Query(params) = params?;
    let filter = NodeFilter {
        ip: non_blank(&params.ip),
        service_id: params.service_id,
        enabled: params.enabled,
        project: non_blank(&params.project),
        idc: non_blank(&params.idc),
    };
    let page = PageRequest::new(params.page, params.page_size);
    Ok(success(state.entity_store.list_nodes(&filter, page).await?))
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<Node>> {
    Ok(success(state.entity_store.get_node(id).await?))
}

pub async fn create_node(
    State(state): State<AppState>,
    payload: Result<Json<NodeForm>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(form) = payload?;
    let node = state.entity_store.create_node(form).await?;
    Ok(created(node))
}

pub async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<NodeForm>, JsonRejection>,
) -> ApiResult<ApiResponse<Node>> {
    let Json(form) = payload?;
    Ok(success(state.entity_store.update_node(id, form).await?))
}

pub async fn delete_nodes(
    State(state): State<AppState>,
    payload: Result<Json<IdsRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<DeleteResult>> {
    let Json(request) = payload?;
    let deleted = state.entity_store.delete_nodes(&request.ids).await?;
    Ok(ApiResponse::success_with_message(
        DeleteResult { deleted },
        format!("已删除 {deleted} 个节点"),
    ))
}
