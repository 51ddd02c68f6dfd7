use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use operations_core::models::{
    OperatorType, Page, PageRequest, Task, TaskDetail, TaskFilter, TaskStatus, TaskTransition,
    TransitionOutcome,
};
use serde::{Deserialize, Serialize};

use super::{non_blank, DeleteResult, IdsRequest};
use crate::{
    error::ApiResult,
    response::{success, ApiResponse},
    routes::AppState,
};

/// 任务查询参数
#[derive(Debug, Default, Deserialize)]
pub struct TaskQueryParams {
    pub operator_type: Option<OperatorType>,
    pub task_status: Option<TaskStatus>,
    pub service_id: Option<i64>,
    pub node_id: Option<i64>,
    pub project: Option<String>,
    pub idc: Option<String>,
    pub module_group: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQueryParams {
    pub limit: Option<i64>,
}

/// 状态上报结果，进度回退时 `applied` 为 false
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResult {
    pub applied: bool,
    pub task_status: TaskStatus,
    pub progress: u8,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    params: Result<Query<TaskQueryParams>, QueryRejection>,
) -> ApiResult<ApiResponse<Page<Task>>> {
    let Query(params) = params?;
    let filter = TaskFilter {
        operator_type: params.operator_type,
        task_status: params.task_status,
        service_id: params.service_id,
        node_id: params.node_id,
        project: non_blank(&params.project),
        idc: non_blank(&params.idc),
        module_group: non_blank(&params.module_group),
        created_from: params.created_from,
        created_to: params.created_to,
    };
    let page = PageRequest::new(params.page, params.page_size);
    Ok(success(state.ledger.list_tasks(&filter, page).await?))
}

pub async fn recent_tasks(
    State(state): State<AppState>,
    params: Result<Query<RecentQueryParams>, QueryRejection>,
) -> ApiResult<ApiResponse<Vec<Task>>> {
    let Query(params) = params?;
    Ok(success(state.ledger.recent_tasks(params.limit).await?))
}

/// 任务详情，包含服务模块、节点和日志大小
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<TaskDetail>> {
    Ok(success(state.ledger.task_detail(id).await?))
}

pub async fn get_task_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ApiResponse<String>> {
    Ok(success(state.ledger.read_log(id).await?))
}

pub async fn delete_tasks(
    State(state): State<AppState>,
    payload: Result<Json<IdsRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<DeleteResult>> {
    let Json(request) = payload?;
    let deleted = state.ledger.delete_tasks(&request.ids).await?;
    Ok(ApiResponse::success_with_message(
        DeleteResult { deleted },
        format!("已删除 {deleted} 个任务"),
    ))
}

/// 执行端回报状态、进度和日志
pub async fn report_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<TaskTransition>, JsonRejection>,
) -> ApiResult<ApiResponse<ReportResult>> {
    let Json(transition) = payload?;
    let outcome = state.ledger.transition(id, transition).await?;

    let applied = outcome.is_applied();
    let task = outcome.task();
    let result = ReportResult {
        applied,
        task_status: task.task_status,
        progress: task.progress,
    };
    let message = match outcome {
        TransitionOutcome::Applied(_) => "上报成功".to_string(),
        TransitionOutcome::ProgressRegressed { attempted, .. } => {
            format!("进度回退({attempted})，上报已忽略")
        }
    };
    Ok(ApiResponse::success_with_message(result, message))
}
