use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use operations_core::models::{DispatchResult, ExecuteRequest};

use crate::{error::ApiResult, response::ApiResponse, routes::AppState};

/// 执行部署/重启
///
/// 提交失败的目标不会让请求失败，结果中对应任务的状态为 failed 并带有原因。
pub async fn execute_task(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<DispatchResult>> {
    let Json(request) = payload?;
    let result = state.dispatcher.execute(request).await?;
    let message = result.message.clone();
    Ok(ApiResponse::success_with_message(result, message))
}
