use axum::extract::State;
use serde_json::{json, Value};

use crate::{response::ApiResponse, routes::AppState};

pub async fn health_check(State(state): State<AppState>) -> ApiResponse<Value> {
    ApiResponse::success(json!({
        "status": "ok",
        "service": "operations",
        "version": env!("CARGO_PKG_VERSION"),
        "executor": state.dispatcher.backend_name(),
    }))
}
