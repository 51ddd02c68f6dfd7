use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use operations_core::errors::OperationsError;
use tracing::{error, warn};

use crate::response::ApiResponse;

/// 请求格式错误使用的业务错误码，与数据验证失败一致
const BAD_REQUEST_CODE: i32 = 10001;
const NOT_FOUND_CODE: i32 = 10002;
const TIMEOUT_CODE: i32 = 10006;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Operations(#[from] OperationsError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("请求的资源不存在")]
    NotFound,

    #[error("请求处理超时")]
    Timeout,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Operations(err) => match err {
                OperationsError::Validation(_) => StatusCode::BAD_REQUEST,
                e if e.is_not_found() => StatusCode::NOT_FOUND,
                e if e.is_conflict() => StatusCode::CONFLICT,
                OperationsError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ApiError::Operations(err) => err.code(),
            ApiError::BadRequest(_) => BAD_REQUEST_CODE,
            ApiError::NotFound => NOT_FOUND_CODE,
            ApiError::Timeout => TIMEOUT_CODE,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 内部错误不把底层细节暴露给调用方
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("请求处理失败: {}", self);
            match &self {
                ApiError::Operations(err) => err.user_message().to_string(),
                other => other.to_string(),
            }
        } else {
            warn!("请求被拒绝({}): {}", status.as_u16(), self);
            self.to_string()
        };

        (status, ApiResponse::failure(self.code(), message)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use operations_core::models::TaskStatus;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (OperationsError::validation("x"), StatusCode::BAD_REQUEST),
            (OperationsError::TaskNotFound { id: 1 }, StatusCode::NOT_FOUND),
            (
                OperationsError::LogNotFound("已清理".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (OperationsError::conflict("x"), StatusCode::CONFLICT),
            (
                OperationsError::InvalidTransition {
                    task_id: 1,
                    from: TaskStatus::Failed,
                    to: TaskStatus::Running,
                },
                StatusCode::CONFLICT,
            ),
            (
                OperationsError::backend_unavailable("x"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (OperationsError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_codes_are_never_zero() {
        let errors = vec![
            ApiError::from(OperationsError::validation("x")),
            ApiError::from(OperationsError::NodeNotFound { id: 1 }),
            ApiError::BadRequest("x".to_string()),
            ApiError::NotFound,
            ApiError::Timeout,
        ];
        for err in errors {
            assert_ne!(err.code(), 0);
        }
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::from(OperationsError::ServiceNotFound { id: 9 }).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
