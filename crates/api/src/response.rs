use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

pub const SUCCESS_CODE: i32 = 0;
const SUCCESS_MESSAGE: &str = "操作成功";

/// 统一响应信封
///
/// `code == 0` 当且仅当请求成功，调用方应以 `code` 判断结果而不是只看 HTTP 状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
    pub success: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self::success_with_message(data, SUCCESS_MESSAGE.to_string())
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            code: SUCCESS_CODE,
            message,
            data: Some(data),
            success: true,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn success_empty_with_message(message: String) -> Self {
        Self {
            code: SUCCESS_CODE,
            message,
            data: None,
            success: true,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn failure(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
            success: false,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> ApiResponse<T> {
    ApiResponse::success(data)
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, ApiResponse::success(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test_data");

        assert!(response.success);
        assert_eq!(response.code, SUCCESS_CODE);
        assert_eq!(response.data, Some("test_data"));
        assert_eq!(response.message, "操作成功");
        assert!(response.timestamp <= Utc::now());
    }

    #[test]
    fn test_api_response_failure() {
        let response = ApiResponse::failure(10001, "节点IP地址不能为空".to_string());

        assert!(!response.success);
        assert_eq!(response.code, 10001);
        assert!(response.data.is_none());
    }

    #[test]
    fn test_envelope_serialization() {
        let response = ApiResponse::success_with_message(vec![1, 2], "已删除".to_string());
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["code"], 0);
        assert_eq!(value["message"], "已删除");
        assert_eq!(value["data"], serde_json::json!([1, 2]));
        assert_eq!(value["success"], true);
        assert!(value["timestamp"].is_string());
    }
}
