//! 请求传输层
//!
//! 客户端只依赖 [`Transport`]，任何能把 [`ApiRequest`] 变成响应信封的实现都可以替换，
//! 测试中使用内存实现，生产使用 [`ReqwestTransport`]。

use std::time::Duration;

use async_trait::async_trait;
use operations_core::errors::{OperationsError, OperationsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 一次接口调用
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// 以 `/` 开头的路径，不含服务地址
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// 值为空时不附加参数
    pub fn query_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }
}

/// 响应信封 `{code, message, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub success: bool,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            message: "操作成功".to_string(),
            data: Some(data),
            success: true,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            success: false,
        }
    }

    /// 以 `code` 判断结果，非 0 时转为远端错误
    pub fn into_result(self) -> OperationsResult<Option<T>> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            Err(OperationsError::Remote {
                code: self.code,
                message: self.message,
            })
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> OperationsResult<Envelope<Value>>;
}

/// 基于 reqwest 的传输实现
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> OperationsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OperationsError::config_error(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn request(&self, request: ApiRequest) -> OperationsResult<Envelope<Value>> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("发送请求: {:?} {}", request.method, url);

        let builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        let builder = builder.query(&request.query);
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            warn!("请求失败: {} - {}", url, e);
            OperationsError::Network(format!("请求 {url} 失败: {e}"))
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OperationsError::Network(format!("读取响应失败: {e}")))?;

        // 错误响应同样带信封，优先按信封解析
        match serde_json::from_str::<Envelope<Value>>(&text) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(OperationsError::Network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text
            ))),
            Err(e) => Err(OperationsError::Serialization(format!(
                "响应不是有效的信封格式: {e}"
            ))),
        }
    }
}
