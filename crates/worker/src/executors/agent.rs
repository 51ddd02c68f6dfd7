use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use operations_core::config::AgentExecutorConfig;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{TaskStatus, TaskTransition};
use operations_core::traits::{ExecutionBackend, ExecutionRequest, TaskReporter};
use serde::Serialize;
use tracing::{info, warn};

/// 发给 Agent 的任务
#[derive(Debug, Serialize)]
struct AgentDispatch<'a> {
    #[serde(flatten)]
    request: &'a ExecutionRequest,
    /// Agent 回报状态的地址
    #[serde(skip_serializing_if = "Option::is_none")]
    report_url: Option<String>,
}

/// 远端 Agent 执行器
///
/// 只负责把任务投递给 Agent，之后的状态由 Agent 调用上报接口回报。
pub struct AgentExecutor {
    client: reqwest::Client,
    url: String,
    report_base_url: Option<String>,
}

impl AgentExecutor {
    pub fn new(config: &AgentExecutorConfig) -> OperationsResult<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| OperationsError::config_error("未配置Agent地址"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()
            .map_err(|e| OperationsError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            url,
            report_base_url: config
                .report_base_url
                .as_ref()
                .map(|base| base.trim_end_matches('/').to_string()),
        })
    }

    fn report_url(&self, task_id: i64) -> Option<String> {
        self.report_base_url
            .as_ref()
            .map(|base| format!("{base}/api/operations/task/{task_id}/report"))
    }
}

#[async_trait]
impl ExecutionBackend for AgentExecutor {
    fn name(&self) -> &str {
        "agent"
    }

    async fn submit(
        &self,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) -> OperationsResult<()> {
        // Agent 收到任务后可能立刻回报，投递日志必须在请求发出前写入
        let note = TaskTransition::to(TaskStatus::Pending)
            .with_log(format!("投递任务到Agent: {}", self.url));
        if let Err(e) = reporter.report(request.task_id, note).await {
            warn!("任务 {} 写入投递日志失败: {}", request.task_id, e);
        }

        let body = AgentDispatch {
            request: &request,
            report_url: self.report_url(request.task_id),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                counter!("operations_backend_submit_failures_total", "backend" => "agent")
                    .increment(1);
                OperationsError::backend_unavailable(format!("Agent不可达: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            counter!("operations_backend_submit_failures_total", "backend" => "agent").increment(1);
            return Err(OperationsError::backend_unavailable(format!(
                "Agent拒绝任务: HTTP {status} {text}"
            )));
        }

        info!(
            "任务 {} 已投递到Agent: {} ({}:{})",
            request.task_id, self.url, request.ip, request.port
        );
        counter!("operations_backend_submissions_total", "backend" => "agent").increment(1);

        Ok(())
    }
}
