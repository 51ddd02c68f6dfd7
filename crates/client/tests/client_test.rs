use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use operations_client::{ApiRequest, Envelope, HttpMethod, OperationsClient, Transport};
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{
    OperatorMeta, PageRequest, ServiceFilter, TaskFilter, TaskStatus, TaskTransition,
};
use serde_json::{json, Value};

/// 按顺序返回预置响应并记录请求
#[derive(Clone, Default)]
struct FakeTransport {
    requests: Arc<Mutex<Vec<ApiRequest>>>,
    responses: Arc<Mutex<VecDeque<OperationsResult<Envelope<Value>>>>>,
}

impl FakeTransport {
    fn respond(&self, response: OperationsResult<Envelope<Value>>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn last_request(&self) -> ApiRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn request(&self, request: ApiRequest) -> OperationsResult<Envelope<Value>> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Envelope::ok(Value::Null)))
    }
}

fn client() -> (OperationsClient<FakeTransport>, FakeTransport) {
    let transport = FakeTransport::default();
    (OperationsClient::new(transport.clone()), transport)
}

#[tokio::test]
async fn test_deploy_builds_execute_request() {
    let (client, transport) = client();
    transport.respond(Ok(Envelope::ok(json!({
        "message": "部署任务已创建，共2个",
        "task_ids": [1, 2],
        "task_count": 2,
        "tasks": [
            {"task_id": 1, "service_id": 1, "node_id": 10, "task_status": "pending", "error_message": null},
            {"task_id": 2, "service_id": 1, "node_id": 11, "task_status": "failed", "error_message": "不可达"}
        ]
    }))));

    let result = client
        .deploy(vec![OperatorMeta::new(1, vec![10, 11])])
        .await
        .unwrap();

    assert_eq!(result.task_ids, vec![1, 2]);
    assert_eq!(result.tasks[1].task_status, TaskStatus::Failed);

    let request = transport.last_request();
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.path, "/api/operations/execute");
    let body = request.body.unwrap();
    assert_eq!(body["operator_type"], "deploy");
    assert_eq!(body["operator_metas"][0]["node_ids"], json!([10, 11]));
}

#[tokio::test]
async fn test_non_zero_code_is_remote_error() {
    let (client, transport) = client();
    transport.respond(Ok(Envelope::error(10001, "节点 99 不属于服务模块 1")));

    let err = client
        .restart(vec![OperatorMeta::new(1, vec![99])])
        .await
        .unwrap_err();

    match err {
        OperationsError::Remote { code, message } => {
            assert_eq!(code, 10001);
            assert!(message.contains("99"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_code_wins_over_payload() {
    let (client, transport) = client();
    // 信封带有数据但 code 非 0，仍视为失败
    transport.respond(Ok(Envelope {
        code: 10003,
        message: "任务尚未结束".to_string(),
        data: Some(json!({"deleted": 0})),
        success: false,
    }));

    let err = client.delete_tasks(&[1]).await.unwrap_err();
    assert_eq!(err.code(), 10003);
}

#[tokio::test]
async fn test_transport_errors_propagate() {
    let (client, transport) = client();
    transport.respond(Err(OperationsError::Network("连接被拒绝".to_string())));

    let err = client.health().await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_list_queries() {
    let (client, transport) = client();
    transport.respond(Ok(Envelope::ok(json!({
        "items": [], "total": 0, "page": 2, "page_size": 20, "total_pages": 0
    }))));

    let filter = ServiceFilter {
        name: Some("订单".to_string()),
        enabled: Some(true),
        ..Default::default()
    };
    let page = client
        .list_services(&filter, PageRequest::new(Some(2), Some(20)))
        .await
        .unwrap();
    assert_eq!(page.page, 2);

    let request = transport.last_request();
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.path, "/api/operations/service/page");
    assert!(request.query.contains(&("name".to_string(), "订单".to_string())));
    assert!(request.query.contains(&("enabled".to_string(), "true".to_string())));
    assert!(request.query.contains(&("page_size".to_string(), "20".to_string())));
    assert!(!request.query.iter().any(|(k, _)| k == "code"));

    transport.respond(Ok(Envelope::ok(json!({
        "items": [], "total": 0, "page": 1, "page_size": 10, "total_pages": 0
    }))));
    let filter = TaskFilter {
        task_status: Some(TaskStatus::Running),
        created_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        ..Default::default()
    };
    client
        .list_tasks(&filter, PageRequest::default())
        .await
        .unwrap();
    let request = transport.last_request();
    assert!(request
        .query
        .contains(&("task_status".to_string(), "running".to_string())));
    assert!(request
        .query
        .iter()
        .any(|(k, v)| k == "created_from" && v.starts_with("2024-01-01T00:00:00")));
}

#[tokio::test]
async fn test_report_and_log() {
    let (client, transport) = client();
    transport.respond(Ok(Envelope::ok(json!({
        "applied": false, "task_status": "running", "progress": 10
    }))));
    let ack = client
        .report_task(5, &TaskTransition::running(5))
        .await
        .unwrap();
    assert!(!ack.applied);
    assert_eq!(ack.progress, 10);
    assert_eq!(transport.last_request().path, "/api/operations/task/5/report");

    transport.respond(Ok(Envelope::ok(json!("[2024-01-01 00:00:00] 任务创建成功\n"))));
    let log = client.get_task_log(5).await.unwrap();
    assert!(log.contains("任务创建成功"));
}
