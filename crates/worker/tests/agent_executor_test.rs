mod common;

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::Harness;
use operations_core::config::AgentExecutorConfig;
use operations_core::errors::OperationsError;
use operations_core::models::{OperatorType, TaskStatus, TaskTransition};
use operations_core::traits::{ExecutionBackend, TaskReporter};
use operations_worker::AgentExecutor;
use serde_json::Value;
use tokio::net::TcpListener;

type Received = Arc<Mutex<Vec<Value>>>;

async fn spawn_agent(status: StatusCode) -> (String, Received) {
    let received: Received = Arc::default();
    let app = Router::new()
        .route(
            "/tasks",
            post(
                move |State(received): State<Received>, Json(body): Json<Value>| async move {
                    received.lock().unwrap().push(body);
                    status
                },
            ),
        )
        .with_state(received.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/tasks"), received)
}

fn config(url: String) -> AgentExecutorConfig {
    AgentExecutorConfig {
        url: Some(url),
        request_timeout_seconds: 5,
        report_base_url: Some("http://ops.local:8080/".to_string()),
    }
}

#[tokio::test]
async fn test_submit_posts_request_with_report_url() {
    let harness = Harness::new();
    let (url, received) = spawn_agent(StatusCode::OK).await;
    let executor = AgentExecutor::new(&config(url)).unwrap();
    let request = harness.pending(OperatorType::Restart).await;
    let task_id = request.task_id;

    executor.submit(request, harness.reporter()).await.unwrap();

    let bodies = received.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["task_id"], task_id);
    assert_eq!(bodies[0]["operator_type"], "restart");
    assert_eq!(bodies[0]["service_code"], "order");
    assert_eq!(bodies[0]["port"], 8022);
    assert_eq!(
        bodies[0]["report_url"],
        format!("http://ops.local:8080/api/operations/task/{task_id}/report")
    );

    let task = harness.repo.stored_task(task_id).unwrap();
    assert_eq!(task.task_status, TaskStatus::Pending);
    assert!(harness
        .log_lines(&task)
        .iter()
        .any(|line| line.starts_with("投递任务到Agent")));
}

#[tokio::test]
async fn test_agent_reporting_before_response_keeps_delivery_note() {
    let harness = Harness::new();
    let request = harness.pending(OperatorType::Deploy).await;
    let task_id = request.task_id;

    // Agent 在应答前就回报开始执行
    let reporter = harness.reporter();
    let app = Router::new().route(
        "/tasks",
        post(move |Json(_body): Json<Value>| {
            let reporter = reporter.clone();
            async move {
                reporter
                    .report(task_id, TaskTransition::running(5).with_log("agent开始执行"))
                    .await
                    .unwrap();
                StatusCode::OK
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let executor = AgentExecutor::new(&config(format!("http://{addr}/tasks"))).unwrap();
    executor.submit(request, harness.reporter()).await.unwrap();

    let task = harness.repo.stored_task(task_id).unwrap();
    assert_eq!(task.task_status, TaskStatus::Running);
    assert_eq!(task.progress, 5);
    let lines = harness.log_lines(&task);
    let note = lines
        .iter()
        .position(|line| line.starts_with("投递任务到Agent"))
        .unwrap();
    let started = lines.iter().position(|line| line == "agent开始执行").unwrap();
    assert!(note < started);
}

#[tokio::test]
async fn test_rejected_submission_is_backend_unavailable() {
    let harness = Harness::new();
    let (url, _received) = spawn_agent(StatusCode::SERVICE_UNAVAILABLE).await;
    let executor = AgentExecutor::new(&config(url)).unwrap();
    let request = harness.pending(OperatorType::Deploy).await;

    let err = executor
        .submit(request, harness.reporter())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::BackendUnavailable(_)));
}

#[tokio::test]
async fn test_unreachable_agent_is_backend_unavailable() {
    let harness = Harness::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let executor = AgentExecutor::new(&config(format!("http://{addr}/tasks"))).unwrap();
    let request = harness.pending(OperatorType::Deploy).await;

    let err = executor
        .submit(request, harness.reporter())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::BackendUnavailable(_)));
}

#[test]
fn test_missing_url_is_configuration_error() {
    let err = AgentExecutor::new(&AgentExecutorConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, OperationsError::Configuration(_)));
}
