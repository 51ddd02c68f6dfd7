mod common;

use common::Harness;
use operations_core::config::ShellExecutorConfig;
use operations_core::errors::OperationsError;
use operations_core::models::{OperatorType, TaskStatus};
use operations_core::traits::ExecutionBackend;
use operations_worker::ShellExecutor;

fn executor(deploy: &str, timeout_seconds: u64) -> ShellExecutor {
    ShellExecutor::new(ShellExecutorConfig {
        deploy_command: Some(deploy.to_string()),
        restart_command: None,
        working_dir: None,
        timeout_seconds,
        max_concurrent: 2,
    })
}

#[tokio::test]
async fn test_command_output_and_progress() {
    let harness = Harness::new();
    let executor = executor(
        "echo \"deploy $OPERATIONS_SERVICE_CODE to $OPERATIONS_NODE_IP:$OPERATIONS_NODE_PORT\"; \
         echo PROGRESS 40; echo warn >&2; echo PROGRESS 20; echo PROGRESS 70",
        30,
    );
    let request = harness.pending(OperatorType::Deploy).await;
    let task_id = request.task_id;

    executor.submit(request, harness.reporter()).await.unwrap();
    let task = harness.wait_terminal(task_id).await;

    assert_eq!(task.task_status, TaskStatus::Succeeded);
    assert_eq!(task.progress, 100);

    let lines = harness.log_lines(&task);
    assert!(lines.contains(&"deploy order to 10.0.0.1:8022".to_string()));
    assert!(lines.contains(&"[stderr] warn".to_string()));
    assert!(lines.contains(&"PROGRESS 70".to_string()));
    // 回退的进度行被拒绝，不写日志
    assert!(!lines.contains(&"PROGRESS 20".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("任务执行成功"));
}

#[tokio::test]
async fn test_non_zero_exit_fails_task() {
    let harness = Harness::new();
    let executor = executor("echo boom; exit 3", 30);
    let request = harness.pending(OperatorType::Deploy).await;
    let task_id = request.task_id;

    executor.submit(request, harness.reporter()).await.unwrap();
    let task = harness.wait_terminal(task_id).await;

    assert_eq!(task.task_status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("命令执行失败，退出码: 3")
    );
}

#[tokio::test]
async fn test_timeout_fails_task() {
    let harness = Harness::new();
    let executor = executor("sleep 5", 1);
    let request = harness.pending(OperatorType::Deploy).await;
    let task_id = request.task_id;

    executor.submit(request, harness.reporter()).await.unwrap();
    let task = harness.wait_terminal(task_id).await;

    assert_eq!(task.task_status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("执行超时(1秒)"));
}

#[tokio::test]
async fn test_missing_command_is_backend_unavailable() {
    let harness = Harness::new();
    let executor = executor("true", 30);
    let request = harness.pending(OperatorType::Restart).await;

    let err = executor
        .submit(request, harness.reporter())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::BackendUnavailable(_)));
    assert_eq!(executor.active_count(), 0);
}
