use std::sync::Arc;

use operations_core::errors::OperationsError;
use operations_core::models::{
    OperatorType, TaskFilter, PageRequest, TaskStatus, TaskTransition, TransitionOutcome,
};
use operations_domain::TaskLedger;
use operations_testing_utils::{
    MockRepository, MockTaskLogStore, NodeBuilder, ServiceBuilder, TaskBuilder,
};

fn create_ledger() -> (Arc<TaskLedger>, MockRepository, MockTaskLogStore) {
    let repo = MockRepository::new();
    let logs = MockTaskLogStore::new();
    let ledger = TaskLedger::new(
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(logs.clone()),
    );
    (Arc::new(ledger), repo, logs)
}

async fn create_pending(ledger: &TaskLedger) -> i64 {
    let service = ServiceBuilder::new().build();
    let node = NodeBuilder::new().build();
    let task = TaskBuilder::for_target(OperatorType::Deploy, &service, &node).build();
    ledger.create_tasks(vec![task]).await.unwrap()[0].id
}

#[tokio::test]
async fn test_create_tasks_writes_first_log_line() {
    let (ledger, _repo, logs) = create_ledger();
    let id = create_pending(&ledger).await;

    let task = ledger.get_task(id).await.unwrap();
    assert_eq!(task.task_status, TaskStatus::Pending);
    let log_path = task.log_path.unwrap();
    assert!(log_path.starts_with("deploy_10-0-0-1_"));
    assert_eq!(logs.lines(&log_path), vec!["任务创建成功，等待执行"]);
}

#[tokio::test]
async fn test_target_tasks_recheck_targets() {
    let (ledger, repo, logs) = create_ledger();
    let service = ServiceBuilder::new().with_id(1).build();
    let node = NodeBuilder::new().with_id(10).with_services(vec![1]).build();
    let task = || TaskBuilder::for_target(OperatorType::Restart, &service, &node).build();

    // 服务模块和节点尚未入库
    let err = ledger.create_target_tasks(vec![task()]).await.unwrap_err();
    assert!(matches!(err, OperationsError::Validation(_)));
    assert_eq!(repo.task_count(), 0);

    repo.insert_service(service.clone());
    repo.insert_node(node.clone());
    let created = ledger.create_target_tasks(vec![task()]).await.unwrap();
    assert_eq!(created[0].task_status, TaskStatus::Pending);
    assert_eq!(logs.lines(created[0].log_path.as_deref().unwrap()).len(), 1);

    repo.insert_node(NodeBuilder::new().with_id(10).with_services(vec![1]).disabled().build());
    let err = ledger
        .create_target_tasks(vec![task(), task()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("节点已停用"));
    assert_eq!(repo.task_count(), 1);
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (ledger, _repo, logs) = create_ledger();
    let id = create_pending(&ledger).await;

    let outcome = ledger
        .transition(id, TaskTransition::running(10).with_log("开始执行"))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert!(outcome.task().started_at.is_some());

    ledger
        .transition(id, TaskTransition::running(60))
        .await
        .unwrap();
    let outcome = ledger
        .transition(id, TaskTransition::succeeded().with_log("执行成功"))
        .await
        .unwrap();
    let task = outcome.task();
    assert_eq!(task.task_status, TaskStatus::Succeeded);
    assert_eq!(task.progress, 100);
    assert!(task.completed_at.is_some());

    let content = ledger.read_log(id).await.unwrap();
    assert!(content.contains("开始执行"));
    assert!(content.contains("执行成功"));
    assert_eq!(ledger.log_size(id).await.unwrap(), content.len() as u64);
    assert_eq!(logs.lines(task.log_path.as_deref().unwrap()).len(), 3);
}

#[tokio::test]
async fn test_progress_regression_is_rejected() {
    let (ledger, repo, _logs) = create_ledger();
    let id = create_pending(&ledger).await;

    ledger
        .transition(id, TaskTransition::running(10))
        .await
        .unwrap();
    let outcome = ledger
        .transition(id, TaskTransition::running(5))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        TransitionOutcome::ProgressRegressed { attempted: 5, .. }
    ));
    let stored = repo.stored_task(id).unwrap();
    assert_eq!(stored.progress, 10);
    assert_eq!(stored.task_status, TaskStatus::Running);
}

#[tokio::test]
async fn test_terminal_state_is_final() {
    let (ledger, repo, _logs) = create_ledger();
    let id = create_pending(&ledger).await;
    ledger
        .transition(id, TaskTransition::failed("节点不可达"))
        .await
        .unwrap();

    for next in [
        TaskTransition::running(50),
        TaskTransition::succeeded(),
        TaskTransition::to(TaskStatus::Pending),
        TaskTransition::failed("again"),
    ] {
        let err = ledger.transition(id, next).await.unwrap_err();
        assert!(matches!(
            err,
            OperationsError::InvalidTransition {
                from: TaskStatus::Failed,
                ..
            }
        ));
    }

    let stored = repo.stored_task(id).unwrap();
    assert_eq!(stored.task_status, TaskStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("节点不可达"));
}

#[tokio::test]
async fn test_pending_cannot_jump_to_succeeded() {
    let (ledger, repo, _logs) = create_ledger();
    let id = create_pending(&ledger).await;

    let err = ledger
        .transition(id, TaskTransition::succeeded())
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::InvalidTransition { .. }));
    assert_eq!(repo.stored_task(id).unwrap().task_status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_invalid_progress_and_unknown_task() {
    let (ledger, _repo, _logs) = create_ledger();
    let id = create_pending(&ledger).await;

    let err = ledger
        .transition(id, TaskTransition::running(101))
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::Validation(_)));

    let err = ledger
        .transition(9999, TaskTransition::running(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::TaskNotFound { id: 9999 }));
}

#[tokio::test]
async fn test_version_conflict_is_retried() {
    let (ledger, repo, _logs) = create_ledger();
    let id = create_pending(&ledger).await;

    repo.simulate_concurrent_writes(2);
    let outcome = ledger
        .transition(id, TaskTransition::running(30))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(repo.stored_task(id).unwrap().progress, 30);

    repo.simulate_concurrent_writes(100);
    let err = ledger
        .transition(id, TaskTransition::running(40))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_concurrent_reports_keep_progress_monotonic() {
    let (ledger, repo, _logs) = create_ledger();
    let id = create_pending(&ledger).await;
    ledger
        .transition(id, TaskTransition::running(0))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for progress in [30u8, 10, 50, 20, 40, 60, 5] {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.transition(id, TaskTransition::running(progress)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(repo.stored_task(id).unwrap().progress, 60);
}

#[tokio::test]
async fn test_task_locks_released_after_every_report() {
    let (ledger, repo, _logs) = create_ledger();

    for id in 1000..1100 {
        let err = ledger
            .transition(id, TaskTransition::running(10))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
    assert_eq!(ledger.held_task_locks(), 0);

    let id = create_pending(&ledger).await;
    ledger
        .transition(id, TaskTransition::running(20))
        .await
        .unwrap();
    assert_eq!(ledger.held_task_locks(), 0);

    // 回退、冲突放弃和终态后的迟到上报都不留下锁
    let outcome = ledger
        .transition(id, TaskTransition::running(10))
        .await
        .unwrap();
    assert!(!outcome.is_applied());
    repo.simulate_concurrent_writes(100);
    assert!(ledger
        .transition(id, TaskTransition::running(30))
        .await
        .unwrap_err()
        .is_conflict());
    repo.simulate_concurrent_writes(0);
    ledger
        .transition(id, TaskTransition::failed("超时"))
        .await
        .unwrap();
    for _ in 0..10 {
        assert!(ledger
            .transition(id, TaskTransition::running(90))
            .await
            .is_err());
    }
    assert_eq!(ledger.held_task_locks(), 0);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.transition(id, TaskTransition::running(95)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }
    assert_eq!(ledger.held_task_locks(), 0);
}

#[tokio::test]
async fn test_delete_only_terminal_tasks() {
    let (ledger, _repo, logs) = create_ledger();
    let running = create_pending(&ledger).await;
    let done = create_pending(&ledger).await;
    ledger
        .transition(running, TaskTransition::running(10))
        .await
        .unwrap();
    ledger
        .transition(done, TaskTransition::failed("x"))
        .await
        .unwrap();
    let done_log = ledger.get_task(done).await.unwrap().log_path.unwrap();

    let err = ledger.delete_tasks(&[done, running]).await.unwrap_err();
    assert!(matches!(err, OperationsError::Conflict(_)));
    assert!(ledger.get_task(done).await.is_ok());

    assert_eq!(ledger.delete_tasks(&[done]).await.unwrap(), 1);
    assert!(ledger.get_task(done).await.unwrap_err().is_not_found());
    assert!(!logs.contains(&done_log));

    assert!(matches!(
        ledger.delete_tasks(&[]).await.unwrap_err(),
        OperationsError::Validation(_)
    ));
}

#[tokio::test]
async fn test_task_detail_and_missing_log() {
    let (ledger, repo, logs) = create_ledger();
    repo.insert_service(ServiceBuilder::new().build());
    let id = create_pending(&ledger).await;

    let detail = ledger.task_detail(id).await.unwrap();
    assert!(detail.service.is_some());
    assert!(detail.node.is_none());
    assert!(detail.log_size > 0);

    logs.purge(detail.task.log_path.as_deref().unwrap());
    let err = ledger.read_log(id).await.unwrap_err();
    assert!(matches!(err, OperationsError::LogNotFound(_)));
    assert_eq!(ledger.task_detail(id).await.unwrap().log_size, 0);

    repo.insert_task(TaskBuilder::new().with_id(500).build());
    let err = ledger.read_log(500).await.unwrap_err();
    assert!(err.to_string().contains("任务未生成日志"));
}

#[tokio::test]
async fn test_recent_and_list() {
    let (ledger, _repo, _logs) = create_ledger();
    for _ in 0..25 {
        create_pending(&ledger).await;
    }

    assert_eq!(ledger.recent_tasks(None).await.unwrap().len(), 20);
    assert_eq!(ledger.recent_tasks(Some(500)).await.unwrap().len(), 25);
    let recent = ledger.recent_tasks(Some(3)).await.unwrap();
    assert!(recent[0].id > recent[1].id);

    let page = ledger
        .list_tasks(
            &TaskFilter {
                task_status: Some(TaskStatus::Pending),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.items.len(), 10);
}
