use std::sync::Arc;

use operations_core::config::DatabaseConfig;
use operations_core::errors::OperationsError;
use operations_core::models::{
    Node, NodeFilter, OperatorType, PageRequest, Service, ServiceFilter, Task, TaskFilter,
    TaskStatus, TaskTransition,
};
use operations_core::traits::{NodeRepository, ServiceRepository, TaskRepository};
use operations_domain::TaskLedger;
use operations_infrastructure::{
    DatabaseManager, FileTaskLogStore, SqliteNodeRepository, SqliteServiceRepository,
    SqliteTaskRepository,
};

struct Repos {
    db: DatabaseManager,
    services: SqliteServiceRepository,
    nodes: SqliteNodeRepository,
    tasks: SqliteTaskRepository,
}

async fn setup() -> Repos {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    };
    let db = DatabaseManager::new(&config).await.unwrap();
    db.migrate().await.unwrap();
    let pool = db.pool().clone();
    Repos {
        services: SqliteServiceRepository::new(pool.clone()),
        nodes: SqliteNodeRepository::new(pool.clone()),
        tasks: SqliteTaskRepository::new(pool),
        db,
    }
}

async fn create_service(repos: &Repos, name: &str, code: &str) -> Service {
    repos
        .services
        .create(&Service::new(name.to_string(), code.to_string()))
        .await
        .unwrap()
}

async fn create_node(repos: &Repos, ip: &str, service_ids: Vec<i64>) -> Node {
    repos
        .nodes
        .create(&Node::new(ip.to_string(), 22, service_ids))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_migrate_is_idempotent_and_healthy() {
    let repos = setup().await;
    repos.db.migrate().await.unwrap();
    repos.db.health_check().await.unwrap();
    repos.db.close().await;
}

#[tokio::test]
async fn test_file_database_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("operations.db");
    let config = DatabaseConfig {
        url: format!("sqlite:{}", path.display()),
        ..DatabaseConfig::default()
    };

    let db = DatabaseManager::new(&config).await.unwrap();
    db.migrate().await.unwrap();
    db.health_check().await.unwrap();
    assert!(path.exists());
    db.close().await;
}

#[tokio::test]
async fn test_service_unique_constraints() {
    let repos = setup().await;
    let service = create_service(&repos, "订单服务", "order").await;
    assert!(service.id > 0);

    let err = repos
        .services
        .create(&Service::new("其它".to_string(), "order".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::Conflict(_)));

    assert_eq!(
        repos.services.get_by_code("order").await.unwrap().unwrap().id,
        service.id
    );
    assert_eq!(
        repos.services.get_by_name("订单服务").await.unwrap().unwrap().id,
        service.id
    );
    assert!(repos.services.get_by_code("none").await.unwrap().is_none());

    let mut changed = service.clone();
    changed.name = "订单中心".to_string();
    changed.enabled = false;
    let updated = repos.services.update(&changed).await.unwrap();
    assert_eq!(updated.name, "订单中心");
    assert!(!updated.enabled);
    assert_eq!(updated.code, "order");

    let mut missing = service;
    missing.id = 999;
    let err = repos.services.update(&missing).await.unwrap_err();
    assert!(matches!(err, OperationsError::ServiceNotFound { id: 999 }));
}

#[tokio::test]
async fn test_node_memberships() {
    let repos = setup().await;
    let a = create_service(&repos, "a", "a").await;
    let b = create_service(&repos, "b", "b").await;

    let node = create_node(&repos, "10.0.0.1", vec![b.id, a.id]).await;
    assert_eq!(node.service_ids, vec![b.id, a.id]);
    assert_eq!(node.port, 22);

    let found = repos
        .nodes
        .find_by_address("10.0.0.1", 22)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, node.id);
    assert_eq!(found.service_ids, vec![b.id, a.id]);
    assert!(repos
        .nodes
        .find_by_address("10.0.0.1", 2222)
        .await
        .unwrap()
        .is_none());

    let err = repos
        .nodes
        .create(&Node::new("10.0.0.1".to_string(), 22, vec![a.id]))
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::Conflict(_)));

    let mut changed = found;
    changed.service_ids = vec![a.id];
    changed.port = 8022;
    let updated = repos.nodes.update(&changed).await.unwrap();
    assert_eq!(updated.service_ids, vec![a.id]);
    assert_eq!(updated.port, 8022);
    assert_eq!(repos.nodes.count_by_service(b.id).await.unwrap(), 0);
    assert_eq!(repos.nodes.count_by_service(a.id).await.unwrap(), 1);

    assert!(repos.nodes.detach(a.id, node.id).await.unwrap());
    assert!(!repos.nodes.detach(a.id, node.id).await.unwrap());
    let orphan = repos.nodes.get_by_id(node.id).await.unwrap().unwrap();
    assert!(orphan.service_ids.is_empty());
}

#[tokio::test]
async fn test_service_with_nodes_cannot_be_deleted() {
    let repos = setup().await;
    let service = create_service(&repos, "a", "a").await;
    let node = create_node(&repos, "10.0.0.1", vec![service.id]).await;

    let err = repos.services.delete_many(&[service.id]).await.unwrap_err();
    assert!(matches!(err, OperationsError::Conflict(_)));

    // 删除节点时级联删除关联
    assert_eq!(repos.nodes.delete_many(&[node.id]).await.unwrap(), 1);
    assert_eq!(repos.nodes.count_by_service(service.id).await.unwrap(), 0);
    assert_eq!(repos.services.delete_many(&[service.id]).await.unwrap(), 1);
    assert!(repos.services.get_by_id(service.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_restrict_schema_delete_is_conflict() {
    let repos = setup().await;
    // 早期库的关联表带 ON DELETE RESTRICT
    sqlx::query("DROP TABLE operations_node_service")
        .execute(repos.db.pool())
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE operations_node_service (
            node_id INTEGER NOT NULL REFERENCES operations_node(id) ON DELETE CASCADE,
            service_id INTEGER NOT NULL REFERENCES operations_service(id) ON DELETE RESTRICT,
            PRIMARY KEY (node_id, service_id)
        )",
    )
    .execute(repos.db.pool())
    .await
    .unwrap();

    let service = create_service(&repos, "a", "a").await;
    create_node(&repos, "10.0.0.1", vec![service.id]).await;

    let err = repos.services.delete_many(&[service.id]).await.unwrap_err();
    assert!(matches!(err, OperationsError::Conflict(_)));
    assert!(repos.services.get_by_id(service.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_service_tree_groups_member_nodes() {
    let repos = setup().await;
    let a = create_service(&repos, "a", "a").await;
    let b = create_service(&repos, "b", "b").await;
    let empty = create_service(&repos, "c", "c").await;
    let n1 = create_node(&repos, "10.0.0.1", vec![a.id]).await;
    let n2 = create_node(&repos, "10.0.0.2", vec![a.id, b.id]).await;
    let n3 = create_node(&repos, "10.0.0.3", vec![b.id]).await;

    let tree = repos
        .services
        .service_tree(&ServiceFilter::default())
        .await
        .unwrap();
    assert_eq!(tree.len(), 3);

    let ids = |i: usize| tree[i].nodes.iter().map(|n| n.id).collect::<Vec<_>>();
    assert_eq!(tree[0].service.id, a.id);
    assert_eq!(ids(0), vec![n1.id, n2.id]);
    assert_eq!(ids(1), vec![n2.id, n3.id]);
    assert_eq!(tree[2].service.id, empty.id);
    assert!(tree[2].nodes.is_empty());
    // 节点仍然带完整的服务模块列表
    assert_eq!(tree[1].nodes[0].service_ids, vec![a.id, b.id]);

    let filtered = repos
        .services
        .service_tree(&ServiceFilter {
            code: Some("b".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].nodes.len(), 2);
}

#[tokio::test]
async fn test_list_filters_and_pages() {
    let repos = setup().await;
    let a = create_service(&repos, "订单服务", "order").await;
    let b = create_service(&repos, "支付服务", "pay").await;
    for i in 0..15 {
        create_node(&repos, &format!("10.0.1.{i}"), vec![a.id]).await;
    }
    create_node(&repos, "10.0.2.1", vec![b.id]).await;

    let (nodes, total) = repos
        .nodes
        .list(
            &NodeFilter {
                service_id: Some(a.id),
                ..Default::default()
            },
            PageRequest::new(Some(2), Some(10)),
        )
        .await
        .unwrap();
    assert_eq!(total, 15);
    assert_eq!(nodes.len(), 5);
    assert!(nodes.iter().all(|n| n.belongs_to(a.id)));

    let (nodes, total) = repos
        .nodes
        .list(
            &NodeFilter {
                ip: Some("10.0.2".to_string()),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(nodes[0].service_ids, vec![b.id]);

    let (services, total) = repos
        .services
        .list(
            &ServiceFilter {
                name: Some("支付".to_string()),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(services[0].code, "pay");
}

fn deploy_task(service: &Service, node: &Node) -> Task {
    Task::for_target(OperatorType::Deploy, service, node, Some("tester".to_string()))
}

#[tokio::test]
async fn test_task_batch_and_versioned_update() {
    let repos = setup().await;
    let service = create_service(&repos, "a", "a").await;
    let n1 = create_node(&repos, "10.0.0.1", vec![service.id]).await;
    let n2 = create_node(&repos, "10.0.0.2", vec![service.id]).await;

    let created = repos
        .tasks
        .create_batch(&[deploy_task(&service, &n1), deploy_task(&service, &n2)])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].node_id, n1.id);
    assert_eq!(created[1].node_id, n2.id);
    assert_eq!(created[0].version, 0);

    let stored = repos.tasks.get_by_id(created[0].id).await.unwrap().unwrap();
    let params = stored.params.as_node_operator().unwrap();
    assert_eq!(params.node.ip, "10.0.0.1");
    assert_eq!(params.operator_name.as_deref(), Some("tester"));

    let mut next = stored.clone();
    next.update_status(TaskStatus::Running);
    next.progress = 40;
    assert!(repos.tasks.update_versioned(&next).await.unwrap());
    // 旧版本写入被拒绝
    assert!(!repos.tasks.update_versioned(&next).await.unwrap());

    let stored = repos.tasks.get_by_id(created[0].id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.progress, 40);
    assert_eq!(stored.task_status, TaskStatus::Running);
    assert!(stored.started_at.is_some());

    let active = repos
        .tasks
        .find_by_status(&TaskStatus::active_statuses())
        .await
        .unwrap();
    assert_eq!(active.len(), 2);
    assert_eq!(
        repos
            .tasks
            .count_active_by_nodes(&[n1.id, n2.id])
            .await
            .unwrap(),
        2
    );

    let (running, total) = repos
        .tasks
        .list(
            &TaskFilter {
                task_status: Some(TaskStatus::Running),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(running[0].id, created[0].id);

    let recent = repos.tasks.recent(1).await.unwrap();
    assert_eq!(recent[0].id, created[1].id);

    assert_eq!(repos.tasks.delete_many(&[created[1].id]).await.unwrap(), 1);
    assert!(repos.tasks.get_by_id(created[1].id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_task_survives_node_deletion() {
    let repos = setup().await;
    let service = create_service(&repos, "a", "a").await;
    let node = create_node(&repos, "10.0.0.1", vec![service.id]).await;
    let task = repos
        .tasks
        .create_batch(&[deploy_task(&service, &node)])
        .await
        .unwrap()
        .remove(0);

    repos.nodes.delete_many(&[node.id]).await.unwrap();
    let stored = repos.tasks.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.ip, "10.0.0.1");
}

async fn task_total(repos: &Repos) -> i64 {
    repos
        .tasks
        .list(&TaskFilter::default(), PageRequest::default())
        .await
        .unwrap()
        .1
}

#[tokio::test]
async fn test_target_recheck_rolls_back_whole_batch() {
    let repos = setup().await;
    let service = create_service(&repos, "a", "a").await;
    let n1 = create_node(&repos, "10.0.0.1", vec![service.id]).await;
    let n2 = create_node(&repos, "10.0.0.2", vec![service.id]).await;

    let created = repos
        .tasks
        .create_batch_for_targets(&[deploy_task(&service, &n1), deploy_task(&service, &n2)])
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    let mut disabled = n2.clone();
    disabled.enabled = false;
    repos.nodes.update(&disabled).await.unwrap();
    let err = repos
        .tasks
        .create_batch_for_targets(&[deploy_task(&service, &n1), deploy_task(&service, &n2)])
        .await
        .unwrap_err();
    assert!(matches!(err, OperationsError::Validation(_)));
    assert!(err.to_string().contains("节点已停用"));
    assert_eq!(task_total(&repos).await, 2);

    assert!(repos.nodes.detach(service.id, n1.id).await.unwrap());
    let err = repos
        .tasks
        .create_batch_for_targets(&[deploy_task(&service, &n1)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("不属于服务模块"));

    let n3 = create_node(&repos, "10.0.0.3", vec![service.id]).await;
    let mut stopped = repos.services.get_by_id(service.id).await.unwrap().unwrap();
    stopped.enabled = false;
    repos.services.update(&stopped).await.unwrap();
    let err = repos
        .tasks
        .create_batch_for_targets(&[deploy_task(&service, &n3)])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("服务模块已停用"));
    assert_eq!(task_total(&repos).await, 2);

    // 不复核的写入不受影响
    repos
        .tasks
        .create_batch(&[deploy_task(&service, &n3)])
        .await
        .unwrap();
    assert_eq!(task_total(&repos).await, 3);
}

#[tokio::test]
async fn test_ledger_over_sqlite_and_files() {
    let repos = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let service = create_service(&repos, "a", "a").await;
    let node = create_node(&repos, "10.0.0.1", vec![service.id]).await;

    let pool = repos.db.pool().clone();
    let ledger = TaskLedger::new(
        Arc::new(SqliteTaskRepository::new(pool.clone())),
        Arc::new(SqliteServiceRepository::new(pool.clone())),
        Arc::new(SqliteNodeRepository::new(pool)),
        Arc::new(FileTaskLogStore::new(dir.path())),
    );

    let task = ledger
        .create_tasks(vec![deploy_task(&service, &node)])
        .await
        .unwrap()
        .remove(0);
    ledger
        .transition(task.id, TaskTransition::running(20).with_log("开始部署"))
        .await
        .unwrap();
    let outcome = ledger
        .transition(task.id, TaskTransition::running(10))
        .await
        .unwrap();
    assert!(!outcome.is_applied());
    ledger
        .transition(task.id, TaskTransition::succeeded().with_log("部署成功"))
        .await
        .unwrap();

    let detail = ledger.task_detail(task.id).await.unwrap();
    assert_eq!(detail.task.task_status, TaskStatus::Succeeded);
    assert_eq!(detail.task.progress, 100);
    assert_eq!(detail.task.version, 2);
    assert_eq!(detail.node.unwrap().id, node.id);

    let log = ledger.read_log(task.id).await.unwrap();
    assert_eq!(log.lines().count(), 3);
    assert_eq!(detail.log_size, log.len() as u64);

    assert_eq!(ledger.delete_tasks(&[task.id]).await.unwrap(), 1);
    let log_file = dir.path().join(detail.task.log_path.unwrap());
    assert!(!log_file.exists());
}
