use sqlx::SqlitePool;
use tracing::debug;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS operations_service (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        code TEXT NOT NULL UNIQUE,
        enabled INTEGER NOT NULL DEFAULT 1,
        description TEXT,
        project TEXT,
        module_group TEXT,
        creator TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operations_node (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ip TEXT NOT NULL,
        port INTEGER NOT NULL DEFAULT 22,
        enabled INTEGER NOT NULL DEFAULT 1,
        description TEXT,
        project TEXT,
        idc TEXT,
        tags TEXT,
        creator TEXT,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        UNIQUE (ip, port)
    )
    "#,
    // 节点与服务模块多对多；服务模块仍有节点时禁止删除
    r#"
    CREATE TABLE IF NOT EXISTS operations_node_service (
        node_id INTEGER NOT NULL REFERENCES operations_node(id) ON DELETE CASCADE,
        service_id INTEGER NOT NULL REFERENCES operations_service(id),
        PRIMARY KEY (node_id, service_id)
    )
    "#,
    // 任务保留节点和服务模块的快照，不随它们删除
    r#"
    CREATE TABLE IF NOT EXISTS operations_task (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_type TEXT NOT NULL,
        operator_type TEXT NOT NULL,
        task_status TEXT NOT NULL DEFAULT 'pending',
        progress INTEGER NOT NULL DEFAULT 0,
        service_id INTEGER NOT NULL,
        node_id INTEGER NOT NULL,
        ip TEXT NOT NULL,
        params TEXT NOT NULL DEFAULT '{}',
        log_path TEXT,
        error_message TEXT,
        project TEXT,
        idc TEXT,
        module_group TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        started_at DATETIME,
        completed_at DATETIME,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_node_service_service_id ON operations_node_service(service_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_status ON operations_task(task_status)",
    "CREATE INDEX IF NOT EXISTS idx_task_node_id ON operations_task(node_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_service_id ON operations_task(service_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_created_at ON operations_task(created_at)",
];

/// 建表和索引，可重复执行
pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    debug!("执行SQLite数据库迁移");
    for sql in TABLES.iter().chain(INDEXES) {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}
