pub mod sqlite_node_repository;
pub mod sqlite_service_repository;
pub mod sqlite_task_repository;

pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_service_repository::SqliteServiceRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// 外键约束冲突
///
/// 旧库中的 `ON DELETE RESTRICT` 约束报告 1811 (SQLITE_CONSTRAINT_TRIGGER) 而不是 787。
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_foreign_key_violation() || db.code().as_deref() == Some(RESTRICT_VIOLATION_CODE)
        }
        _ => false,
    }
}

const RESTRICT_VIOLATION_CODE: &str = "1811";

/// 追加 `(?, ?, ...)` 形式的绑定列表
pub(crate) fn push_value_list<T>(qb: &mut QueryBuilder<'_, Sqlite>, values: &[T])
where
    T: Copy + for<'q> sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite> + 'static,
{
    qb.push("(");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(*value);
    }
    separated.push_unseparated(")");
}

/// 读取节点所属的服务模块，按关联建立的先后排列
pub(crate) async fn load_memberships(
    conn: &mut SqliteConnection,
    node_ids: &[i64],
) -> Result<HashMap<i64, Vec<i64>>, sqlx::Error> {
    let mut memberships: HashMap<i64, Vec<i64>> = HashMap::new();
    if node_ids.is_empty() {
        return Ok(memberships);
    }

    let mut qb = QueryBuilder::new(
        "SELECT node_id, service_id FROM operations_node_service WHERE node_id IN ",
    );
    push_value_list(&mut qb, node_ids);
    qb.push(" ORDER BY rowid");

    let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(&mut *conn).await?;
    for (node_id, service_id) in rows {
        memberships.entry(node_id).or_default().push(service_id);
    }
    Ok(memberships)
}

/// 写入节点的服务模块关联
pub(crate) async fn insert_memberships(
    conn: &mut SqliteConnection,
    node_id: i64,
    service_ids: &[i64],
) -> Result<(), sqlx::Error> {
    for service_id in service_ids {
        sqlx::query("INSERT INTO operations_node_service (node_id, service_id) VALUES (?1, ?2)")
            .bind(node_id)
            .bind(service_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
