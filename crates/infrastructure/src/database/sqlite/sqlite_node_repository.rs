use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{Node, NodeFilter, PageRequest};
use operations_core::traits::NodeRepository;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

use super::{
    insert_memberships, is_foreign_key_violation, is_unique_violation, load_memberships,
    push_value_list,
};

pub(crate) const NODE_COLUMNS: &str =
    "id, ip, port, enabled, description, project, idc, tags, creator, created_at, updated_at";

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_node(
    row: &SqliteRow,
    memberships: &HashMap<i64, Vec<i64>>,
) -> OperationsResult<Node> {
    let id: i64 = row.try_get("id")?;
    let port: i64 = row.try_get("port")?;
    let port = u16::try_from(port)
        .map_err(|_| OperationsError::Serialization(format!("节点 {id} 端口无效: {port}")))?;

    Ok(Node {
        id,
        ip: row.try_get("ip")?,
        port,
        enabled: row.try_get("enabled")?,
        description: row.try_get("description")?,
        project: row.try_get("project")?,
        idc: row.try_get("idc")?,
        tags: row.try_get("tags")?,
        service_ids: memberships.get(&id).cloned().unwrap_or_default(),
        creator: row.try_get("creator")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// 批量映射节点行，并补齐各自的服务模块关联
async fn rows_to_nodes(
    conn: &mut SqliteConnection,
    rows: &[SqliteRow],
) -> OperationsResult<Vec<Node>> {
    let ids = rows
        .iter()
        .map(|row| row.try_get::<i64, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
    let memberships = load_memberships(conn, &ids).await?;
    rows.iter().map(|row| row_to_node(row, &memberships)).collect()
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &NodeFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(ip) = &filter.ip {
        qb.push(" AND instr(ip, ").push_bind(ip.clone()).push(") > 0");
    }
    if let Some(service_id) = filter.service_id {
        qb.push(" AND id IN (SELECT node_id FROM operations_node_service WHERE service_id = ")
            .push_bind(service_id)
            .push(")");
    }
    if let Some(enabled) = filter.enabled {
        qb.push(" AND enabled = ").push_bind(enabled);
    }
    if let Some(project) = &filter.project {
        qb.push(" AND project = ").push_bind(project.clone());
    }
    if let Some(idc) = &filter.idc {
        qb.push(" AND idc = ").push_bind(idc.clone());
    }
}

fn write_error(node: &Node, err: sqlx::Error) -> OperationsError {
    if is_unique_violation(&err) {
        OperationsError::conflict(format!("节点已存在: {}", node.address()))
    } else if is_foreign_key_violation(&err) {
        OperationsError::validation(format!("服务模块不存在: {:?}", node.service_ids))
    } else {
        err.into()
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    #[instrument(skip(self, node), fields(ip = %node.ip, port = node.port))]
    async fn create(&self, node: &Node) -> OperationsResult<Node> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO operations_node (ip, port, enabled, description, project, idc, tags, creator, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(&node.ip)
        .bind(i64::from(node.port))
        .bind(node.enabled)
        .bind(&node.description)
        .bind(&node.project)
        .bind(&node.idc)
        .bind(&node.tags)
        .bind(&node.creator)
        .bind(node.created_at)
        .bind(node.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(node, e))?;

        let id: i64 = row.try_get("id")?;
        insert_memberships(&mut tx, id, &node.service_ids)
            .await
            .map_err(|e| write_error(node, e))?;
        tx.commit().await?;

        let memberships = HashMap::from([(id, node.service_ids.clone())]);
        let created = row_to_node(&row, &memberships)?;
        debug!("创建节点成功: {} (ID: {})", created.address(), created.id);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Node>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM operations_node WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(rows_to_nodes(&mut conn, &[row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn get_by_ids(&self, ids: &[i64]) -> OperationsResult<Vec<Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.acquire().await?;
        let mut qb = QueryBuilder::new(format!(
            "SELECT {NODE_COLUMNS} FROM operations_node WHERE id IN "
        ));
        push_value_list(&mut qb, ids);
        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&mut *conn).await?;
        rows_to_nodes(&mut conn, &rows).await
    }

    async fn find_by_address(&self, ip: &str, port: u16) -> OperationsResult<Option<Node>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM operations_node WHERE ip = ?1 AND port = ?2"
        ))
        .bind(ip)
        .bind(i64::from(port))
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(rows_to_nodes(&mut conn, &[row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, node), fields(node_id = node.id))]
    async fn update(&self, node: &Node) -> OperationsResult<Node> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE operations_node
            SET ip = ?2, port = ?3, enabled = ?4, description = ?5, project = ?6,
                idc = ?7, tags = ?8, updated_at = ?9
            WHERE id = ?1
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(node.id)
        .bind(&node.ip)
        .bind(i64::from(node.port))
        .bind(node.enabled)
        .bind(&node.description)
        .bind(&node.project)
        .bind(&node.idc)
        .bind(&node.tags)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| write_error(node, e))?
        .ok_or(OperationsError::NodeNotFound { id: node.id })?;

        sqlx::query("DELETE FROM operations_node_service WHERE node_id = ?1")
            .bind(node.id)
            .execute(&mut *tx)
            .await?;
        insert_memberships(&mut tx, node.id, &node.service_ids)
            .await
            .map_err(|e| write_error(node, e))?;
        tx.commit().await?;

        let memberships = HashMap::from([(node.id, node.service_ids.clone())]);
        let updated = row_to_node(&row, &memberships)?;
        debug!("更新节点成功: {} (ID: {})", updated.address(), updated.id);
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new("DELETE FROM operations_node WHERE id IN ");
        push_value_list(&mut qb, ids);
        let result = qb.build().execute(&self.pool).await?;
        debug!("删除节点 {} 个", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn list(
        &self,
        filter: &NodeFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Node>, i64)> {
        let mut conn = self.pool.acquire().await?;

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM operations_node");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {NODE_COLUMNS} FROM operations_node"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&mut *conn).await?;

        Ok((rows_to_nodes(&mut conn, &rows).await?, total))
    }

    async fn count_by_service(&self, service_id: i64) -> OperationsResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM operations_node_service WHERE service_id = ?1")
                .bind(service_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn detach(&self, service_id: i64, node_id: i64) -> OperationsResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "DELETE FROM operations_node_service WHERE service_id = ?1 AND node_id = ?2",
        )
        .bind(service_id)
        .bind(node_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            sqlx::query("UPDATE operations_node SET updated_at = ?2 WHERE id = ?1")
                .bind(node_id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
