use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{PageRequest, Service, ServiceFilter, ServiceWithNodes};
use operations_core::traits::ServiceRepository;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::sqlite_node_repository::row_to_node;
use super::{is_foreign_key_violation, is_unique_violation, load_memberships, push_value_list};

const SERVICE_COLUMNS: &str =
    "id, name, code, enabled, description, project, module_group, creator, created_at, updated_at";

pub struct SqliteServiceRepository {
    pool: SqlitePool,
}

impl SqliteServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_service(row: &SqliteRow) -> OperationsResult<Service> {
        Ok(Service {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            code: row.try_get("code")?,
            enabled: row.try_get("enabled")?,
            description: row.try_get("description")?,
            project: row.try_get("project")?,
            module_group: row.try_get("module_group")?,
            creator: row.try_get("creator")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> OperationsResult<Option<Service>> {
        let row = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM operations_service WHERE {column} = ?1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_service).transpose()
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ServiceFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(name) = &filter.name {
        qb.push(" AND instr(name, ").push_bind(name.clone()).push(") > 0");
    }
    if let Some(code) = &filter.code {
        qb.push(" AND code = ").push_bind(code.clone());
    }
    if let Some(enabled) = filter.enabled {
        qb.push(" AND enabled = ").push_bind(enabled);
    }
    if let Some(project) = &filter.project {
        qb.push(" AND project = ").push_bind(project.clone());
    }
    if let Some(module_group) = &filter.module_group {
        qb.push(" AND module_group = ").push_bind(module_group.clone());
    }
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    #[instrument(skip(self, service), fields(code = %service.code))]
    async fn create(&self, service: &Service) -> OperationsResult<Service> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO operations_service (name, code, enabled, description, project, module_group, creator, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(&service.name)
        .bind(&service.code)
        .bind(service.enabled)
        .bind(&service.description)
        .bind(&service.project)
        .bind(&service.module_group)
        .bind(&service.creator)
        .bind(service.created_at)
        .bind(service.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OperationsError::conflict(format!(
                    "服务模块名称或编码已存在: {} ({})",
                    service.name, service.code
                ))
            } else {
                e.into()
            }
        })?;

        let created = Self::row_to_service(&row)?;
        debug!("创建服务模块成功: {} (ID: {})", created.code, created.id);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Service>> {
        let row = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM operations_service WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_service).transpose()
    }

    async fn get_by_ids(&self, ids: &[i64]) -> OperationsResult<Vec<Service>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new(format!(
            "SELECT {SERVICE_COLUMNS} FROM operations_service WHERE id IN "
        ));
        push_value_list(&mut qb, ids);
        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_service).collect()
    }

    async fn get_by_name(&self, name: &str) -> OperationsResult<Option<Service>> {
        self.fetch_one_by("name", name).await
    }

    async fn get_by_code(&self, code: &str) -> OperationsResult<Option<Service>> {
        self.fetch_one_by("code", code).await
    }

    #[instrument(skip(self, service), fields(service_id = service.id))]
    async fn update(&self, service: &Service) -> OperationsResult<Service> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE operations_service
            SET name = ?2, enabled = ?3, description = ?4, project = ?5,
                module_group = ?6, updated_at = ?7
            WHERE id = ?1
            RETURNING {SERVICE_COLUMNS}
            "#
        ))
        .bind(service.id)
        .bind(&service.name)
        .bind(service.enabled)
        .bind(&service.description)
        .bind(&service.project)
        .bind(&service.module_group)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OperationsError::conflict(format!("服务模块名称已存在: {}", service.name))
            } else {
                e.into()
            }
        })?
        .ok_or(OperationsError::ServiceNotFound { id: service.id })?;

        let updated = Self::row_to_service(&row)?;
        debug!("更新服务模块成功: {} (ID: {})", updated.code, updated.id);
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new("DELETE FROM operations_service WHERE id IN ");
        push_value_list(&mut qb, ids);
        let result = qb.build().execute(&self.pool).await.map_err(|e| {
            if is_foreign_key_violation(&e) {
                OperationsError::conflict("服务模块下仍有节点，请先解除节点关联")
            } else {
                e.into()
            }
        })?;
        debug!("删除服务模块 {} 个", result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn list(
        &self,
        filter: &ServiceFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Service>, i64)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM operations_service");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {SERVICE_COLUMNS} FROM operations_service"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        let services = rows
            .iter()
            .map(Self::row_to_service)
            .collect::<OperationsResult<Vec<_>>>()?;
        Ok((services, total))
    }

    /// 服务树：服务模块及其节点在同一个读事务中取出
    #[instrument(skip(self, filter))]
    async fn service_tree(&self, filter: &ServiceFilter) -> OperationsResult<Vec<ServiceWithNodes>> {
        let mut tx = self.pool.begin().await?;

        let mut qb = QueryBuilder::new(format!("SELECT {SERVICE_COLUMNS} FROM operations_service"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id");
        let services = qb
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(Self::row_to_service)
            .collect::<OperationsResult<Vec<_>>>()?;
        if services.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let service_ids: Vec<i64> = services.iter().map(|s| s.id).collect();
        let mut qb = QueryBuilder::new(
            r#"
            SELECT ns.service_id AS member_of, n.id, n.ip, n.port, n.enabled, n.description,
                   n.project, n.idc, n.tags, n.creator, n.created_at, n.updated_at
            FROM operations_node n
            JOIN operations_node_service ns ON ns.node_id = n.id
            WHERE ns.service_id IN "#,
        );
        push_value_list(&mut qb, &service_ids);
        qb.push(" ORDER BY ns.service_id, n.id");
        let rows = qb.build().fetch_all(&mut *tx).await?;

        let mut seen = HashSet::new();
        let node_ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect::<Vec<_>>();
        let memberships = load_memberships(&mut tx, &node_ids).await?;
        tx.commit().await?;

        let mut nodes_by_service: BTreeMap<i64, Vec<_>> = BTreeMap::new();
        for row in &rows {
            let member_of: i64 = row.try_get("member_of")?;
            nodes_by_service
                .entry(member_of)
                .or_default()
                .push(row_to_node(row, &memberships)?);
        }

        Ok(services
            .into_iter()
            .map(|service| {
                let nodes = nodes_by_service.remove(&service.id).unwrap_or_default();
                ServiceWithNodes { service, nodes }
            })
            .collect())
    }
}
