use std::collections::HashSet;

use async_trait::async_trait;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{PageRequest, Task, TaskFilter, TaskParams, TaskStatus};
use operations_core::traits::TaskRepository;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, instrument};

use super::push_value_list;

const TASK_COLUMNS: &str = "id, task_type, operator_type, task_status, progress, service_id, node_id, ip, params, \
     log_path, error_message, project, idc, module_group, version, started_at, completed_at, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> OperationsResult<Task> {
        let id: i64 = row.try_get("id")?;
        let progress: i64 = row.try_get("progress")?;
        let progress = u8::try_from(progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                OperationsError::Serialization(format!("任务 {id} 进度无效: {progress}"))
            })?;
        let params: String = row.try_get("params")?;

        Ok(Task {
            id,
            task_type: row.try_get("task_type")?,
            operator_type: row.try_get("operator_type")?,
            task_status: row.try_get("task_status")?,
            progress,
            service_id: row.try_get("service_id")?,
            node_id: row.try_get("node_id")?,
            ip: row.try_get("ip")?,
            params: TaskParams::from_db_text(&params),
            log_path: row.try_get("log_path")?,
            error_message: row.try_get("error_message")?,
            project: row.try_get("project")?,
            idc: row.try_get("idc")?,
            module_group: row.try_get("module_group")?,
            version: row.try_get("version")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn insert_tasks(
        tx: &mut Transaction<'_, Sqlite>,
        tasks: &[Task],
    ) -> OperationsResult<Vec<Task>> {
        let sql = format!(
            r#"
            INSERT INTO operations_task (task_type, operator_type, task_status, progress, service_id, node_id, ip,
                params, log_path, error_message, project, idc, module_group, version, started_at, completed_at,
                created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14, ?15, ?16, ?17)
            RETURNING {TASK_COLUMNS}
            "#
        );

        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            let row = sqlx::query(&sql)
                .bind(task.task_type)
                .bind(task.operator_type)
                .bind(task.task_status)
                .bind(i64::from(task.progress))
                .bind(task.service_id)
                .bind(task.node_id)
                .bind(&task.ip)
                .bind(task.params.to_db_text()?)
                .bind(&task.log_path)
                .bind(&task.error_message)
                .bind(&task.project)
                .bind(&task.idc)
                .bind(&task.module_group)
                .bind(task.started_at)
                .bind(task.completed_at)
                .bind(task.created_at)
                .bind(task.updated_at)
                .fetch_one(&mut **tx)
                .await?;
            created.push(Self::row_to_task(&row)?);
        }
        Ok(created)
    }

    /// 复核单个目标，不满足时返回校验错误
    async fn verify_target(
        tx: &mut Transaction<'_, Sqlite>,
        service_id: i64,
        node_id: i64,
    ) -> OperationsResult<()> {
        let row = sqlx::query(
            r#"
            SELECT s.enabled AS service_enabled,
                   n.enabled AS node_enabled,
                   EXISTS (
                       SELECT 1 FROM operations_node_service
                       WHERE node_id = ?2 AND service_id = ?1
                   ) AS member
            FROM (SELECT 1)
            LEFT JOIN operations_service s ON s.id = ?1
            LEFT JOIN operations_node n ON n.id = ?2
            "#,
        )
        .bind(service_id)
        .bind(node_id)
        .fetch_one(&mut **tx)
        .await?;

        let service_enabled: Option<bool> = row.try_get("service_enabled")?;
        let node_enabled: Option<bool> = row.try_get("node_enabled")?;
        let member: bool = row.try_get("member")?;

        let reason = match (service_enabled, node_enabled) {
            (None, _) => format!("服务模块不存在: {service_id}"),
            (Some(false), _) => format!("服务模块已停用: {service_id}"),
            (_, None) => format!("节点不存在: {node_id}"),
            _ if !member => format!("节点 {node_id} 不属于服务模块 {service_id}"),
            (_, Some(false)) => format!("节点已停用: {node_id}"),
            _ => return Ok(()),
        };
        Err(OperationsError::validation(reason))
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(operator_type) = filter.operator_type {
        qb.push(" AND operator_type = ").push_bind(operator_type);
    }
    if let Some(status) = filter.task_status {
        qb.push(" AND task_status = ").push_bind(status);
    }
    if let Some(service_id) = filter.service_id {
        qb.push(" AND service_id = ").push_bind(service_id);
    }
    if let Some(node_id) = filter.node_id {
        qb.push(" AND node_id = ").push_bind(node_id);
    }
    if let Some(project) = &filter.project {
        qb.push(" AND project = ").push_bind(project.clone());
    }
    if let Some(idc) = &filter.idc {
        qb.push(" AND idc = ").push_bind(idc.clone());
    }
    if let Some(module_group) = &filter.module_group {
        qb.push(" AND module_group = ").push_bind(module_group.clone());
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn create_batch(&self, tasks: &[Task]) -> OperationsResult<Vec<Task>> {
        let mut tx = self.pool.begin().await?;
        let created = Self::insert_tasks(&mut tx, tasks).await?;
        tx.commit().await?;

        debug!("批量创建任务 {} 个", created.len());
        Ok(created)
    }

    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn create_batch_for_targets(&self, tasks: &[Task]) -> OperationsResult<Vec<Task>> {
        let mut tx = self.pool.begin().await?;
        // 先写入再复核：写入后事务持有写锁，复核读到的是最新提交的状态
        let created = Self::insert_tasks(&mut tx, tasks).await?;
        let mut checked = HashSet::new();
        for task in &created {
            if checked.insert((task.service_id, task.node_id)) {
                Self::verify_target(&mut tx, task.service_id, task.node_id).await?;
            }
        }
        tx.commit().await?;

        debug!("批量创建任务 {} 个，目标复核通过", created.len());
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> OperationsResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM operations_task WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    /// 以 `version` 做比较并交换，版本不一致时不写入并返回 false
    #[instrument(skip(self, task), fields(task_id = task.id, status = %task.task_status))]
    async fn update_versioned(&self, task: &Task) -> OperationsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE operations_task
            SET task_status = ?3, progress = ?4, log_path = ?5, error_message = ?6,
                started_at = ?7, completed_at = ?8, updated_at = ?9, version = version + 1
            WHERE id = ?1 AND version = ?2
            "#,
        )
        .bind(task.id)
        .bind(task.version)
        .bind(task.task_status)
        .bind(i64::from(task.progress))
        .bind(&task.log_path)
        .bind(&task.error_message)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!("任务 {} 版本 {} 已过期", task.id, task.version);
        }
        Ok(applied)
    }

    #[instrument(skip(self))]
    async fn delete_many(&self, ids: &[i64]) -> OperationsResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new("DELETE FROM operations_task WHERE id IN ");
        push_value_list(&mut qb, ids);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn list(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> OperationsResult<(Vec<Task>, i64)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM operations_task");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM operations_task"));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<OperationsResult<Vec<_>>>()?;
        Ok((tasks, total))
    }

    async fn recent(&self, limit: i64) -> OperationsResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM operations_task ORDER BY id DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_by_status(&self, statuses: &[TaskStatus]) -> OperationsResult<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM operations_task WHERE task_status IN "
        ));
        push_value_list(&mut qb, statuses);
        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn count_active_by_nodes(&self, node_ids: &[i64]) -> OperationsResult<i64> {
        if node_ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM operations_task WHERE node_id IN ");
        push_value_list(&mut qb, node_ids);
        qb.push(" AND task_status IN ");
        push_value_list(&mut qb, &TaskStatus::active_statuses());

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }
}
