use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{
    DispatchResult, ExecuteRequest, Node, NodeFilter, NodeForm, OperatorMeta, OperatorType, Page,
    PageRequest, Service, ServiceFilter, ServiceForm, ServiceWithNodes, Task, TaskDetail,
    TaskFilter, TaskStatus, TaskTransition,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::transport::{ApiRequest, Transport};

const PREFIX: &str = "/api/operations";

/// 状态上报结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    pub applied: bool,
    pub task_status: TaskStatus,
    pub progress: u8,
}

#[derive(Serialize)]
struct Ids<'a> {
    ids: &'a [i64],
}

#[derive(Debug, Deserialize)]
struct Deleted {
    deleted: u64,
}

/// 运维编排接口客户端
///
/// 所有调用都检查信封中的 `code`，非 0 时返回 [`OperationsError::Remote`]，
/// 即使传输层的 HTTP 状态是成功的。
pub struct OperationsClient<T: Transport> {
    transport: T,
}

impl<T: Transport> OperationsClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call<R: DeserializeOwned>(&self, request: ApiRequest) -> OperationsResult<R> {
        let data = self.transport.request(request).await?.into_result()?;
        serde_json::from_value(data.unwrap_or(Value::Null)).map_err(OperationsError::from)
    }

    pub async fn health(&self) -> OperationsResult<Value> {
        self.call(ApiRequest::get("/health")).await
    }

    // ---------------------------------------------------------------- 服务模块

    pub async fn list_services(
        &self,
        filter: &ServiceFilter,
        page: PageRequest,
    ) -> OperationsResult<Page<Service>> {
        let request = service_query(ApiRequest::get(format!("{PREFIX}/service/page")), filter);
        self.call(paged(request, page)).await
    }

    pub async fn service_tree(
        &self,
        filter: &ServiceFilter,
    ) -> OperationsResult<Vec<ServiceWithNodes>> {
        let request = service_query(ApiRequest::get(format!("{PREFIX}/service/tree")), filter);
        self.call(request).await
    }

    pub async fn get_service(&self, id: i64) -> OperationsResult<ServiceWithNodes> {
        self.call(ApiRequest::get(format!("{PREFIX}/service/{id}")))
            .await
    }

    pub async fn create_service(&self, form: &ServiceForm) -> OperationsResult<Service> {
        self.call(ApiRequest::post(format!("{PREFIX}/service"), body(form)?))
            .await
    }

    pub async fn update_service(&self, id: i64, form: &ServiceForm) -> OperationsResult<Service> {
        self.call(ApiRequest::post(
            format!("{PREFIX}/service/{id}/update"),
            body(form)?,
        ))
        .await
    }

    pub async fn delete_services(&self, ids: &[i64]) -> OperationsResult<u64> {
        let deleted: Deleted = self
            .call(ApiRequest::post(
                format!("{PREFIX}/service/delete"),
                body(&Ids { ids })?,
            ))
            .await?;
        Ok(deleted.deleted)
    }

    pub async fn detach_node(&self, service_id: i64, node_id: i64) -> OperationsResult<Node> {
        self.call(ApiRequest::post(
            format!("{PREFIX}/service/{service_id}/node/{node_id}/detach"),
            json!({}),
        ))
        .await
    }

    // ---------------------------------------------------------------- 节点

    pub async fn list_nodes(
        &self,
        filter: &NodeFilter,
        page: PageRequest,
    ) -> OperationsResult<Page<Node>> {
        let request = ApiRequest::get(format!("{PREFIX}/node/page"))
            .query_opt("ip", filter.ip.as_deref())
            .query_opt("service_id", filter.service_id)
            .query_opt("enabled", filter.enabled)
            .query_opt("project", filter.project.as_deref())
            .query_opt("idc", filter.idc.as_deref());
        self.call(paged(request, page)).await
    }

    pub async fn get_node(&self, id: i64) -> OperationsResult<Node> {
        self.call(ApiRequest::get(format!("{PREFIX}/node/{id}"))).await
    }

    pub async fn create_node(&self, form: &NodeForm) -> OperationsResult<Node> {
        self.call(ApiRequest::post(format!("{PREFIX}/node"), body(form)?))
            .await
    }

    pub async fn update_node(&self, id: i64, form: &NodeForm) -> OperationsResult<Node> {
        self.call(ApiRequest::post(
            format!("{PREFIX}/node/{id}/update"),
            body(form)?,
        ))
        .await
    }

    pub async fn delete_nodes(&self, ids: &[i64]) -> OperationsResult<u64> {
        let deleted: Deleted = self
            .call(ApiRequest::post(
                format!("{PREFIX}/node/delete"),
                body(&Ids { ids })?,
            ))
            .await?;
        Ok(deleted.deleted)
    }

    // ---------------------------------------------------------------- 执行与任务

    pub async fn execute_task(&self, request: &ExecuteRequest) -> OperationsResult<DispatchResult> {
        self.call(ApiRequest::post(format!("{PREFIX}/execute"), body(request)?))
            .await
    }

    pub async fn deploy(&self, metas: Vec<OperatorMeta>) -> OperationsResult<DispatchResult> {
        self.execute_operator(OperatorType::Deploy, metas).await
    }

    pub async fn restart(&self, metas: Vec<OperatorMeta>) -> OperationsResult<DispatchResult> {
        self.execute_operator(OperatorType::Restart, metas).await
    }

    async fn execute_operator(
        &self,
        operator_type: OperatorType,
        metas: Vec<OperatorMeta>,
    ) -> OperationsResult<DispatchResult> {
        let request = ExecuteRequest {
            operator_type: operator_type.as_str().to_string(),
            operator_metas: metas,
            operator_name: None,
        };
        self.execute_task(&request).await
    }

    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> OperationsResult<Page<Task>> {
        let request = ApiRequest::get(format!("{PREFIX}/task/page"))
            .query_opt("operator_type", filter.operator_type.map(|t| t.as_str()))
            .query_opt("task_status", filter.task_status.map(|s| s.as_str()))
            .query_opt("service_id", filter.service_id)
            .query_opt("node_id", filter.node_id)
            .query_opt("project", filter.project.as_deref())
            .query_opt("idc", filter.idc.as_deref())
            .query_opt("module_group", filter.module_group.as_deref())
            .query_opt("created_from", filter.created_from.map(|t| t.to_rfc3339()))
            .query_opt("created_to", filter.created_to.map(|t| t.to_rfc3339()));
        self.call(paged(request, page)).await
    }

    pub async fn recent_tasks(&self, limit: Option<i64>) -> OperationsResult<Vec<Task>> {
        let request = ApiRequest::get(format!("{PREFIX}/task/recent")).query_opt("limit", limit);
        self.call(request).await
    }

    pub async fn get_task(&self, id: i64) -> OperationsResult<TaskDetail> {
        self.call(ApiRequest::get(format!("{PREFIX}/task/{id}"))).await
    }

    pub async fn get_task_log(&self, id: i64) -> OperationsResult<String> {
        self.call(ApiRequest::get(format!("{PREFIX}/task/{id}/log")))
            .await
    }

    pub async fn delete_tasks(&self, ids: &[i64]) -> OperationsResult<u64> {
        let deleted: Deleted = self
            .call(ApiRequest::post(
                format!("{PREFIX}/task/delete"),
                body(&Ids { ids })?,
            ))
            .await?;
        Ok(deleted.deleted)
    }

    pub async fn report_task(
        &self,
        id: i64,
        transition: &TaskTransition,
    ) -> OperationsResult<ReportAck> {
        self.call(ApiRequest::post(
            format!("{PREFIX}/task/{id}/report"),
            body(transition)?,
        ))
        .await
    }
}

fn body<S: Serialize>(value: &S) -> OperationsResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn service_query(request: ApiRequest, filter: &ServiceFilter) -> ApiRequest {
    request
        .query_opt("name", filter.name.as_deref())
        .query_opt("code", filter.code.as_deref())
        .query_opt("enabled", filter.enabled)
        .query_opt("project", filter.project.as_deref())
        .query_opt("module_group", filter.module_group.as_deref())
}

fn paged(request: ApiRequest, page: PageRequest) -> ApiRequest {
    request
        .query("page", page.page)
        .query("page_size", page.page_size)
}
