use std::collections::HashSet;
use std::sync::Arc;

use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{
    Node, NodeFilter, NodeForm, Page, PageRequest, Service, ServiceFilter, ServiceForm,
    ServiceWithNodes,
};
use operations_core::traits::{NodeRepository, ServiceRepository, TaskRepository};
use tracing::{debug, info, instrument};

/// 服务模块与节点的存储服务
///
/// 在仓储之上实现校验和关联规则：编码唯一且不可修改、节点地址唯一、
/// 删除服务模块前必须没有挂载节点、删除节点前不能有未结束的任务。
pub struct EntityStore {
    service_repo: Arc<dyn ServiceRepository>,
    node_repo: Arc<dyn NodeRepository>,
    task_repo: Arc<dyn TaskRepository>,
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl EntityStore {
    pub fn new(
        service_repo: Arc<dyn ServiceRepository>,
        node_repo: Arc<dyn NodeRepository>,
        task_repo: Arc<dyn TaskRepository>,
    ) -> Self {
        Self {
            service_repo,
            node_repo,
            task_repo,
        }
    }

    // ---------------------------------------------------------------- 服务模块

    #[instrument(skip(self, form), fields(code = %form.code))]
    pub async fn create_service(&self, form: ServiceForm) -> OperationsResult<Service> {
        let form = form.normalized()?;

        if self.service_repo.get_by_name(&form.name).await?.is_some() {
            return Err(OperationsError::conflict(format!(
                "服务模块名称已存在: {}",
                form.name
            )));
        }
        if self.service_repo.get_by_code(&form.code).await?.is_some() {
            return Err(OperationsError::conflict(format!(
                "服务模块编码已存在: {}",
                form.code
            )));
        }

        let mut service = Service::new(form.name, form.code);
        service.enabled = form.enabled;
        service.description = form.description;
        service.project = form.project;
        service.module_group = form.module_group;

        let created = self.service_repo.create(&service).await?;
        info!("创建服务模块: {} ({})", created.name, created.code);
        Ok(created)
    }

    #[instrument(skip(self, form))]
    pub async fn update_service(&self, id: i64, form: ServiceForm) -> OperationsResult<Service> {
        let existing = self.get_service(id).await?;
        let form = form.normalized()?;

        if form.code != existing.code {
            return Err(OperationsError::validation(format!(
                "服务模块编码创建后不可修改: {} -> {}",
                existing.code, form.code
            )));
        }
        if let Some(other) = self.service_repo.get_by_name(&form.name).await? {
            if other.id != id {
                return Err(OperationsError::conflict(format!(
                    "服务模块名称已存在: {}",
                    form.name
                )));
            }
        }

        let mut service = existing;
        service.name = form.name;
        service.enabled = form.enabled;
        service.description = form.description;
        service.project = form.project;
        service.module_group = form.module_group;

        self.service_repo.update(&service).await
    }

    pub async fn get_service(&self, id: i64) -> OperationsResult<Service> {
        self.service_repo
            .get_by_id(id)
            .await?
            .ok_or(OperationsError::ServiceNotFound { id })
    }

    /// 服务模块详情，节点列表与服务树来自同一次读取
    pub async fn service_detail(&self, id: i64) -> OperationsResult<ServiceWithNodes> {
        let service = self.get_service(id).await?;
        let filter = ServiceFilter {
            code: Some(service.code),
            ..Default::default()
        };
        self.service_repo
            .service_tree(&filter)
            .await?
            .into_iter()
            .find(|entry| entry.service.id == id)
            .ok_or(OperationsError::ServiceNotFound { id })
    }

    /// 批量删除服务模块
    ///
    /// 任一服务模块不存在或仍挂载节点时整体拒绝，不会隐式解除节点关联。
    #[instrument(skip(self))]
    pub async fn delete_services(&self, ids: &[i64]) -> OperationsResult<u64> {
        if ids.is_empty() {
            return Err(OperationsError::validation("请选择要删除的服务模块"));
        }
        let ids = dedup_ids(ids);

        let found = self.service_repo.get_by_ids(&ids).await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|s| s.id == **id)) {
            return Err(OperationsError::ServiceNotFound { id: *missing });
        }

        for service in &found {
            let node_count = self.node_repo.count_by_service(service.id).await?;
            if node_count > 0 {
                return Err(OperationsError::conflict(format!(
                    "服务模块 {} 下仍有 {} 个节点，请先解除节点关联",
                    service.name, node_count
                )));
            }
        }

        let deleted = self.service_repo.delete_many(&ids).await?;
        info!("删除服务模块 {} 个: {:?}", deleted, ids);
        Ok(deleted)
    }

    pub async fn list_services(
        &self,
        filter: &ServiceFilter,
        page: PageRequest,
    ) -> OperationsResult<Page<Service>> {
        let (items, total) = self.service_repo.list(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn service_tree(
        &self,
        filter: &ServiceFilter,
    ) -> OperationsResult<Vec<ServiceWithNodes>> {
        self.service_repo.service_tree(filter).await
    }

    // ---------------------------------------------------------------- 节点

    #[instrument(skip(self, form), fields(ip = %form.ip))]
    pub async fn create_node(&self, form: NodeForm) -> OperationsResult<Node> {
        let form = form.normalized()?;
        self.ensure_services_exist(&form.service_ids).await?;

        let port = form.port_or_default();
        if self.node_repo.find_by_address(&form.ip, port).await?.is_some() {
            return Err(OperationsError::conflict(format!(
                "节点已存在: {}:{}",
                form.ip, port
            )));
        }

        let mut node = Node::new(form.ip, port, form.service_ids);
        node.enabled = form.enabled;
        node.description = form.description;
        node.project = form.project;
        node.idc = form.idc;
        node.tags = form.tags;

        let created = self.node_repo.create(&node).await?;
        info!(
            "创建节点: {} 服务模块 {:?}",
            created.address(),
            created.service_ids
        );
        Ok(created)
    }

    #[instrument(skip(self, form))]
    pub async fn update_node(&self, id: i64, form: NodeForm) -> OperationsResult<Node> {
        let existing = self.get_node(id).await?;
        let form = form.normalized()?;
        self.ensure_services_exist(&form.service_ids).await?;

        let port = form.port_or_default();
        if let Some(other) = self.node_repo.find_by_address(&form.ip, port).await? {
            if other.id != id {
                return Err(OperationsError::conflict(format!(
                    "节点已存在: {}:{}",
                    form.ip, port
                )));
            }
        }

        let mut node = existing;
        node.ip = form.ip;
        node.port = port;
        node.service_ids = form.service_ids;
        node.enabled = form.enabled;
        node.description = form.description;
        node.project = form.project;
        node.idc = form.idc;
        node.tags = form.tags;

        self.node_repo.update(&node).await
    }

    pub async fn get_node(&self, id: i64) -> OperationsResult<Node> {
        self.node_repo
            .get_by_id(id)
            .await?
            .ok_or(OperationsError::NodeNotFound { id })
    }

    /// 批量删除节点，节点上有未结束的任务时整体拒绝
    #[instrument(skip(self))]
    pub async fn delete_nodes(&self, ids: &[i64]) -> OperationsResult<u64> {
        if ids.is_empty() {
            return Err(OperationsError::validation("请选择要删除的节点"));
        }
        let ids = dedup_ids(ids);

        let found = self.node_repo.get_by_ids(&ids).await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|n| n.id == **id)) {
            return Err(OperationsError::NodeNotFound { id: *missing });
        }

        let active = self.task_repo.count_active_by_nodes(&ids).await?;
        if active > 0 {
            return Err(OperationsError::conflict(format!(
                "所选节点上仍有 {active} 个任务未结束，不能删除"
            )));
        }

        let deleted = self.node_repo.delete_many(&ids).await?;
        info!("删除节点 {} 个: {:?}", deleted, ids);
        Ok(deleted)
    }

    pub async fn list_nodes(
        &self,
        filter: &NodeFilter,
        page: PageRequest,
    ) -> OperationsResult<Page<Node>> {
        let (items, total) = self.node_repo.list(filter, page).await?;
        Ok(Page::new(items, total, page))
    }

    /// 显式解除节点与服务模块的关联
    #[instrument(skip(self))]
    pub async fn detach_node(&self, service_id: i64, node_id: i64) -> OperationsResult<Node> {
        self.get_service(service_id).await?;
        let node = self.get_node(node_id).await?;
        if !node.belongs_to(service_id) {
            return Err(OperationsError::validation(format!(
                "节点 {node_id} 不属于服务模块 {service_id}"
            )));
        }

        self.node_repo.detach(service_id, node_id).await?;
        debug!("节点 {} 已解除与服务模块 {} 的关联", node_id, service_id);
        self.get_node(node_id).await
    }

    async fn ensure_services_exist(&self, service_ids: &[i64]) -> OperationsResult<()> {
        let found = self.service_repo.get_by_ids(service_ids).await?;
        match service_ids
            .iter()
            .find(|id| !found.iter().any(|s| s.id == **id))
        {
            Some(missing) => Err(OperationsError::validation(format!(
                "服务模块不存在: {missing}"
            ))),
            None => Ok(()),
        }
    }
}
