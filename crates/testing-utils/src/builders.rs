//! 测试数据构建器

use chrono::{DateTime, Utc};
use operations_core::models::{
    Node, OperatorType, Service, ServiceForm, NodeForm, Task, TaskStatus,
};

pub struct ServiceBuilder {
    service: Service,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        let mut service = Service::new("测试服务".to_string(), "test_svc".to_string());
        service.id = 1;
        Self { service }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.service.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.service.name = name.to_string();
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.service.code = code.to_string();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.service.enabled = enabled;
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.service.project = Some(project.to_string());
        self
    }

    pub fn with_module_group(mut self, module_group: &str) -> Self {
        self.service.module_group = Some(module_group.to_string());
        self
    }

    pub fn disabled(self) -> Self {
        self.with_enabled(false)
    }

    pub fn build(self) -> Service {
        self.service
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    pub fn new() -> Self {
        let mut node = Node::new("10.0.0.1".to_string(), 22, vec![1]);
        node.id = 1;
        Self { node }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.node.id = id;
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.node.ip = ip.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.node.port = port;
        self
    }

    pub fn with_services(mut self, service_ids: Vec<i64>) -> Self {
        self.node.service_ids = service_ids;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.node.enabled = enabled;
        self
    }

    pub fn with_idc(mut self, idc: &str) -> Self {
        self.node.idc = Some(idc.to_string());
        self
    }

    pub fn disabled(self) -> Self {
        self.with_enabled(false)
    }

    pub fn build(self) -> Node {
        self.node
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let service = ServiceBuilder::new().build();
        let node = NodeBuilder::new().build();
        let mut task = Task::for_target(OperatorType::Deploy, &service, &node, None);
        task.id = 1;
        Self { task }
    }

    /// 以给定服务模块和节点为目标
    pub fn for_target(operator_type: OperatorType, service: &Service, node: &Node) -> Self {
        Self {
            task: Task::for_target(operator_type, service, node, None),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_operator_type(mut self, operator_type: OperatorType) -> Self {
        self.task.operator_type = operator_type;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.task_status = status;
        if status == TaskStatus::Running {
            self.task.started_at = Some(Utc::now());
        }
        if status.is_terminal() {
            self.task.completed_at = Some(Utc::now());
        }
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.task.progress = progress;
        self
    }

    pub fn with_node(mut self, node_id: i64) -> Self {
        self.task.node_id = node_id;
        self
    }

    pub fn with_service(mut self, service_id: i64) -> Self {
        self.task.service_id = service_id;
        self
    }

    pub fn with_log_path(mut self, log_path: &str) -> Self {
        self.task.log_path = Some(log_path.to_string());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self.task.updated_at = created_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn service_form(name: &str, code: &str) -> ServiceForm {
    ServiceForm {
        name: name.to_string(),
        code: code.to_string(),
        enabled: true,
        description: None,
        project: None,
        module_group: None,
    }
}

pub fn node_form(ip: &str, port: Option<u16>, service_ids: Vec<i64>) -> NodeForm {
    NodeForm {
        service_ids,
        ip: ip.to_string(),
        port,
        enabled: true,
        description: None,
        project: None,
        idc: None,
        tags: None,
    }
}
