use std::sync::Arc;

use operations_core::config::ExecutorConfig;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::traits::ExecutionBackend;
use tracing::info;

use crate::executors::{AgentExecutor, ShellExecutor, SimulatedExecutor};

/// 按配置创建执行后端
pub fn create_backend(config: &ExecutorConfig) -> OperationsResult<Arc<dyn ExecutionBackend>> {
    let backend: Arc<dyn ExecutionBackend> = match config.backend.as_str() {
        "simulated" => Arc::new(SimulatedExecutor::new(config.simulated.clone())),
        "shell" => Arc::new(ShellExecutor::new(config.shell.clone())),
        "agent" => Arc::new(AgentExecutor::new(&config.agent)?),
        other => {
            return Err(OperationsError::config_error(format!(
                "未知的执行后端: {other}"
            )))
        }
    };
    info!("执行后端: {}", backend.name());
    Ok(backend)
}
