use serde::{Deserialize, Serialize};

/// 派发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 单次请求展开后的目标上限
    pub max_targets_per_request: usize,
    /// 任务超过该时长仍未结束则判定失败，0 表示不监督
    pub task_timeout_seconds: u64,
    pub supervise_interval_seconds: u64,
    /// 启动时把上次进程遗留的未结束任务置为失败
    pub recover_on_startup: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_targets_per_request: 500,
            task_timeout_seconds: 3600,
            supervise_interval_seconds: 60,
            recover_on_startup: true,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_targets_per_request == 0 {
            return Err(anyhow::anyhow!("单次请求目标上限必须大于0"));
        }

        if self.task_timeout_seconds > 0 && self.supervise_interval_seconds == 0 {
            return Err(anyhow::anyhow!("启用任务超时监督时检查间隔必须大于0"));
        }

        Ok(())
    }
}

/// 执行后端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// simulated、shell 或 agent
    pub backend: String,
    pub simulated: SimulatedExecutorConfig,
    pub shell: ShellExecutorConfig,
    pub agent: AgentExecutorConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: "simulated".to_string(),
            simulated: SimulatedExecutorConfig::default(),
            shell: ShellExecutorConfig::default(),
            agent: AgentExecutorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedExecutorConfig {
    pub deploy_failure_rate: f64,
    pub restart_failure_rate: f64,
    pub step_delay_min_ms: u64,
    pub step_delay_max_ms: u64,
}

impl Default for SimulatedExecutorConfig {
    fn default() -> Self {
        Self {
            deploy_failure_rate: 0.2,
            restart_failure_rate: 0.15,
            step_delay_min_ms: 1000,
            step_delay_max_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellExecutorConfig {
    pub deploy_command: Option<String>,
    pub restart_command: Option<String>,
    pub working_dir: Option<String>,
    pub timeout_seconds: u64,
    pub max_concurrent: usize,
}

impl Default for ShellExecutorConfig {
    fn default() -> Self {
        Self {
            deploy_command: None,
            restart_command: None,
            working_dir: None,
            timeout_seconds: 600,
            max_concurrent: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentExecutorConfig {
    pub url: Option<String>,
    pub request_timeout_seconds: u64,
    /// Agent 回报状态时使用的本服务地址
    pub report_base_url: Option<String>,
}

impl Default for AgentExecutorConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_seconds: 10,
            report_base_url: None,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_backends = ["simulated", "shell", "agent"];
        if !valid_backends.contains(&self.backend.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的执行后端: {}，支持的后端: {:?}",
                self.backend,
                valid_backends
            ));
        }

        let sim = &self.simulated;
        for rate in [sim.deploy_failure_rate, sim.restart_failure_rate] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(anyhow::anyhow!("失败率必须在0到1之间: {rate}"));
            }
        }
        if sim.step_delay_min_ms > sim.step_delay_max_ms {
            return Err(anyhow::anyhow!("步骤最小延迟不能大于最大延迟"));
        }

        if self.backend == "shell" {
            if self.shell.timeout_seconds == 0 {
                return Err(anyhow::anyhow!("Shell执行超时时间必须大于0"));
            }
            if self.shell.max_concurrent == 0 {
                return Err(anyhow::anyhow!("Shell最大并发数必须大于0"));
            }
        }

        if self.backend == "agent" {
            match self.agent.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                _ => return Err(anyhow::anyhow!("Agent地址必须是http(s)格式")),
            }
            if self.agent.request_timeout_seconds == 0 {
                return Err(anyhow::anyhow!("Agent请求超时时间必须大于0"));
            }
        }

        Ok(())
    }
}

/// 任务日志存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    pub directory: String,
    /// 日志保留天数，0 表示不清理
    pub keep_days: u32,
    pub cleanup_interval_seconds: u64,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            directory: "logs/tasks".to_string(),
            keep_days: 7,
            cleanup_interval_seconds: 3600,
        }
    }
}

impl LogStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.directory.trim().is_empty() {
            return Err(anyhow::anyhow!("日志目录不能为空"));
        }
        if self.keep_days > 0 && self.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("启用日志清理时清理间隔必须大于0"));
        }
        Ok(())
    }
}
