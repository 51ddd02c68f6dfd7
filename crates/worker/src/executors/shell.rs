use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use operations_core::config::ShellExecutorConfig;
use operations_core::errors::{OperationsError, OperationsResult};
use operations_core::models::{OperatorType, TaskStatus, TaskTransition};
use operations_core::traits::{ExecutionBackend, ExecutionRequest, TaskReporter};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{report, ActiveGuard};

const PROGRESS_PREFIX: &str = "PROGRESS";

/// Shell执行器
///
/// 用 `sh -c` 执行按操作类型配置的命令，任务上下文通过环境变量传入：
/// `OPERATIONS_TASK_ID`、`OPERATIONS_OPERATOR`、`OPERATIONS_SERVICE_ID`、
/// `OPERATIONS_SERVICE_CODE`、`OPERATIONS_NODE_ID`、`OPERATIONS_NODE_IP`、
/// `OPERATIONS_NODE_PORT`。输出逐行写入任务日志，`PROGRESS <n>` 行作为进度上报。
pub struct ShellExecutor {
    config: ShellExecutorConfig,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
}

enum RunEnd {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
    Aborted,
}

impl ShellExecutor {
    pub fn new(config: ShellExecutorConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            permits,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn command_for(&self, operator_type: OperatorType) -> Option<&str> {
        match operator_type {
            OperatorType::Deploy => self.config.deploy_command.as_deref(),
            OperatorType::Restart => self.config.restart_command.as_deref(),
        }
        .map(str::trim)
        .filter(|c| !c.is_empty())
    }

    /// 解析 `PROGRESS <n>` 行
    pub fn parse_progress(line: &str) -> Option<u8> {
        let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        rest.trim().parse::<u8>().ok().filter(|p| *p <= 100)
    }

    fn build_command(
        command: &str,
        working_dir: Option<&str>,
        request: &ExecutionRequest,
    ) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env("OPERATIONS_TASK_ID", request.task_id.to_string())
            .env("OPERATIONS_OPERATOR", request.operator_type.as_str())
            .env("OPERATIONS_SERVICE_ID", request.service_id.to_string())
            .env("OPERATIONS_SERVICE_CODE", &request.service_code)
            .env("OPERATIONS_NODE_ID", request.node_id.to_string())
            .env("OPERATIONS_NODE_IP", &request.ip)
            .env("OPERATIONS_NODE_PORT", request.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>, prefix: &'static str)
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(format!("{prefix}{line}")).is_err() {
                break;
            }
        }
    }

    async fn run(
        command: String,
        working_dir: Option<String>,
        limit: Duration,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) {
        let task_id = request.task_id;
        let reporter = reporter.as_ref();

        let started = TaskTransition::running(0).with_log(format!(
            "开始执行{}任务: {}",
            request.operator_type.display_name(),
            command
        ));
        if !report(reporter, task_id, started).await {
            return;
        }

        let mut child = match Self::build_command(&command, working_dir.as_deref(), &request).spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("任务 {} 启动命令失败: {}", task_id, e);
                let message = format!("启动命令失败: {e}");
                report(reporter, task_id, TaskTransition::failed(&message).with_log(&message))
                    .await;
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::forward_lines(stdout, tx.clone(), ""));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::forward_lines(stderr, tx.clone(), "[stderr] "));
        }
        drop(tx);

        let work = async {
            while let Some(line) = rx.recv().await {
                let transition = match Self::parse_progress(&line) {
                    Some(progress) => TaskTransition::running(progress).with_log(line),
                    None => TaskTransition::to(TaskStatus::Running).with_log(line),
                };
                if !report(reporter, task_id, transition).await {
                    return RunEnd::Aborted;
                }
            }
            match child.wait().await {
                Ok(status) => RunEnd::Exited(status),
                Err(e) => RunEnd::WaitFailed(e),
            }
        };
        let outcome = timeout(limit, work).await;

        let finished = match outcome {
            Ok(RunEnd::Exited(status)) if status.success() => {
                TaskTransition::succeeded().with_log("任务执行成功")
            }
            Ok(RunEnd::Exited(status)) => {
                let message = match status.code() {
                    Some(code) => format!("命令执行失败，退出码: {code}"),
                    None => "命令被信号终止".to_string(),
                };
                TaskTransition::failed(&message).with_log(&message)
            }
            Ok(RunEnd::WaitFailed(e)) => {
                let message = format!("等待命令结束失败: {e}");
                TaskTransition::failed(&message).with_log(&message)
            }
            Ok(RunEnd::Aborted) => {
                if let Err(e) = child.kill().await {
                    warn!("任务 {} 终止命令失败: {}", task_id, e);
                }
                return;
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("任务 {} 终止超时命令失败: {}", task_id, e);
                }
                let message = format!("执行超时({}秒)", limit.as_secs());
                TaskTransition::failed(&message).with_log(&message)
            }
        };

        debug!("Shell任务 {} 结束: {}", task_id, finished.status);
        report(reporter, task_id, finished).await;
    }
}

#[async_trait]
impl ExecutionBackend for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn submit(
        &self,
        request: ExecutionRequest,
        reporter: Arc<dyn TaskReporter>,
    ) -> OperationsResult<()> {
        let command = self
            .command_for(request.operator_type)
            .ok_or_else(|| {
                OperationsError::backend_unavailable(format!(
                    "未配置{}命令",
                    request.operator_type.display_name()
                ))
            })?
            .to_string();

        info!(
            "提交Shell任务: task_id={}, operator={}, node={}:{}",
            request.task_id, request.operator_type, request.ip, request.port
        );
        counter!("operations_backend_submissions_total", "backend" => "shell").increment(1);

        let guard = ActiveGuard::enter(&self.active);
        let permits = self.permits.clone();
        let working_dir = self.config.working_dir.clone();
        let limit = Duration::from_secs(self.config.timeout_seconds.max(1));

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let message = "执行器已关闭";
                    report(
                        reporter.as_ref(),
                        request.task_id,
                        TaskTransition::failed(message).with_log(message),
                    )
                    .await;
                    return;
                }
            };
            Self::run(command, working_dir, limit, request, reporter).await;
        });
        Ok(())
    }

    fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
