use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use operations::app::Application;
use operations::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use operations_core::config::{AppConfig, ObservabilityConfig};
use operations_core::logging::init_logging;
use tracing::{error, info, warn};

/// 运维编排服务
#[derive(Debug, Parser)]
#[command(name = "operations", version, about = "服务模块与节点管理、部署重启任务编排")]
struct Cli {
    /// 配置文件路径，未指定时依次尝试默认路径
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 启动服务（默认）
    Serve,
    /// 打印生效的配置
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Serve => serve(config).await,
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    init_logging(&config.observability)?;
    info!("启动运维编排服务 v{}", env!("CARGO_PKG_VERSION"));

    let metrics = install_metrics(&config.observability)?;
    let app = Application::new(config, metrics).await?;
    let listener = app.bind().await?;

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let app_handle = tokio::spawn(async move {
        if let Err(e) = app.run(listener, shutdown_rx).await {
            error!("应用运行失败: {e:#}");
        }
    });

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("运维编排服务已退出");
    Ok(())
}

fn install_metrics(config: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    if !config.metrics_enabled {
        return Ok(None);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")?;
    info!("指标接口: {}", config.metrics_endpoint);
    Ok(Some(handle))
}
