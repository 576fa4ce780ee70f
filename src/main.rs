//! metachat HTTP 服务
//!
//! 入口：初始化日志、加载配置、构建组件、启动会话回收任务，并在 Ctrl+C / SIGTERM 时优雅退出。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metachat::agent::{create_agent_components, ChatService};
use metachat::config::load_config;
use metachat::core::{ShutdownManager, ShutdownReason};
use metachat::session::spawn_sweeper;
use metachat::{observability, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    // 可选：第一个参数为额外的配置文件路径
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let components = create_agent_components(&cfg);
    tracing::info!(
        gateway = components.engine.gateway_name(),
        max_tool_iterations = components.engine.limits().max_tool_iterations,
        max_remediation_attempts = components.engine.limits().max_remediation_attempts,
        "orchestrator ready"
    );

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let sweeper = spawn_sweeper(
        Arc::clone(&components.registry),
        Duration::from_secs(cfg.server.session_ttl_secs),
        Duration::from_secs(cfg.server.sweep_interval_secs),
        shutdown.token(),
    );

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .context("Invalid server host/port")?;
    let service = ChatService::new(Arc::clone(&components.registry));

    let served = server::serve(addr, service, shutdown.token()).await;
    match &served {
        Err(e) => shutdown.shutdown(ShutdownReason::FatalError(e.to_string())),
        Ok(()) => shutdown.shutdown(ShutdownReason::UserInitiated),
    }

    let _ = sweeper.await;
    let dropped = components.registry.clear().await;
    tracing::info!(sessions = dropped, "shutdown complete");

    served.with_context(|| format!("HTTP server on {} failed", addr))
}
