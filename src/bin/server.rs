use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_coordinator::a2a::A2aClient;
use agent_coordinator::config::{ConfigStore, TimeoutKind};
use agent_coordinator::llm::LlmEnvoy;
use agent_coordinator::mcp::McpClient;
use agent_coordinator::registry::{run_discovery_loop, AgentRegistry};
use agent_coordinator::server::{app_router, AppState};
use agent_coordinator::task::{TaskManager, TaskManagerDeps};

const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,agent_coordinator=debug")),
        )
        .init();

    let config = Arc::new(ConfigStore::load());
    let registry = Arc::new(AgentRegistry::new(&config));
    let a2a = Arc::new(A2aClient::new(
        config.timeout(TimeoutKind::AgentDiscovery),
        config.timeout(TimeoutKind::AgentCommunication),
    ));
    let mcp = Arc::new(McpClient::new(&config));
    let llm = Arc::new(LlmEnvoy::new(&config));

    let tasks = Arc::new(TaskManager::new(TaskManagerDeps {
        registry: registry.clone(),
        a2a: a2a.clone(),
        mcp: mcp.clone(),
        llm: llm.clone(),
    }));

    let discovery_handle = tokio::spawn(run_discovery_loop(registry.clone(), a2a.clone(), DISCOVERY_INTERVAL));

    let state = AppState {
        config: config.clone(),
        registry,
        a2a,
        mcp: mcp.clone(),
        llm,
        tasks,
        started_at: Instant::now(),
    };

    let app = app_router(state);
    let port = config.agent_port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(%port, "coordinator listening");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    discovery_handle.abort();
    mcp.shutdown_all().await;
    tracing::info!("coordinator shut down cleanly");
    Ok(())
}
