//! External interfaces (§6): `POST /task` (batch or SSE, selected by
//! `Accept`), health/status/admin endpoints. Grounded in the teacher's
//! `server/routes.rs` (`AppState` Clone-of-Arcs pattern, `CorsLayer`,
//! `(StatusCode, Json<Value>)` error bodies, `tower::ServiceExt::oneshot`
//! router tests).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;

use crate::a2a::A2aClient;
use crate::config::ConfigStore;
use crate::llm::LlmEnvoy;
use crate::mcp::McpClient;
use crate::registry::AgentRegistry;
use crate::task::TaskManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub registry: Arc<AgentRegistry>,
    pub a2a: Arc<A2aClient>,
    pub mcp: Arc<McpClient>,
    pub llm: Arc<LlmEnvoy>,
    pub tasks: Arc<TaskManager>,
    pub started_at: Instant,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/task", post(submit_task))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/task/:id", get(get_task))
        .route("/admin/rediscover", post(admin_rediscover))
        .route("/admin/agents", get(admin_agents))
        .route("/admin/mcp-servers", get(admin_mcp_servers))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct TaskRequest {
    description: String,
    #[serde(flatten)]
    context: Value,
}

async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<TaskRequest>,
) -> Response {
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    if wants_stream {
        let rx = state.tasks.submit(body.description, body.context);
        let stream = UnboundedReceiverStream::new(rx)
            .map(|ev| Ok::<Event, Infallible>(Event::default().data(sse_payload(&ev))));
        Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        let result = state.tasks.submit_batch(body.description, body.context).await;
        Json(result).into_response()
    }
}

fn sse_payload(ev: &crate::events::TaskEvent) -> String {
    serde_json::to_string(ev).unwrap_or_else(|_| "{}".to_string())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "llm_ready": state.llm.is_ready(),
        "discovered_agents": state.registry.len(),
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let agents: Vec<Value> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|a| json!({ "agent_id": a.agent_id, "endpoint": a.endpoint, "protocol": a.protocol }))
        .collect();
    Json(json!({
        "discovered_agents": agents.len(),
        "agents": agents,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.get(&id) {
        Some(task) => Json(task.read().await.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("task {id} not found") }))).into_response(),
    }
}

async fn admin_rediscover(State(state): State<AppState>) -> Json<Value> {
    let updated = state.registry.refresh(&state.a2a).await;
    Json(json!({ "refreshed": updated, "total_agents": state.registry.len() }))
}

#[derive(Debug, Deserialize)]
struct AgentsQuery {
    agent_id: Option<String>,
}

async fn admin_agents(State(state): State<AppState>, Query(q): Query<AgentsQuery>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    let filtered: Vec<Value> = snapshot
        .into_iter()
        .filter(|a| q.agent_id.as_deref().is_none_or(|id| id == a.agent_id))
        .map(|a| {
            json!({
                "agent_id": a.agent_id,
                "endpoint": a.endpoint,
                "protocol": a.protocol,
                "discovery_method": a.discovery_method,
                "capabilities": a.capabilities,
            })
        })
        .collect();
    Json(json!({ "agents": filtered }))
}

async fn admin_mcp_servers(State(state): State<AppState>) -> Json<Value> {
    let servers = state.mcp.known_servers().await;
    Json(json!({ "servers": servers }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskManagerDeps;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = Arc::new(ConfigStore::default());
        let registry = Arc::new(AgentRegistry::new(&config));
        let a2a = Arc::new(A2aClient::new(Duration::from_secs(1), Duration::from_secs(1)));
        let mcp = Arc::new(McpClient::new(&config));
        let llm = Arc::new(LlmEnvoy::new(&config));
        let tasks = Arc::new(TaskManager::new(TaskManagerDeps {
            registry: registry.clone(),
            a2a: a2a.clone(),
            mcp: mcp.clone(),
            llm: llm.clone(),
        }));
        AppState { config, registry, a2a, mcp, llm, tasks, started_at: Instant::now() }
    }

    #[tokio::test]
    async fn health_endpoint_reports_zero_agents_initially() {
        let app = app_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["discovered_agents"], 0);
    }

    #[tokio::test]
    async fn get_task_404_for_unknown_id() {
        let app = app_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/task/task_999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_mcp_servers_lists_declared_servers() {
        let app = app_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/admin/mcp-servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
