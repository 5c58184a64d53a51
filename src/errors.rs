//! Error taxonomy (spec §7). Every variant's `Display` is the taxonomy tag
//! itself so event logs and StepRecord error strings stay grep-able.

use thiserror::Error;

/// A2A / MCP transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("a2a_http_error: HTTP {status} from {endpoint}")]
    A2aHttpError { status: u16, endpoint: String },

    #[error("a2a_invalid_response: {0}")]
    A2aInvalidResponse(String),

    #[error("legacy_http_error: HTTP {status} from {endpoint}")]
    LegacyHttpError { status: u16, endpoint: String },

    #[error("mcp_framing_error: {0}")]
    McpFramingError(String),

    #[error("mcp_protocol_error: code={code} message={message}")]
    McpProtocolError { code: i64, message: String },

    #[error("mcp_server_down: {0}")]
    McpServerDown(String),

    #[error("mcp_spawn_error: {0}")]
    McpSpawnError(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM Envoy failures, surfaced as `Result::Err(LlmError)` from C1's calls
/// and mapped to `PlanError::ParseError` by the Plan Compiler on failure.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("llm_auth_failed")]
    AuthFailed,

    #[error("llm_rate_limited")]
    RateLimited,

    #[error("llm_server_error: HTTP {0}")]
    ServerError(u16),

    #[error("llm_timeout")]
    Timeout,

    #[error("http_error_{0}")]
    HttpError(u16),

    #[error("llm_network_error: {0}")]
    NetworkError(String),

    #[error("llm_invalid_response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan_parse_error: {0}")]
    ParseError(String),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("agent_not_found: {0}")]
    AgentNotFound(String),

    #[error("unknown_action: Unknown action: {0}")]
    UnknownAction(String),

    #[error("no_agents_available")]
    NoAgentsAvailable,
}

/// Config-store problems are always warnings (§4.8); this type exists so
/// callers that want to surface them (tests, admin endpoints) have a typed
/// handle, not so the store can fail loudly.
#[derive(Debug, Error)]
pub enum ConfigWarning {
    #[error("missing_config_key: {0}")]
    MissingKey(String),

    #[error("malformed_config: {0}")]
    Malformed(String),
}
