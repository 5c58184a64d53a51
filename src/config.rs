//! Config Store (C8). Single source of truth for timeouts, discovery
//! endpoints, MCP server definitions, and LLM provider params. Loaded once at
//! startup from `config/system.yaml` + `config/mcp_servers.json`, searched in
//! `./`, `../`, `../../` (§6). Malformed entries are logged and defaulted,
//! never fatal (§4.8).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const SEARCH_DIRS: [&str; 3] = ["./", "../", "../../"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    AgentCommunication,
    LlmApi,
    McpTools,
    HttpRequest,
    TaskProcessing,
    HealthCheck,
    AgentDiscovery,
}

impl TimeoutKind {
    fn key(self) -> &'static str {
        match self {
            TimeoutKind::AgentCommunication => "agent_communication",
            TimeoutKind::LlmApi => "llm_api",
            TimeoutKind::McpTools => "mcp_tools",
            TimeoutKind::HttpRequest => "http_request",
            TimeoutKind::TaskProcessing => "task_processing",
            TimeoutKind::HealthCheck => "health_check",
            TimeoutKind::AgentDiscovery => "agent_discovery",
        }
    }

    fn default_secs(self) -> u64 {
        match self {
            TimeoutKind::AgentCommunication => 600,
            TimeoutKind::LlmApi => 600,
            TimeoutKind::McpTools => 600,
            TimeoutKind::HttpRequest => 600,
            TimeoutKind::TaskProcessing => 1800,
            TimeoutKind::HealthCheck => 30,
            TimeoutKind::AgentDiscovery => 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SystemFile {
    #[serde(default)]
    timeouts: HashMap<String, u64>,
    #[serde(default)]
    discovery_endpoints: Vec<String>,
    #[serde(default)]
    llm: LlmFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LlmFile {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct McpServersFile {
    #[serde(default)]
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, McpServerFileEntry>,
    /// Some hand-written configs put the map at the top level instead of
    /// nested under `mcpServers`; both are accepted.
    #[serde(flatten)]
    top_level: HashMap<String, McpServerFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct McpServerFileEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct McpServerDef {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Loaded once at startup; cheap to clone (`Arc` it at the call sites that
/// need to share it, as `AppState` does).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    timeouts: HashMap<String, u64>,
    discovery_endpoints: Vec<String>,
    mcp_servers: HashMap<String, McpServerDef>,
    llm: LlmConfig,
    pub agent_port: u16,
}

impl Default for ConfigStore {
    fn default() -> Self {
        ConfigStore {
            timeouts: HashMap::new(),
            discovery_endpoints: Vec::new(),
            mcp_servers: HashMap::new(),
            llm: LlmConfig {
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                max_tokens: 1024,
                temperature: 0.2,
            },
            agent_port: 8080,
        }
    }
}

impl ConfigStore {
    /// Searches `./`, `../`, `../../` for `config/system.yaml` and
    /// `config/mcp_servers.json`; missing files fall back to defaults.
    pub fn load() -> Self {
        let mut store = ConfigStore::default();

        if let Some(path) = find_file("config/system.yaml") {
            match std::fs::read_to_string(&path) {
                Ok(text) => match serde_yaml::from_str::<SystemFile>(&text) {
                    Ok(parsed) => store.apply_system_file(parsed),
                    Err(err) => {
                        tracing::warn!(%err, path = %path.display(), "malformed_config: system.yaml");
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, path = %path.display(), "failed to read system.yaml");
                }
            }
        } else {
            tracing::warn!("missing_config_key: config/system.yaml not found, using defaults");
        }

        if let Some(path) = find_file("config/mcp_servers.json") {
            match std::fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str::<McpServersFile>(&text) {
                    Ok(parsed) => store.apply_mcp_file(parsed),
                    Err(err) => {
                        tracing::warn!(%err, path = %path.display(), "malformed_config: mcp_servers.json");
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, path = %path.display(), "failed to read mcp_servers.json");
                }
            }
        } else {
            tracing::warn!("missing_config_key: config/mcp_servers.json not found");
        }

        store.apply_env_overrides();
        store.validate();
        store
    }

    fn apply_system_file(&mut self, file: SystemFile) {
        for (k, v) in file.timeouts {
            self.timeouts.insert(k, v);
        }
        if !file.discovery_endpoints.is_empty() {
            self.discovery_endpoints = file.discovery_endpoints;
        }
        if let Some(v) = file.llm.api_key {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = file.llm.model {
            self.llm.model = v;
        }
        if let Some(v) = file.llm.base_url {
            self.llm.base_url = v;
        }
        if let Some(v) = file.llm.max_tokens {
            self.llm.max_tokens = v;
        }
        if let Some(v) = file.llm.temperature {
            self.llm.temperature = v;
        }
    }

    fn apply_mcp_file(&mut self, file: McpServersFile) {
        let entries = if !file.mcp_servers.is_empty() {
            file.mcp_servers
        } else {
            file.top_level
        };
        for (name, entry) in entries {
            self.mcp_servers.insert(
                name.clone(),
                McpServerDef {
                    name,
                    command: entry.command,
                    args: entry.args,
                    env: entry.env,
                    description: entry.description,
                },
            );
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("AGENT_PORT") {
            match port.parse() {
                Ok(p) => self.agent_port = p,
                Err(_) => tracing::warn!(%port, "malformed_config: AGENT_PORT is not a valid u16"),
            }
        }
        for key in ["OPENAI_API_KEY", "LLM_API_KEY"] {
            if let Ok(v) = std::env::var(key) {
                self.llm.api_key = Some(v);
                break;
            }
        }
    }

    /// Warn-only sanity checks; never aborts startup (§4.8).
    fn validate(&self) {
        if let Some(key) = &self.llm.api_key {
            if key.trim().is_empty() {
                tracing::warn!("malformed_config: llm api_key is empty");
            }
        }
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://") {
            tracing::warn!(base_url = %self.llm.base_url, "malformed_config: llm base_url missing scheme");
        }
    }

    pub fn timeout(&self, kind: TimeoutKind) -> Duration {
        match self.timeouts.get(kind.key()) {
            Some(secs) => Duration::from_secs(*secs),
            None => {
                tracing::warn!(key = kind.key(), "missing_config_key: using default timeout");
                Duration::from_secs(kind.default_secs())
            }
        }
    }

    pub fn discovery_endpoints(&self) -> &[String] {
        &self.discovery_endpoints
    }

    pub fn mcp_servers(&self) -> &HashMap<String, McpServerDef> {
        &self.mcp_servers
    }

    pub fn llm(&self) -> &LlmConfig {
        &self.llm
    }
}

fn find_file(relative: &str) -> Option<PathBuf> {
    for dir in SEARCH_DIRS {
        let candidate = Path::new(dir).join(relative);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_files_present() {
        let store = ConfigStore::default();
        assert_eq!(store.timeout(TimeoutKind::HealthCheck), Duration::from_secs(30));
        assert_eq!(store.timeout(TimeoutKind::TaskProcessing), Duration::from_secs(1800));
        assert!(store.discovery_endpoints().is_empty());
    }

    #[test]
    fn missing_timeout_key_falls_back_to_default() {
        let mut store = ConfigStore::default();
        store.timeouts.insert("agent_communication".to_string(), 42);
        assert_eq!(store.timeout(TimeoutKind::AgentCommunication), Duration::from_secs(42));
        assert_eq!(store.timeout(TimeoutKind::LlmApi), Duration::from_secs(600));
    }

    #[test]
    fn mcp_servers_file_parses_nested_shape() {
        let raw = r#"{"mcpServers": {"fs": {"command": "node", "args": ["server.js"], "env": {}, "description": "filesystem tools"}}}"#;
        let parsed: McpServersFile = serde_json::from_str(raw).unwrap();
        let mut store = ConfigStore::default();
        store.apply_mcp_file(parsed);
        assert!(store.mcp_servers().contains_key("fs"));
        assert_eq!(store.mcp_servers()["fs"].command, "node");
    }
}
