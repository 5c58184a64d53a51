//! MCP Protocol Client (C2). Per-server child-process lifecycle and
//! JSON-RPC 2.0 framing over stdio (§4.2), ported from the real lifecycle in
//! `original_source/common-agent/src/mcp/mcp_protocol_client.py` — the
//! teacher's own `mcp/client.rs`/`mcp/transports/stdio.rs` are stubs
//! ("MCP SDK integration pending") that never actually speak JSON-RPC.

use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use crate::config::{ConfigStore, McpServerDef, TimeoutKind};
use crate::errors::TransportError;

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "agent-coordinator";
const CLIENT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpServerState {
    Declared,
    Running,
    Listed,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

struct RunningProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

struct ServerSlot {
    def: McpServerDef,
    state: McpServerState,
    process: Option<RunningProcess>,
    tools: Vec<ToolDescriptor>,
}

impl ServerSlot {
    fn declared(def: McpServerDef) -> Self {
        ServerSlot { def, state: McpServerState::Declared, process: None, tools: Vec::new() }
    }
}

/// Holds one live child process per server name. Request IDs are a single
/// counter shared across all servers (scoped per client instance, not per
/// server — §4.2); operations on the same server are serialized via that
/// server's own `Mutex`, so different servers make progress independently.
pub struct McpClient {
    servers: DashMap<String, Mutex<ServerSlot>>,
    next_id: AtomicI64,
    tools_timeout: Duration,
}

#[derive(Debug, serde::Serialize)]
pub struct McpServerSummary {
    pub name: String,
    pub description: Option<String>,
    pub state: &'static str,
    pub tool_count: usize,
}

impl McpClient {
    pub fn new(config: &ConfigStore) -> Self {
        let servers = DashMap::new();
        for (name, def) in config.mcp_servers() {
            servers.insert(name.clone(), Mutex::new(ServerSlot::declared(def.clone())));
        }
        McpClient {
            servers,
            next_id: AtomicI64::new(1),
            tools_timeout: config.timeout(TimeoutKind::McpTools),
        }
    }

    fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Best-effort `tools/list` discovery (C2 lifecycle step 3, §4.2) against
    /// every declared server. Called before system-context building so the
    /// tool cache is actually populated by the time planning and step
    /// execution need it; servers that fail to spawn are simply skipped.
    pub async fn ensure_all_listed(&self) {
        let names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let _ = self.ensure_listed(&name).await;
        }
    }

    pub async fn known_servers(&self) -> Vec<McpServerSummary> {
        let names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let entry = self.servers.get(&name).expect("just listed");
            let slot = entry.value().lock().await;
            out.push(McpServerSummary {
                name: name.clone(),
                description: slot.def.description.clone(),
                state: state_name(slot.state),
                tool_count: slot.tools.len(),
            });
        }
        out
    }

    /// Tools cached by a prior `tools/list`, scanning every known server.
    /// Used by the Plan Compiler to build `SystemContext` even for servers
    /// whose lazy discovery hasn't run yet (they just contribute zero tools).
    pub async fn cached_tools(&self) -> Vec<(String, ToolDescriptor)> {
        let names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        let mut out = Vec::new();
        for name in names {
            let entry = self.servers.get(&name).expect("just listed");
            let slot = entry.value().lock().await;
            for tool in &slot.tools {
                out.push((name.clone(), tool.clone()));
            }
        }
        out
    }

    /// Finds the server advertising a tool named `tool_name`, for `target`
    /// strings without a `:` separator (§4.6).
    pub async fn find_server_for_tool(&self, tool_name: &str) -> Option<String> {
        let names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let entry = self.servers.get(&name).expect("just listed");
            let slot = entry.value().lock().await;
            if slot.tools.iter().any(|t| t.name == tool_name) {
                return Some(name);
            }
        }
        None
    }

    /// Spawns the server if not already running, performs `initialize` +
    /// `notifications/initialized`, and calls `tools/list`, caching the
    /// result. Idempotent: a server already `Listed` is a no-op.
    pub async fn ensure_listed(&self, server_name: &str) -> Result<Vec<ToolDescriptor>, TransportError> {
        let Some(entry) = self.servers.get(server_name) else {
            return Err(TransportError::McpSpawnError(format!("unknown server: {server_name}")));
        };
        let mut slot = entry.value().lock().await;

        if slot.state == McpServerState::Listed {
            return Ok(slot.tools.clone());
        }

        if slot.process.is_none() {
            spawn_process(&mut slot)?;
            initialize_process(&mut slot, self).await?;
            slot.state = McpServerState::Running;
        }

        let tools = list_tools(&mut slot, self).await?;
        slot.tools = tools.clone();
        slot.state = McpServerState::Listed;
        Ok(tools)
    }

    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, TransportError> {
        let Some(entry) = self.servers.get(server_name) else {
            return Err(TransportError::McpSpawnError(format!("unknown server: {server_name}")));
        };
        let mut slot = entry.value().lock().await;

        if slot.process.is_none() {
            if let Err(err) = spawn_process(&mut slot) {
                slot.state = McpServerState::Failed;
                return Err(match err {
                    TransportError::McpSpawnError(msg) => TransportError::McpServerDown(msg),
                    other => other,
                });
            }
            initialize_process(&mut slot, self).await?;
            slot.state = McpServerState::Running;
        }

        let params = json!({ "name": tool_name, "arguments": arguments });
        let result = send_request(&mut slot, self, "tools/call", params).await;

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if matches!(err, TransportError::Io(_) | TransportError::McpServerDown(_)) {
                    kill_slot(&mut slot);
                    slot.state = McpServerState::Failed;
                    slot.tools.clear();
                    return Err(TransportError::McpServerDown(server_name.to_string()));
                }
                Err(err)
            }
        }
    }

    pub async fn shutdown(&self, server_name: &str) {
        if let Some(entry) = self.servers.get(server_name) {
            let mut slot = entry.value().lock().await;
            kill_slot(&mut slot);
            slot.state = McpServerState::Declared;
            slot.tools.clear();
        }
    }

    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.shutdown(&name).await;
        }
    }
}

fn state_name(state: McpServerState) -> &'static str {
    match state {
        McpServerState::Declared => "declared",
        McpServerState::Running => "running",
        McpServerState::Listed => "listed",
        McpServerState::Failed => "failed",
    }
}

fn spawn_process(slot: &mut ServerSlot) -> Result<(), TransportError> {
    let mut cmd = tokio::process::Command::new(&slot.def.command);
    cmd.args(&slot.def.args)
        .envs(&slot.def.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| TransportError::McpSpawnError(format!("{}: {e}", slot.def.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| TransportError::McpSpawnError("no stdin pipe".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TransportError::McpSpawnError("no stdout pipe".into()))?;

    slot.process = Some(RunningProcess { child, stdin, stdout: BufReader::new(stdout) });
    Ok(())
}

fn kill_slot(slot: &mut ServerSlot) {
    if let Some(mut proc) = slot.process.take() {
        let _ = proc.child.start_kill();
    }
}

async fn initialize_process(slot: &mut ServerSlot, client: &McpClient) -> Result<(), TransportError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "roots": { "listChanged": true }, "sampling": {} },
        "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
    });
    send_request(slot, client, "initialize", params).await?;
    send_notification(slot, "notifications/initialized", json!({})).await?;
    Ok(())
}

async fn list_tools(slot: &mut ServerSlot, client: &McpClient) -> Result<Vec<ToolDescriptor>, TransportError> {
    let result = send_request(slot, client, "tools/list", json!({})).await?;
    let tools = result
        .get("tools")
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(tools).map_err(|e| TransportError::McpFramingError(e.to_string()))
}

async fn send_request(
    slot: &mut ServerSlot,
    client: &McpClient,
    method: &str,
    params: Value,
) -> Result<Value, TransportError> {
    let id = client.next_request_id();
    let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    write_line(slot, &request).await?;

    let line = tokio::time::timeout(client.tools_timeout, read_line(slot))
        .await
        .map_err(|_| TransportError::McpServerDown("timed out waiting for response".into()))??;

    if line.trim().is_empty() {
        return Err(TransportError::McpFramingError("empty response line".into()));
    }

    let response: Value = serde_json::from_str(&line)
        .map_err(|e| TransportError::McpFramingError(format!("malformed JSON: {e}")))?;

    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown MCP error")
            .to_string();
        return Err(TransportError::McpProtocolError { code, message });
    }

    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

async fn send_notification(slot: &mut ServerSlot, method: &str, params: Value) -> Result<(), TransportError> {
    let notification = json!({ "jsonrpc": "2.0", "method": method, "params": params });
    write_line(slot, &notification).await
}

async fn write_line(slot: &mut ServerSlot, message: &Value) -> Result<(), TransportError> {
    let proc = slot.process.as_mut().ok_or_else(|| TransportError::McpServerDown("no process".into()))?;
    let mut line = serde_json::to_string(message).map_err(|e| TransportError::McpFramingError(e.to_string()))?;
    line.push('\n');
    proc.stdin.write_all(line.as_bytes()).await?;
    proc.stdin.flush().await?;
    Ok(())
}

async fn read_line(slot: &mut ServerSlot) -> Result<String, TransportError> {
    let proc = slot.process.as_mut().ok_or_else(|| TransportError::McpServerDown("no process".into()))?;
    let mut line = String::new();
    let n = proc.stdout.read_line(&mut line).await?;
    if n == 0 {
        return Err(TransportError::McpServerDown("stdout closed".into()));
    }
    Ok(line)
}

/// Strips nulls and coerces loose `sources: ["web"]`-style shorthand into the
/// canonical `[{"type": "web"}]` the teacher's `clean_tool_arguments` also
/// normalizes in `mcp/client.rs`. Kept for callers that build `tools/call`
/// arguments from loosely-typed plan step text.
pub fn clean_tool_arguments(mut value: Value) -> Value {
    clean_recursive(&mut value);
    value
}

fn clean_recursive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                clean_recursive(v);
            }
            if let Some(Value::Array(sources)) = map.get_mut("sources") {
                for item in sources.iter_mut() {
                    if let Value::String(s) = item.clone() {
                        *item = json!({ "type": s });
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                clean_recursive(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn def(command: &str, args: &[&str]) -> McpServerDef {
        McpServerDef {
            name: "test".into(),
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Map::new(),
            description: Some("test server".into()),
        }
    }

    #[test]
    fn clean_tool_arguments_strips_nulls_and_expands_sources() {
        let input = json!({ "query": "x", "filter": null, "sources": ["web"] });
        let cleaned = clean_tool_arguments(input);
        assert!(cleaned.get("filter").is_none());
        assert_eq!(cleaned["sources"][0]["type"], "web");
    }

    #[tokio::test]
    async fn ensure_listed_against_a_fake_stdio_server() {
        // `cat` echoes nothing useful, so this exercises spawn + framing
        // failure paths rather than a real MCP server; full protocol
        // round-trips are covered by integration-style fixtures using a
        // Python test double, not unit tests here.
        let config = ConfigStore::default();
        let client = McpClient::new(&config);
        client.servers.insert("echo".into(), Mutex::new(ServerSlot::declared(def("true", &[]))));
        let result = client.ensure_listed("echo").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_server_is_a_spawn_error() {
        let config = ConfigStore::default();
        let client = McpClient::new(&config);
        let result = client.ensure_listed("does-not-exist").await;
        assert!(matches!(result, Err(TransportError::McpSpawnError(_))));
    }
}
