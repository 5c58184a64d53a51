//! A2A Transport (C3): JSON-RPC envelope over HTTP for agent calls, plus
//! card-based discovery probes (§4.3). Grounded in the teacher's
//! `a2a/client.rs` (real `reqwest`-based HTTP calls, the `/a2a` envelope
//! shape) generalized to the exact method/params layout this spec requires.

use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::a2a::types::{A2aMessage, AgentEntry, AgentProtocol, Part};
use crate::errors::TransportError;

const DISCOVERY_PROBES: [(&str, AgentProtocol); 4] = [
    ("/a2a/agent.json", AgentProtocol::A2a),
    ("/.well-known/agent.json", AgentProtocol::A2a),
    ("/capabilities", AgentProtocol::Legacy),
    ("/health", AgentProtocol::Unknown),
];

pub struct A2aClient {
    http: reqwest::Client,
    discovery_timeout: Duration,
    call_timeout: Duration,
}

impl A2aClient {
    pub fn new(discovery_timeout: Duration, call_timeout: Duration) -> Self {
        A2aClient { http: reqwest::Client::new(), discovery_timeout, call_timeout }
    }

    /// Runs the four ordered probes against `endpoint` and classifies the
    /// first 2xx JSON response (§4.3). Returns `Ok(None)` when every probe
    /// fails (the caller logs and keeps the prior entry, per §4.4).
    pub async fn discover(&self, endpoint: &str) -> Option<AgentEntry> {
        for (path, protocol) in DISCOVERY_PROBES {
            let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
            let Ok(response) = self.http.get(&url).timeout(self.discovery_timeout).send().await else {
                continue;
            };
            if !response.status().is_success() {
                continue;
            }
            let Ok(card) = response.json::<Value>().await else { continue };

            let name = card
                .get("name")
                .or_else(|| card.get("agent_name"))
                .or_else(|| card.get("agent"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let agent_id = AgentEntry::derive_agent_id(name);

            let capabilities = card
                .get("skills")
                .or_else(|| card.get("capabilities"))
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            return Some(AgentEntry {
                agent_id,
                endpoint: endpoint.to_string(),
                protocol,
                discovery_method: path.trim_start_matches('/').replace('/', "_"),
                card,
                capabilities,
            });
        }
        None
    }

    pub async fn call(
        &self,
        entry: &AgentEntry,
        task_text: &str,
        context: Value,
    ) -> Result<Value, TransportError> {
        match entry.protocol {
            AgentProtocol::A2a => self.call_a2a(entry, task_text, context).await,
            AgentProtocol::Legacy => self.call_legacy(entry, task_text, context).await,
            AgentProtocol::Unknown => Err(TransportError::A2aInvalidResponse(format!(
                "agent {} was discovered via /health only and is uncallable",
                entry.agent_id
            ))),
        }
    }

    async fn call_a2a(
        &self,
        entry: &AgentEntry,
        task_text: &str,
        context: Value,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/tasks/send", entry.endpoint.trim_end_matches('/'));
        let message = A2aMessage {
            role: "user".to_string(),
            parts: vec![
                Part::Text { text: task_text.to_string() },
                Part::Data { data: context },
            ],
        };
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "tasks/send",
            "params": {
                "id": Uuid::new_v4().to_string(),
                "sessionId": Uuid::new_v4().to_string(),
                "message": message,
                "acceptedOutputModes": ["text", "application/json"],
            },
        });

        let response = self
            .http
            .post(&url)
            .json(&envelope)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::A2aHttpError { status: status.as_u16(), endpoint: url });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::A2aInvalidResponse(e.to_string()))?;

        match body.get("result") {
            Some(result) => Ok(result.clone()),
            None => Err(TransportError::A2aInvalidResponse(
                "response has no top-level `result` key".into(),
            )),
        }
    }

    async fn call_legacy(
        &self,
        entry: &AgentEntry,
        task_text: &str,
        context: Value,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/task", entry.endpoint.trim_end_matches('/'));
        let body = json!({ "description": task_text, "context": context });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(TransportError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::LegacyHttpError { status: status.as_u16(), endpoint: url });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::A2aInvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    #[tokio::test]
    async fn discover_classifies_agent_card_as_a2a() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a2a/agent.json");
                then.status(200)
                    .json_body(json!({"name": "User Research", "skills": ["market_analysis"]}));
            })
            .await;

        let client = A2aClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let entry = client.discover(&server.base_url()).await.unwrap();
        assert_eq!(entry.agent_id, "user_research");
        assert_eq!(entry.protocol, AgentProtocol::A2a);
        assert_eq!(entry.capabilities, vec!["market_analysis".to_string()]);
    }

    #[tokio::test]
    async fn discover_falls_through_to_capabilities_endpoint() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a2a/agent.json");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/.well-known/agent.json");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/capabilities");
                then.status(200).json_body(json!({"agent_name": "Legacy Bot"}));
            })
            .await;

        let client = A2aClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let entry = client.discover(&server.base_url()).await.unwrap();
        assert_eq!(entry.agent_id, "legacy_bot");
        assert_eq!(entry.protocol, AgentProtocol::Legacy);
    }

    #[tokio::test]
    async fn discover_returns_none_when_every_probe_fails() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET);
            then.status(500);
        }).await;

        let client = A2aClient::new(Duration::from_secs(1), Duration::from_secs(1));
        assert!(client.discover(&server.base_url()).await.is_none());
    }
}
