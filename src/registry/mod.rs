//! Agent Registry (C4): periodic discovery of remote agents, non-destructive
//! refresh semantics, read-mostly concurrent table (§4.4, §5).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tracing::Instrument;

use crate::a2a::{A2aClient, AgentEntry};
use crate::config::ConfigStore;

pub struct AgentRegistry {
    entries: DashMap<String, Arc<AgentEntry>>,
    endpoints: Vec<String>,
}

impl AgentRegistry {
    pub fn new(config: &ConfigStore) -> Self {
        AgentRegistry {
            entries: DashMap::new(),
            endpoints: config.discovery_endpoints().to_vec(),
        }
    }

    /// One discovery cycle: probe every configured endpoint in parallel.
    /// A successful probe overwrites any existing entry for that agent_id;
    /// endpoints that don't answer are simply skipped — never evicted
    /// (§4.4's non-destructive-within-a-cycle guarantee).
    pub async fn refresh(&self, client: &A2aClient) -> usize {
        let probes = self.endpoints.iter().map(|endpoint| client.discover(endpoint));
        let results = join_all(probes).await;

        let mut updated = 0;
        for (endpoint, result) in self.endpoints.iter().zip(results) {
            match result {
                Some(entry) => {
                    self.entries.insert(entry.agent_id.clone(), Arc::new(entry));
                    updated += 1;
                }
                None => {
                    tracing::warn!(endpoint = %endpoint, "discovery probe failed, keeping prior entries");
                }
            }
        }
        updated
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentEntry>> {
        self.entries.get(agent_id).map(|e| e.clone())
    }

    pub fn snapshot(&self) -> Vec<Arc<AgentEntry>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Drives `refresh` on a fixed interval (default 30s, from C8); backs off 5s
/// after any refresh that panics or errors out before retrying (§4.4). Each
/// cycle runs to completion before the next starts (§5) because this is a
/// single sequential loop, not a spawn-per-tick scheduler.
pub async fn run_discovery_loop(
    registry: Arc<AgentRegistry>,
    client: Arc<A2aClient>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let span = tracing::info_span!("discovery_cycle");
        let registry = registry.clone();
        let client = client.clone();

        let handle = tokio::spawn(
            async move { registry.refresh(&client).await }.instrument(span),
        );

        match handle.await {
            Ok(updated) => tracing::debug!(agents_updated = updated, "discovery cycle complete"),
            Err(join_err) => {
                tracing::error!(error = %join_err, "discovery cycle panicked, backing off");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn refresh_keeps_prior_entry_when_endpoint_later_fails() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/a2a/agent.json");
                then.status(200).json_body(json!({"name": "X"}));
            })
            .await;

        let client = A2aClient::new(Duration::from_millis(200), Duration::from_secs(1));

        let registry = AgentRegistry {
            entries: DashMap::new(),
            endpoints: vec![server.base_url()],
        };

        registry.refresh(&client).await;
        assert_eq!(registry.len(), 1);

        mock.delete();
        // Endpoint now answers with 500s; the entry must survive.
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(500);
            })
            .await;
        registry.refresh(&client).await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get("x").is_some());
    }
}
