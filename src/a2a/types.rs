//! Data model shared by discovery (§4.3/§4.4) and dispatch: `AgentEntry`,
//! `AgentProtocol`, and the A2A message `Part` discriminator. Unlike the
//! teacher's `a2a/types.rs` (`PartsDict` with no `type` tag), this carries
//! the explicit `{"type": "text"|"data", ...}` shape spec §4.3 requires.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentProtocol {
    A2a,
    Legacy,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentEntry {
    pub agent_id: String,
    pub endpoint: String,
    pub protocol: AgentProtocol,
    pub discovery_method: String,
    pub card: Value,
    pub capabilities: Vec<String>,
}

impl AgentEntry {
    /// `lowercase(name).replace(' ', '_')` — the derivation rule confirmed by
    /// `original_source/common-agent/src/common_agent_llm_driven.py`'s
    /// `AgentDiscovery._discover_single_agent` (spec §4.3, tested in §8).
    pub fn derive_agent_id(name: &str) -> String {
        name.to_lowercase().replace(' ', "_")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Part {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "data")]
    Data { data: Value },
}

#[derive(Debug, Clone, Serialize)]
pub struct A2aMessage {
    pub role: String,
    pub parts: Vec<Part>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_lowercases_and_replaces_spaces() {
        assert_eq!(AgentEntry::derive_agent_id("User Research"), "user_research");
        assert_eq!(AgentEntry::derive_agent_id("X"), "x");
    }

    #[test]
    fn part_tags_discriminate_text_and_data() {
        let text = serde_json::to_value(Part::Text { text: "hi".into() }).unwrap();
        assert_eq!(text["type"], "text");
        let data = serde_json::to_value(Part::Data { data: serde_json::json!({"k": 1}) }).unwrap();
        assert_eq!(data["type"], "data");
    }
}
