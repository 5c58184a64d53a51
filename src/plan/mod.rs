//! Plan Compiler (C5): assembles `SystemContext`, prompts the LLM, and
//! validates/normalizes the returned plan (§4.5).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::PlanError;
use crate::llm::extractor::extract_decision_json;
use crate::llm::LlmEnvoy;
use crate::mcp::McpClient;
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SingleAgent,
    MultiAgent,
    McpTools,
    Hybrid,
    Fallback,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::SingleAgent => "single_agent",
            Strategy::MultiAgent => "multi_agent",
            Strategy::McpTools => "mcp_tools",
            Strategy::Hybrid => "hybrid",
            Strategy::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AgentCall,
    ToolUse,
    Coordination,
    Unknown(String),
}

impl Action {
    fn parse(raw: &str) -> Self {
        match raw {
            "agent_call" => Action::AgentCall,
            "tool_use" => Action::ToolUse,
            "coordination" => Action::Coordination,
            other => Action::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::AgentCall => "agent_call",
            Action::ToolUse => "tool_use",
            Action::Coordination => "coordination",
            Action::Unknown(raw) => raw.as_str(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub step_number: u32,
    pub action: Action,
    pub target: String,
    pub text: String,
    /// Advisory only (§3) — the executor never consults this.
    pub dependencies: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub strategy: Strategy,
    pub analysis: String,
    pub steps: Vec<PlanStep>,
    pub required_agents: Vec<String>,
    pub required_tools: Vec<String>,
    pub expected_deliverables: Vec<String>,
    pub raw_decision: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentContextView {
    pub agent_id: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct McpToolView {
    pub server: String,
    pub tool: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemContext {
    pub available_agents: Vec<AgentContextView>,
    pub available_mcp_servers: Vec<McpServerView>,
    pub available_mcp_tools: Vec<McpToolView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct McpServerView {
    pub name: String,
    pub description: Option<String>,
}

pub struct PlanCompiler<'a> {
    llm: &'a LlmEnvoy,
    registry: &'a AgentRegistry,
    mcp: &'a McpClient,
}

impl<'a> PlanCompiler<'a> {
    pub fn new(llm: &'a LlmEnvoy, registry: &'a AgentRegistry, mcp: &'a McpClient) -> Self {
        PlanCompiler { llm, registry, mcp }
    }

    pub async fn build_system_context(&self) -> SystemContext {
        self.mcp.ensure_all_listed().await;

        let available_agents = self
            .registry
            .snapshot()
            .into_iter()
            .map(|entry| AgentContextView {
                agent_id: entry.agent_id.clone(),
                capabilities: entry.capabilities.clone(),
            })
            .collect();

        let available_mcp_servers = self
            .mcp
            .known_servers()
            .await
            .into_iter()
            .map(|s| McpServerView { name: s.name, description: s.description })
            .collect();

        let available_mcp_tools = self
            .mcp
            .cached_tools()
            .await
            .into_iter()
            .map(|(server, tool)| McpToolView {
                server,
                tool: tool.name,
                description: tool.description,
            })
            .collect();

        SystemContext { available_agents, available_mcp_servers, available_mcp_tools }
    }

    fn build_prompt(&self, context: &SystemContext, description: &str) -> String {
        let context_json = serde_json::to_string_pretty(context).unwrap_or_default();
        format!(
            "You are the planning stage of a multi-agent coordinator.\n\
             Known system context (available agents and tools):\n{context_json}\n\n\
             User request: {description}\n\n\
             Respond with a single JSON object with exactly these fields:\n\
             {{\"analysis\": str, \"execution_strategy\": \"single_agent\"|\"multi_agent\"|\"mcp_tools\"|\"hybrid\", \
             \"required_agents\": [agent_id], \"required_tools\": [tool_name], \
             \"execution_plan\": [{{\"step\": int, \"action\": \"agent_call\"|\"tool_use\"|\"coordination\", \
             \"target\": str, \"task\": str, \"dependencies\": [int]}}], \
             \"expected_deliverables\": [str]}}"
        )
    }

    /// Streaming compile path: same LLM call, but chunk deltas are forwarded
    /// to `on_chunk` as they arrive so the caller can emit
    /// `llm_analysis_progress` events while the full reply accumulates.
    pub async fn compile_streaming<F>(&self, description: &str, mut on_chunk: F) -> Result<Plan, PlanError>
    where
        F: FnMut(&str),
    {
        let context = self.build_system_context().await;
        let prompt = self.build_prompt(&context, description);

        let stream = self
            .llm
            .stream_complete(&prompt, None, None, None)
            .await
            .map_err(|e| PlanError::ParseError(e.to_string()))?;

        use futures::StreamExt;
        futures::pin_mut!(stream);
        let mut accumulated = String::new();
        while let Some(chunk) = stream.next().await {
            on_chunk(&chunk);
            accumulated.push_str(&chunk);
        }

        decode_plan(&accumulated)
    }
}

fn decode_plan(raw_text: &str) -> Result<Plan, PlanError> {
    let decision = extract_decision_json(raw_text);

    let Some(execution_plan) = decision.get("execution_plan").and_then(Value::as_array) else {
        return Err(PlanError::ParseError(format!(
            "decoded decision has no execution_plan field (approach={:?})",
            decision.get("approach")
        )));
    };

    let strategy = match decision.get("execution_strategy").and_then(Value::as_str) {
        Some("single_agent") => Strategy::SingleAgent,
        Some("multi_agent") => Strategy::MultiAgent,
        Some("mcp_tools") => Strategy::McpTools,
        Some("hybrid") => Strategy::Hybrid,
        _ => {
            return Err(PlanError::ParseError("missing or invalid execution_strategy".into()));
        }
    };

    let mut steps = Vec::with_capacity(execution_plan.len());
    for (idx, raw_step) in execution_plan.iter().enumerate() {
        let step_number = raw_step
            .get("step")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or((idx + 1) as u32);
        let action = raw_step
            .get("action")
            .and_then(Value::as_str)
            .map(Action::parse)
            .unwrap_or_else(|| Action::Unknown("missing".to_string()));
        let target = raw_step.get("target").and_then(Value::as_str).unwrap_or_default().to_string();
        let text = raw_step.get("task").and_then(Value::as_str).unwrap_or_default().to_string();
        let dependencies = raw_step
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
            .unwrap_or_default();

        steps.push(PlanStep { step_number, action, target, text, dependencies });
    }

    let string_list = |key: &str| -> Vec<String> {
        decision
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    Ok(Plan {
        strategy,
        analysis: decision.get("analysis").and_then(Value::as_str).unwrap_or_default().to_string(),
        steps,
        required_agents: string_list("required_agents"),
        required_tools: string_list("required_tools"),
        expected_deliverables: string_list("expected_deliverables"),
        raw_decision: decision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_plan_rejects_missing_execution_plan() {
        let err = decode_plan("I cannot help").unwrap_err();
        assert!(matches!(err, PlanError::ParseError(_)));
    }

    #[test]
    fn decode_plan_accepts_well_formed_single_agent_plan() {
        let raw = r#"{
            "analysis": "simple",
            "execution_strategy": "single_agent",
            "required_agents": ["user_research"],
            "required_tools": [],
            "execution_plan": [{"step": 1, "action": "agent_call", "target": "user_research", "task": "go", "dependencies": []}],
            "expected_deliverables": ["report"]
        }"#;
        let plan = decode_plan(raw).unwrap();
        assert_eq!(plan.strategy, Strategy::SingleAgent);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, Action::AgentCall);
    }

    #[test]
    fn decode_plan_empty_execution_plan_is_valid() {
        let raw = r#"{"analysis":"x","execution_strategy":"single_agent","required_agents":[],"required_tools":[],"execution_plan":[],"expected_deliverables":[]}"#;
        let plan = decode_plan(raw).unwrap();
        assert!(plan.steps.is_empty());
        assert_eq!(plan.strategy, Strategy::SingleAgent);
    }
}
