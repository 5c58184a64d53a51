//! Step Executor (C6): walks `PlanStep`s in order, dispatches to A2A or MCP,
//! threads all prior step results into every step, and emits the streaming
//! event schedule from §4.6/§6.

use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::a2a::A2aClient;
use crate::events::TaskEvent;
use crate::mcp::McpClient;
use crate::plan::{Action, Plan, PlanStep};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StepRecordView {
    pub step_number: u32,
    pub action: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepRecordView {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct StepExecutor<'a> {
    registry: &'a AgentRegistry,
    a2a: &'a A2aClient,
    mcp: &'a McpClient,
}

impl<'a> StepExecutor<'a> {
    pub fn new(registry: &'a AgentRegistry, a2a: &'a A2aClient, mcp: &'a McpClient) -> Self {
        StepExecutor { registry, a2a, mcp }
    }

    /// Executes the whole plan, emitting the §4.6 event schedule onto
    /// `events` as it goes. Returns every `StepRecord`, in step order.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        events: &UnboundedSender<TaskEvent>,
    ) -> Vec<StepRecordView> {
        let _ = events.send(TaskEvent::ExecutionStarted {
            strategy: plan.strategy.as_str().to_string(),
            total_steps: plan.steps.len(),
        });

        let mut records: Vec<StepRecordView> = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let record = self.execute_step(step, &records, events).await;
            records.push(record);
        }

        let successful = records.iter().filter(|r| r.success()).count();
        let failed = records.len() - successful;
        let total_duration: u64 = records.iter().map(|r| r.duration_ms).sum();

        let _ = events.send(TaskEvent::ExecutionCompleted {
            total_steps: records.len(),
            successful_steps: successful,
            failed_steps: failed,
            total_duration,
            results: records.clone(),
        });

        records
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
        previous_results: &[StepRecordView],
        events: &UnboundedSender<TaskEvent>,
    ) -> StepRecordView {
        let _ = events.send(TaskEvent::StepStarted {
            step_number: step.step_number,
            step_description: step.text.clone(),
            action: step.action.as_str().to_string(),
            target: step.target.clone(),
            task: step.text.clone(),
        });

        let started = Instant::now();

        match &step.action {
            Action::AgentCall => self.execute_agent_call(step, previous_results, events, started).await,
            Action::ToolUse => self.execute_tool_use(step, events, started).await,
            Action::Coordination => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let result = json!({
                    "previous_count": previous_results.len(),
                    "description": step.text,
                });
                let _ = events.send(TaskEvent::StepCompleted {
                    step_number: step.step_number,
                    action: step.action.as_str().to_string(),
                    target: step.target.clone(),
                    success: true,
                    duration: duration_ms,
                    result: Some(result.clone()),
                    error: None,
                });
                StepRecordView {
                    step_number: step.step_number,
                    action: step.action.as_str().to_string(),
                    target: step.target.clone(),
                    result: Some(result),
                    error: None,
                    duration_ms,
                }
            }
            Action::Unknown(raw) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let error = format!("Unknown action: {raw}");
                let _ = events.send(TaskEvent::StepCompleted {
                    step_number: step.step_number,
                    action: raw.clone(),
                    target: step.target.clone(),
                    success: false,
                    duration: duration_ms,
                    result: None,
                    error: Some(error.clone()),
                });
                StepRecordView {
                    step_number: step.step_number,
                    action: raw.clone(),
                    target: step.target.clone(),
                    result: None,
                    error: Some(error),
                    duration_ms,
                }
            }
        }
    }

    async fn execute_agent_call(
        &self,
        step: &PlanStep,
        previous_results: &[StepRecordView],
        events: &UnboundedSender<TaskEvent>,
        started: Instant,
    ) -> StepRecordView {
        let Some(entry) = self.registry.get(&step.target) else {
            let duration_ms = started.elapsed().as_millis() as u64;
            let error = "Agent not found".to_string();
            let _ = events.send(TaskEvent::StepCompleted {
                step_number: step.step_number,
                action: step.action.as_str().to_string(),
                target: step.target.clone(),
                success: false,
                duration: duration_ms,
                result: None,
                error: Some(error.clone()),
            });
            return StepRecordView {
                step_number: step.step_number,
                action: step.action.as_str().to_string(),
                target: step.target.clone(),
                result: None,
                error: Some(error),
                duration_ms,
            };
        };

        let _ = events.send(TaskEvent::AgentCallStarted { agent_id: entry.agent_id.clone() });

        let context = json!({ "previous_results": previous_results });
        match self.a2a.call(&entry, &step.text, context).await {
            Ok(result) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let _ = events.send(TaskEvent::AgentCallCompleted {
                    agent_id: entry.agent_id.clone(),
                    result: result.clone(),
                    duration: duration_ms,
                });
                StepRecordView {
                    step_number: step.step_number,
                    action: step.action.as_str().to_string(),
                    target: step.target.clone(),
                    result: Some(result),
                    error: None,
                    duration_ms,
                }
            }
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let error = err.to_string();
                let _ = events.send(TaskEvent::StepCompleted {
                    step_number: step.step_number,
                    action: step.action.as_str().to_string(),
                    target: step.target.clone(),
                    success: false,
                    duration: duration_ms,
                    result: None,
                    error: Some(error.clone()),
                });
                StepRecordView {
                    step_number: step.step_number,
                    action: step.action.as_str().to_string(),
                    target: step.target.clone(),
                    result: None,
                    error: Some(error),
                    duration_ms,
                }
            }
        }
    }

    async fn execute_tool_use(
        &self,
        step: &PlanStep,
        events: &UnboundedSender<TaskEvent>,
        started: Instant,
    ) -> StepRecordView {
        let (server_name, tool_name) = match step.target.split_once(':') {
            Some((server, tool)) => (server.to_string(), tool.to_string()),
            None => {
                let found = self.mcp.find_server_for_tool(&step.target).await;
                match found {
                    Some(server) => (server, step.target.clone()),
                    None => {
                        let duration_ms = started.elapsed().as_millis() as u64;
                        let error = format!("no MCP server advertises tool '{}'", step.target);
                        let _ = events.send(TaskEvent::StepCompleted {
                            step_number: step.step_number,
                            action: step.action.as_str().to_string(),
                            target: step.target.clone(),
                            success: false,
                            duration: duration_ms,
                            result: None,
                            error: Some(error.clone()),
                        });
                        return StepRecordView {
                            step_number: step.step_number,
                            action: step.action.as_str().to_string(),
                            target: step.target.clone(),
                            result: None,
                            error: Some(error),
                            duration_ms,
                        };
                    }
                }
            }
        };

        let _ = events.send(TaskEvent::McpToolUsed { tool: step.target.clone() });

        let arguments = crate::mcp::clean_tool_arguments(json!({ "task": step.text }));
        let outcome = self.mcp.call_tool(&server_name, &tool_name, arguments).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, error) = match outcome {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err.to_string())),
        };

        let _ = events.send(TaskEvent::StepCompleted {
            step_number: step.step_number,
            action: step.action.as_str().to_string(),
            target: step.target.clone(),
            success: error.is_none(),
            duration: duration_ms,
            result: result.clone(),
            error: error.clone(),
        });

        StepRecordView {
            step_number: step.step_number,
            action: step.action.as_str().to_string(),
            target: step.target.clone(),
            result,
            error,
            duration_ms,
        }
    }
}

/// Degraded path when plan compilation fails (§4.6): pick the first agent in
/// the registry, issue a raw agent_call with empty `previous_results`, and
/// tag the outcome `fallback`. An empty registry fails the task terminally.
pub async fn run_fallback(
    registry: &AgentRegistry,
    a2a: &A2aClient,
    description: &str,
    reason: &str,
    events: &UnboundedSender<TaskEvent>,
) -> Result<StepRecordView, String> {
    let _ = events.send(TaskEvent::FallbackStarted { reason: reason.to_string() });

    let mut snapshot = registry.snapshot();
    snapshot.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    let Some(entry) = snapshot.into_iter().next() else {
        let _ = events.send(TaskEvent::Error { error: "no_agents_available".to_string() });
        return Err("no_agents_available".to_string());
    };

    let _ = events.send(TaskEvent::FallbackDecision {
        target: entry.agent_id.clone(),
        reason: reason.to_string(),
    });

    let started = Instant::now();
    let outcome = a2a.call(&entry, description, json!({ "previous_results": [] })).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            let _ = events.send(TaskEvent::FallbackCompleted { result: result.clone() });
            Ok(StepRecordView {
                step_number: 1,
                action: "agent_call".to_string(),
                target: entry.agent_id.clone(),
                result: Some(result),
                error: None,
                duration_ms,
            })
        }
        Err(err) => {
            let message = err.to_string();
            let _ = events.send(TaskEvent::FallbackError { error: message.clone() });
            Ok(StepRecordView {
                step_number: 1,
                action: "agent_call".to_string(),
                target: entry.agent_id.clone(),
                result: None,
                error: Some(message),
                duration_ms,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::plan::{Action, Plan, PlanStep, Strategy};
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use std::time::Duration;

    fn plan_with(steps: Vec<PlanStep>) -> Plan {
        Plan {
            strategy: Strategy::SingleAgent,
            analysis: "x".into(),
            steps,
            required_agents: vec![],
            required_tools: vec![],
            expected_deliverables: vec![],
            raw_decision: json!({}),
        }
    }

    #[tokio::test]
    async fn agent_not_found_produces_step_completed_error() {
        let config = ConfigStore::default();
        let registry = AgentRegistry::new(&config);
        let a2a = A2aClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let mcp = McpClient::new(&config);
        let executor = StepExecutor::new(&registry, &a2a, &mcp);

        let plan = plan_with(vec![PlanStep {
            step_number: 1,
            action: Action::AgentCall,
            target: "ghost".into(),
            text: "do it".into(),
            dependencies: vec![],
        }]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let records = executor.execute_plan(&plan, &tx).await;
        drop(tx);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("Agent not found"));

        let mut saw_step_completed_error = false;
        while let Some(ev) = rx.recv().await {
            if let TaskEvent::StepCompleted { success: false, .. } = ev {
                saw_step_completed_error = true;
            }
        }
        assert!(saw_step_completed_error);
    }

    #[tokio::test]
    async fn unknown_action_is_recorded_as_error() {
        let config = ConfigStore::default();
        let registry = AgentRegistry::new(&config);
        let a2a = A2aClient::new(Duration::from_secs(1), Duration::from_secs(1));
        let mcp = McpClient::new(&config);
        let executor = StepExecutor::new(&registry, &a2a, &mcp);

        let plan = plan_with(vec![PlanStep {
            step_number: 1,
            action: Action::Unknown("teleport".into()),
            target: "nowhere".into(),
            text: "".into(),
            dependencies: vec![],
        }]);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let records = executor.execute_plan(&plan, &tx).await;
        assert_eq!(records[0].error.as_deref(), Some("Unknown action: teleport"));
    }
}
