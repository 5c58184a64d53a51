//! Streaming event taxonomy (§6). Each variant serializes as a single SSE
//! `data: <json>\n\n` message with an `event` discriminator field.

use serde::Serialize;
use serde_json::Value;

use crate::executor::StepRecordView;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TaskEvent {
    #[serde(rename = "task_started")]
    TaskStarted { task_id: String, description: String },

    #[serde(rename = "llm_analysis_started")]
    LlmAnalysisStarted { task_id: String },

    #[serde(rename = "llm_analysis_progress")]
    LlmAnalysisProgress { chunk: String },

    #[serde(rename = "llm_analysis_completed")]
    LlmAnalysisCompleted { analysis: String },

    #[serde(rename = "llm_decision_made")]
    LlmDecisionMade { decision: Value },

    #[serde(rename = "execution_started")]
    ExecutionStarted { strategy: String, total_steps: usize },

    #[serde(rename = "step_started")]
    StepStarted {
        step_number: u32,
        step_description: String,
        action: String,
        target: String,
        task: String,
    },

    #[serde(rename = "agent_call_started")]
    AgentCallStarted { agent_id: String },

    #[serde(rename = "agent_call_completed")]
    AgentCallCompleted {
        agent_id: String,
        result: Value,
        duration: u64,
    },

    #[serde(rename = "mcp_tool_used")]
    McpToolUsed { tool: String },

    #[serde(rename = "step_completed")]
    StepCompleted {
        step_number: u32,
        action: String,
        target: String,
        success: bool,
        duration: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "execution_completed")]
    ExecutionCompleted {
        total_steps: usize,
        successful_steps: usize,
        failed_steps: usize,
        total_duration: u64,
        results: Vec<StepRecordView>,
    },

    #[serde(rename = "task_completed")]
    TaskCompleted {
        task_id: String,
        total_steps: usize,
        successful_steps: usize,
        failed_steps: usize,
        duration: u64,
        execution_stats: Value,
        final_result: Value,
    },

    #[serde(rename = "fallback_started")]
    FallbackStarted { reason: String },

    #[serde(rename = "fallback_decision")]
    FallbackDecision { target: String, reason: String },

    #[serde(rename = "fallback_completed")]
    FallbackCompleted { result: Value },

    #[serde(rename = "fallback_error")]
    FallbackError { error: String },

    #[serde(rename = "error")]
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_started_serializes_with_event_tag() {
        let ev = TaskEvent::TaskStarted {
            task_id: "task_1".into(),
            description: "do a thing".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "task_started");
        assert_eq!(json["task_id"], "task_1");
    }

    #[test]
    fn step_completed_omits_absent_result_and_error() {
        let ev = TaskEvent::StepCompleted {
            step_number: 1,
            action: "tool_use".into(),
            target: "fs:read_file".into(),
            success: true,
            duration: 12,
            result: Some(Value::String("ok".into())),
            error: None,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["result"], "ok");
    }
}
