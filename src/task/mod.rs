//! Task Manager (C7): assigns task IDs, owns the active-task table, drives
//! C5 → C6, and exposes both the batch and streaming submission modes by
//! draining a single event channel (§4.7, §9 "coroutine-style control flow").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::RwLock;
use tracing::Instrument;

use crate::a2a::A2aClient;
use crate::events::TaskEvent;
use crate::executor::{run_fallback, StepExecutor, StepRecordView};
use crate::llm::LlmEnvoy;
use crate::mcp::McpClient;
use crate::plan::PlanCompiler;
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Planning,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecordView>,
    pub execution_strategy: Option<String>,
}

pub struct TaskManagerDeps {
    pub registry: Arc<AgentRegistry>,
    pub a2a: Arc<A2aClient>,
    pub mcp: Arc<McpClient>,
    pub llm: Arc<LlmEnvoy>,
}

pub struct TaskManager {
    tasks: DashMap<String, Arc<RwLock<Task>>>,
    counter: AtomicU64,
    deps: TaskManagerDeps,
}

impl TaskManager {
    pub fn new(deps: TaskManagerDeps) -> Self {
        TaskManager { tasks: DashMap::new(), counter: AtomicU64::new(0), deps }
    }

    fn next_task_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("task_{n}")
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<RwLock<Task>>> {
        self.tasks.get(task_id).map(|e| e.clone())
    }

    /// Spawns the plan+execute pipeline and returns its event stream. The
    /// same pipeline backs both submission modes (§9): streaming callers
    /// forward these events as SSE directly; batch callers drain the
    /// channel to completion and synthesize the summary response.
    pub fn submit(&self, description: String, context: Value) -> UnboundedReceiver<TaskEvent> {
        let task_id = self.next_task_id();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = Arc::new(RwLock::new(Task {
            task_id: task_id.clone(),
            description: description.clone(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            steps: Vec::new(),
            execution_strategy: None,
        }));
        self.tasks.insert(task_id.clone(), task.clone());

        let registry = self.deps.registry.clone();
        let a2a = self.deps.a2a.clone();
        let mcp = self.deps.mcp.clone();
        let llm = self.deps.llm.clone();

        let span = tracing::info_span!("task", task_id = %task_id);
        tokio::spawn(
            async move {
                run_task_pipeline(task_id, description, context, task, registry, a2a, mcp, llm, tx).await;
            }
            .instrument(span),
        );

        rx
    }

    /// Batch mode: drains the event channel to completion and returns the
    /// final `{task_id, status, result}` summary (§6).
    pub async fn submit_batch(&self, description: String, context: Value) -> Value {
        let mut rx = self.submit(description, context);
        let mut final_result = None;
        while let Some(ev) = rx.recv().await {
            if let TaskEvent::TaskCompleted {
                task_id,
                total_steps,
                successful_steps,
                failed_steps,
                execution_stats,
                final_result: result,
                ..
            } = ev
            {
                let status = match self.get(&task_id) {
                    Some(task) if task.read().await.status == TaskStatus::Failed => "failed",
                    _ => "completed",
                };
                final_result = Some(json!({
                    "task_id": task_id,
                    "status": status,
                    "result": {
                        "task_id": task_id,
                        "execution_strategy": result.get("execution_strategy").cloned().unwrap_or(Value::Null),
                        "llm_decision": result.get("llm_decision").cloned().unwrap_or(Value::Null),
                        "execution_results": result.get("execution_results").cloned().unwrap_or(json!([])),
                        "total_steps": total_steps,
                        "completed_steps": successful_steps,
                        "summary": execution_stats,
                    }
                }));
            } else if let TaskEvent::Error { error } = ev {
                final_result = Some(json!({ "task_id": "unknown", "status": "failed", "result": { "error": error } }));
            }
        }
        final_result.unwrap_or_else(|| json!({ "status": "failed", "result": { "error": "no terminal event produced" } }))
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task_pipeline(
    task_id: String,
    description: String,
    context: Value,
    task: Arc<RwLock<Task>>,
    registry: Arc<AgentRegistry>,
    a2a: Arc<A2aClient>,
    mcp: Arc<McpClient>,
    llm: Arc<LlmEnvoy>,
    tx: mpsc::UnboundedSender<TaskEvent>,
) {
    let _ = tx.send(TaskEvent::TaskStarted { task_id: task_id.clone(), description: description.clone() });

    {
        let mut guard = task.write().await;
        guard.status = TaskStatus::Planning;
    }
    let _ = tx.send(TaskEvent::LlmAnalysisStarted { task_id: task_id.clone() });

    let started = std::time::Instant::now();
    let compiler = PlanCompiler::new(&llm, &registry, &mcp);
    let tx_chunks = tx.clone();
    let plan_result = compiler
        .compile_streaming(&description, |chunk| {
            let _ = tx_chunks.send(TaskEvent::LlmAnalysisProgress { chunk: chunk.to_string() });
        })
        .await;

    let (steps, strategy, final_result);

    match plan_result {
        Ok(plan) => {
            let _ = tx.send(TaskEvent::LlmAnalysisCompleted { analysis: plan.analysis.clone() });
            let _ = tx.send(TaskEvent::LlmDecisionMade { decision: plan.raw_decision.clone() });

            {
                let mut guard = task.write().await;
                guard.status = TaskStatus::Executing;
            }

            let executor = StepExecutor::new(&registry, &a2a, &mcp);
            let records = executor.execute_plan(&plan, &tx).await;

            strategy = plan.strategy.as_str().to_string();
            steps = records;
            final_result = json!({
                "execution_strategy": strategy,
                "llm_decision": plan.raw_decision,
                "execution_results": steps,
            });
        }
        Err(err) => {
            let fallback = run_fallback(&registry, &a2a, &description, &err.to_string(), &tx).await;
            match fallback {
                Ok(record) => {
                    strategy = "fallback".to_string();
                    steps = vec![record];
                    final_result = json!({
                        "execution_strategy": strategy,
                        "llm_decision": Value::Null,
                        "execution_results": steps,
                    });
                }
                Err(_no_agents) => {
                    let mut guard = task.write().await;
                    guard.status = TaskStatus::Failed;
                    guard.completed_at = Some(Utc::now());
                    let duration = started.elapsed().as_millis() as u64;
                    let _ = tx.send(TaskEvent::TaskCompleted {
                        task_id: task_id.clone(),
                        total_steps: 0,
                        successful_steps: 0,
                        failed_steps: 0,
                        duration,
                        execution_stats: json!({ "reason": "no_agents_available" }),
                        final_result: json!({ "error": "no_agents_available" }),
                    });
                    return;
                }
            }
        }
    }

    let successful = steps.iter().filter(|s| s.error.is_none()).count();
    let failed = steps.len() - successful;
    let duration = started.elapsed().as_millis() as u64;

    {
        let mut guard = task.write().await;
        guard.status = TaskStatus::Completed;
        guard.completed_at = Some(Utc::now());
        guard.steps = steps.clone();
        guard.execution_strategy = Some(strategy);
    }

    let _ = tx.send(TaskEvent::TaskCompleted {
        task_id: task_id.clone(),
        total_steps: steps.len(),
        successful_steps: successful,
        failed_steps: failed,
        duration,
        execution_stats: json!({ "successful_steps": successful, "failed_steps": failed, "total_duration_ms": duration }),
        final_result,
    });

    let _ = context;
}
