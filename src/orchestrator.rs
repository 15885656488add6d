//! Task Orchestrator / Facade (C7). Full rewrite: the teacher's
//! `Orchestrator` dispatched across four `TaskType` arms
//! (Coding/Workflow/OsOperation/Research) backed by n8n/VisualDriver/
//! ProjectScanner collaborators that have no counterpart in this
//! kernel. Only the per-task struct / async-entrypoint /
//! classify-then-dispatch shape survives; everything downstream of
//! classification is new, following the Router → Planner → Executor
//! pipeline of §4.8.

use crate::config_manager::ConfigManager;
use crate::embedding::EmbeddingService;
use crate::executor_registry::ExecutorRegistry;
use crate::intent_router::IntentRouter;
use crate::memory::queue::{MemoryQueue, SaveTaskResult};
use crate::memory::Memory;
use crate::planner::Planner;
use crate::plan_executor::{PlanExecutor, PlanExecutorConfig};
use crate::reflector::Reflector;
use crate::schema::{ExecutionContext, InternalEvent, Plan, Step, TaskResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Shared, process-scoped collaborators an orchestrator is constructed
/// from. A fresh [`Orchestrator`] is built per `execute` command, but
/// every field here is an `Arc` onto a singleton the server loop owns.
pub struct OrchestratorDeps {
    pub embedding: Arc<dyn EmbeddingService>,
    pub intent_router: Arc<IntentRouter>,
    pub memory: Arc<Memory>,
    pub memory_queue: MemoryQueue,
    pub planner: Arc<Planner>,
    pub registry: Arc<ExecutorRegistry>,
    pub reflector: Arc<Reflector>,
    pub config: Arc<ConfigManager>,
}

pub struct Orchestrator {
    deps: Arc<OrchestratorDeps>,
}

impl Orchestrator {
    pub fn new(deps: Arc<OrchestratorDeps>) -> Self {
        Orchestrator { deps }
    }

    /// Per-`execute`-command entrypoint (§4.8).
    pub async fn handle_execute(
        &self,
        instruction: &str,
        ctx: &mut ExecutionContext,
        emit: &mut dyn FnMut(InternalEvent),
    ) -> TaskResult {
        let started_at = Instant::now();

        if instruction.trim().is_empty() {
            return TaskResult {
                success: false,
                message: "instruction is empty".to_string(),
                steps: Vec::new(),
                user_instruction: instruction.to_string(),
            };
        }

        // Step 1: wait up to the configured window for the embedding
        // model; fast path is simply skipped if it never comes up.
        let embedding_ready_wait = self.deps.config.embedding_ready_wait();
        let _ = self.deps.embedding.wait_until_ready(embedding_ready_wait).await;

        if ctx.stop.is_fired() {
            return cancelled_result(ctx, instruction);
        }

        // Step 2: fast path.
        if let Some(intent_match) = self.deps.intent_router.detect(instruction).await {
            emit(InternalEvent {
                event_type: crate::schema::InternalEventType::Thinking,
                data: json!({ "phase": "fast_path", "summary": intent_match.intent_type }),
            });
            let plan = Plan::single(synthesize_fast_path_step(&intent_match.intent_type));
            let result = self.run_plan(&plan, instruction, ctx, emit).await;
            self.enqueue_memory_write(instruction, &result, started_at);
            return result;
        }

        if ctx.stop.is_fired() {
            return cancelled_result(ctx, instruction);
        }

        // Step 3: memory-conditioned planning.
        let memory_context = self.deps.memory.context_for(instruction, true, 2_000).await;
        emit(InternalEvent {
            event_type: crate::schema::InternalEventType::Thinking,
            data: json!({ "phase": "planning", "summary": "calling planner" }),
        });

        let plan = self.deps.planner.plan(instruction, &memory_context).await;
        if plan.steps.is_empty() {
            let result = TaskResult {
                success: false,
                message: "planning failed".to_string(),
                steps: Vec::new(),
                user_instruction: instruction.to_string(),
            };
            self.enqueue_memory_write(instruction, &result, started_at);
            return result;
        }

        emit(InternalEvent {
            event_type: crate::schema::InternalEventType::PlanReady,
            data: json!({ "phase": "plan_ready", "summary": format!("{} steps", plan.steps.len()) }),
        });

        let result = self.run_plan(&plan, instruction, ctx, emit).await;
        self.enqueue_memory_write(instruction, &result, started_at);
        result
    }

    async fn run_plan(
        &self,
        plan: &Plan,
        instruction: &str,
        ctx: &mut ExecutionContext,
        emit: &mut dyn FnMut(InternalEvent),
    ) -> TaskResult {
        let config = PlanExecutorConfig {
            max_attempts: self.deps.config.max_step_attempts(),
            sensitive_gate_timeout: self.deps.config.sensitive_gate_timeout(),
            sensitive_gate_poll_interval: self.deps.config.sensitive_gate_poll_interval(),
        };
        let plan_executor = PlanExecutor::new(&self.deps.registry, &self.deps.reflector, config);
        plan_executor.execute_plan(plan, instruction, ctx, emit).await
    }

    fn enqueue_memory_write(&self, instruction: &str, result: &TaskResult, started_at: Instant) {
        self.deps.memory_queue.save_task_result(SaveTaskResult {
            instruction: instruction.to_string(),
            steps: result.steps.clone(),
            success: result.success,
            duration_s: started_at.elapsed().as_secs_f64(),
        });
    }
}

fn cancelled_result(ctx: &ExecutionContext, instruction: &str) -> TaskResult {
    TaskResult {
        success: false,
        message: "task cancelled".to_string(),
        steps: ctx.step_results.clone(),
        user_instruction: instruction.to_string(),
    }
}

/// One-step plans synthesized directly from a fast-path intent match;
/// these cover the "simple operations only" coverage of §4.2 (screen-
/// shot, volume, brightness, system-info, app open/close).
fn synthesize_fast_path_step(intent_type: &str) -> Step {
    let step_type = match intent_type {
        "screenshot" => "screenshot_desktop",
        "volume_control" => "volume_control",
        "brightness_control" => "brightness_control",
        "system_info" => "system_info",
        "app_open" => "app_open",
        "app_close" => "app_close",
        "translate" => "text_translate",
        "summarize" => "text_summarize",
        "polish" => "text_polish",
        other => other,
    };
    Step { step_type: step_type.to_string(), action: None, params: json!({}), description: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_path_maps_known_intents_to_step_types() {
        assert_eq!(synthesize_fast_path_step("screenshot").step_type, "screenshot_desktop");
        assert_eq!(synthesize_fast_path_step("app_open").step_type, "app_open");
    }
}
