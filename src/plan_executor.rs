//! Plan Executor (C6): runs a plan end to end. Generalizes the bounded
//! retry-count/backoff idiom shared with the teacher's `scheduler.rs`
//! routine retry loop into the full 9-step per-step flow of §4.5.

use crate::executor_registry::ExecutorRegistry;
use crate::placeholder;
use crate::reflector::Reflector;
use crate::schema::{
    ExecutionContext, InternalEvent, InternalEventType, Step, StepRecord, StepResult, TaskResult,
};
use serde_json::json;
use std::time::Duration;

pub struct PlanExecutorConfig {
    pub max_attempts: u32,
    pub sensitive_gate_timeout: Duration,
    pub sensitive_gate_poll_interval: Duration,
}

impl Default for PlanExecutorConfig {
    fn default() -> Self {
        PlanExecutorConfig {
            max_attempts: 3,
            sensitive_gate_timeout: Duration::from_secs(30),
            sensitive_gate_poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct PlanExecutor<'a> {
    registry: &'a ExecutorRegistry,
    reflector: &'a Reflector,
    config: PlanExecutorConfig,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(registry: &'a ExecutorRegistry, reflector: &'a Reflector, config: PlanExecutorConfig) -> Self {
        PlanExecutor { registry, reflector, config }
    }

    /// Runs the plan in strict step order, emitting internal events via
    /// `emit`. Cooperative cancellation is checked before dispatching
    /// each step; a fired `stop` breaks without dispatching further
    /// steps.
    pub async fn execute_plan(
        &self,
        plan: &crate::schema::Plan,
        instruction: &str,
        ctx: &mut ExecutionContext,
        emit: &mut dyn FnMut(InternalEvent),
    ) -> TaskResult {
        emit(InternalEvent {
            event_type: InternalEventType::ExecutionStarted,
            data: json!({ "step_count": plan.steps.len() }),
        });

        for (i, step) in plan.steps.iter().enumerate() {
            if ctx.stop.is_fired() {
                break;
            }

            emit(InternalEvent {
                event_type: InternalEventType::StepStarted,
                data: json!({
                    "description": step.description.clone().unwrap_or_default(),
                    "step_index": i,
                    "total_steps": plan.steps.len(),
                }),
            });

            let result = self.execute_step_with_retry(step.clone(), i, plan.steps.len(), ctx, emit).await;
            let succeeded = result.success;

            ctx.step_results.push(StepRecord { step: step.clone(), result: result.clone() });

            if succeeded {
                emit(InternalEvent {
                    event_type: InternalEventType::StepCompleted,
                    data: json!({
                        "description": step.description.clone().unwrap_or_default(),
                        "step_index": i,
                        "total_steps": plan.steps.len(),
                    }),
                });
            } else {
                emit(InternalEvent {
                    event_type: InternalEventType::StepFailed,
                    data: json!({
                        "message": result.message,
                        "description": step.description.clone().unwrap_or_default(),
                        "step_index": i,
                        "total_steps": plan.steps.len(),
                    }),
                });
                break;
            }

            if ctx.stop.is_fired() {
                break;
            }
        }

        aggregate(ctx, instruction)
    }

    /// Per-step retry loop (§4.5 steps 1–9).
    async fn execute_step_with_retry(
        &self,
        mut step: Step,
        index: usize,
        total_steps: usize,
        ctx: &mut ExecutionContext,
        emit: &mut dyn FnMut(InternalEvent),
    ) -> StepResult {
        if ctx.stop.is_fired() {
            return StepResult::fail("task cancelled");
        }

        if step.is_sensitive() {
            emit(InternalEvent {
                event_type: InternalEventType::SensitiveOperationDetected,
                data: json!({
                    "description": step.description.clone().unwrap_or_default(),
                    "step_index": index,
                    "total_steps": total_steps,
                }),
            });
            if !self.await_sensitive_confirmation(index, ctx).await {
                return StepResult::fail("user did not confirm");
            }
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if ctx.stop.is_fired() {
                return StepResult::fail("task cancelled");
            }

            let substituted = match placeholder::substitute(&step.params, &ctx.step_results, index) {
                Ok(value) => value,
                Err(placeholder_err) => {
                    let error_message = format!(
                        "unresolved placeholder {} at step {}",
                        placeholder_err.placeholder, placeholder_err.step_index
                    );
                    // Placeholder errors always force reflection (§4.5 step 9),
                    // regardless of remaining attempt budget.
                    let verdict = self
                        .reflector
                        .analyze_failure(&step, &error_message, &ctx_summary(ctx))
                        .await;
                    if verdict.is_retryable && attempt < self.config.max_attempts {
                        if let Some(modified) = verdict.modified_step {
                            emit(InternalEvent {
                                event_type: InternalEventType::Thinking,
                                data: json!({ "phase": "reflection_applied", "summary": verdict.reason }),
                            });
                            step = modified;
                            continue;
                        }
                    }
                    return StepResult::fail(error_message);
                }
            };

            let mut dispatch_step = step.clone();
            dispatch_step.params = substituted;

            if ctx.stop.is_fired() {
                return StepResult::fail("task cancelled");
            }

            let result = self.registry.dispatch(&dispatch_step, ctx).await;

            if result.success {
                return result;
            }

            if result.is_terminal_failure() {
                return result;
            }

            if attempt >= self.config.max_attempts {
                return result;
            }

            let verdict = self.reflector.analyze_failure(&step, &result.message, &ctx_summary(ctx)).await;
            if verdict.is_retryable {
                if let Some(modified) = verdict.modified_step {
                    emit(InternalEvent {
                        event_type: InternalEventType::Thinking,
                        data: json!({ "phase": "reflection_applied", "summary": verdict.reason }),
                    });
                    step = modified;
                    continue;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            return result;
        }
    }

    /// Polls `ctx.sensitive_confirmations[index]` at the configured
    /// cadence for up to the configured timeout. Absence or an explicit
    /// `false` is treated as denial.
    async fn await_sensitive_confirmation(&self, index: usize, ctx: &mut ExecutionContext) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.sensitive_gate_timeout;
        loop {
            if let Some(confirmed) = ctx.sensitive_confirmations.get(&index) {
                return *confirmed;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            if ctx.stop.wait_or_timeout(self.config.sensitive_gate_poll_interval).await {
                return false;
            }
        }
    }
}

fn ctx_summary(ctx: &ExecutionContext) -> String {
    ctx.step_results
        .iter()
        .map(|r| format!("{}: success={}", r.step.step_type, r.result.success))
        .collect::<Vec<_>>()
        .join("; ")
}

fn aggregate(ctx: &ExecutionContext, instruction: &str) -> TaskResult {
    if ctx.stop.is_fired() {
        return TaskResult {
            success: false,
            message: "task cancelled".to_string(),
            steps: ctx.step_results.clone(),
            user_instruction: instruction.to_string(),
        };
    }

    let success = !ctx.step_results.is_empty() && ctx.step_results.iter().all(|r| r.result.success);
    let message = match ctx.step_results.last() {
        Some(last) if !last.result.success => last.result.message.clone(),
        Some(_) => "task completed".to_string(),
        None => "no steps executed".to_string(),
    };

    TaskResult { success, message, steps: ctx.step_results.clone(), user_instruction: instruction.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor_registry::{Executor, ExecutorRegistry, SystemExecutor};
    use crate::reflector::Reflector;
    use crate::schema::StopSignal;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct AlwaysOk;
    #[async_trait]
    impl Executor for AlwaysOk {
        async fn execute_step(&self, _step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
            StepResult::ok_with_data("done", json!({ "id": "abc" }))
        }
        fn name(&self) -> &'static str {
            "ok"
        }
    }

    struct AlwaysFail;
    #[async_trait]
    impl Executor for AlwaysFail {
        async fn execute_step(&self, _step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
            StepResult::fail("boom")
        }
        fn name(&self) -> &'static str {
            "fail"
        }
    }

    fn step(step_type: &str) -> Step {
        Step { step_type: step_type.to_string(), action: None, params: json!({}), description: None }
    }

    #[tokio::test]
    async fn successful_plan_aggregates_to_success() {
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(AlwaysOk), &["noop"])
            .build(Arc::new(SystemExecutor::new(vec!["noop".into()])));
        let reflector = Reflector::new(None, std::env::temp_dir());
        let executor = PlanExecutor::new(&registry, &reflector, PlanExecutorConfig::default());
        let mut ctx = ExecutionContext::new(StopSignal::new());
        let plan = crate::schema::Plan::single(step("noop"));
        let mut events = Vec::new();
        let result = executor.execute_plan(&plan, "do it", &mut ctx, &mut |e| events.push(e)).await;
        assert!(result.success);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn failing_step_exhausts_retries_and_is_terminal() {
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(AlwaysFail), &["noop"])
            .build(Arc::new(SystemExecutor::new(vec!["noop".into()])));
        let reflector = Reflector::new(None, std::env::temp_dir());
        let config = PlanExecutorConfig { max_attempts: 2, ..PlanExecutorConfig::default() };
        let executor = PlanExecutor::new(&registry, &reflector, config);
        let mut ctx = ExecutionContext::new(StopSignal::new());
        let plan = crate::schema::Plan::single(step("noop"));
        let mut events = Vec::new();
        let result = executor.execute_plan(&plan, "do it", &mut ctx, &mut |e| events.push(e)).await;
        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn sensitive_step_without_confirmation_is_terminal() {
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(AlwaysOk), &["file_delete"])
            .build(Arc::new(SystemExecutor::new(vec!["file_delete".into()])));
        let reflector = Reflector::new(None, std::env::temp_dir());
        let config = PlanExecutorConfig {
            sensitive_gate_timeout: Duration::from_millis(20),
            sensitive_gate_poll_interval: Duration::from_millis(5),
            ..PlanExecutorConfig::default()
        };
        let executor = PlanExecutor::new(&registry, &reflector, config);
        let mut ctx = ExecutionContext::new(StopSignal::new());
        let mut sensitive_step = step("file_delete");
        sensitive_step.description = Some("[SENSITIVE] delete the report".to_string());
        let plan = crate::schema::Plan::single(sensitive_step);
        let mut events = Vec::new();
        let result = executor.execute_plan(&plan, "delete it", &mut ctx, &mut |e| events.push(e)).await;
        assert!(!result.success);
        assert_eq!(result.message, "user did not confirm");
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_breaks_plan() {
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(AlwaysOk), &["noop"])
            .build(Arc::new(SystemExecutor::new(vec!["noop".into()])));
        let reflector = Reflector::new(None, std::env::temp_dir());
        let executor = PlanExecutor::new(&registry, &reflector, PlanExecutorConfig::default());
        let mut ctx = ExecutionContext::new(StopSignal::new());
        ctx.stop.fire();
        let plan = crate::schema::Plan { steps: vec![step("noop"), step("noop")] };
        let mut events = Vec::new();
        let result = executor.execute_plan(&plan, "do it", &mut ctx, &mut |e| events.push(e)).await;
        assert!(result.steps.is_empty());
        assert_eq!(result.message, "task cancelled");
    }
}
