//! Core data model shared across the orchestration kernel: steps, plans,
//! execution context, memory records, and the stdio protocol envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One unit of planned work. `params` may contain `{{stepN.path}}` placeholders
/// resolved by [`crate::placeholder`] before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl Step {
    pub fn is_sensitive(&self) -> bool {
        self.description
            .as_deref()
            .map(|d| d.starts_with("[SENSITIVE]"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn empty() -> Self {
        Plan { steps: Vec::new() }
    }

    pub fn single(step: Step) -> Self {
        Plan { steps: vec![step] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl StepResult {
    pub fn ok(message: impl Into<String>) -> Self {
        StepResult { success: true, message: message.into(), data: None }
    }

    pub fn ok_with_data(message: impl Into<String>, data: Value) -> Self {
        StepResult { success: true, message: message.into(), data: Some(data) }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        StepResult { success: false, message: message.into(), data: None }
    }

    pub fn config_error(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        StepResult {
            success: false,
            message: message.into(),
            data: Some(serde_json::json!({
                "is_config_error": true,
                "suggestions": suggestions,
            })),
        }
    }

    pub fn requires_user_action(message: impl Into<String>) -> Self {
        StepResult {
            success: false,
            message: message.into(),
            data: Some(serde_json::json!({ "requires_user_action": true })),
        }
    }

    /// `data.is_config_error` or `data.requires_user_action`: a terminal
    /// signal that MUST suppress Reflector-driven retry.
    pub fn is_terminal_failure(&self) -> bool {
        if self.success {
            return false;
        }
        match &self.data {
            Some(Value::Object(map)) => {
                map.get("is_config_error").and_then(Value::as_bool).unwrap_or(false)
                    || map.get("requires_user_action").and_then(Value::as_bool).unwrap_or(false)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub result: StepResult,
}

/// Single-shot cooperative cancellation token, threaded by argument rather
/// than kept in a string-keyed context bag (see SPEC_FULL.md §3, §9).
#[derive(Debug, Clone)]
pub struct StopSignal {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        StopSignal { fired: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already fired, else waits for `fire()` or the
    /// given duration, whichever comes first.
    pub async fn wait_or_timeout(&self, dur: std::time::Duration) -> bool {
        if self.is_fired() {
            return true;
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(dur) => self.is_fired(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task mutable bag passed by reference into every step (§3).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub step_results: Vec<StepRecord>,
    pub stop: StopSignal,
    pub sensitive_confirmations: HashMap<usize, bool>,
    pub file_context_buffer: HashMap<String, Value>,
    pub extra: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(stop: StopSignal) -> Self {
        ExecutionContext {
            step_results: Vec::new(),
            stop,
            sensitive_confirmations: HashMap::new(),
            file_context_buffer: HashMap::new(),
            extra: HashMap::new(),
        }
    }
}

// --- Memory tier records (§3) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub key: String,
    pub value: Value,
    pub category: String,
    pub confidence: f64,
    pub confirmed: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub file_type: String,
    pub operation: String,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeTriple {
    pub id: i64,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub target: Option<String>,
    pub context: Option<String>,
    pub confidence: f64,
    pub importance: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    pub pattern_type: String,
    pub pattern_value: String,
    pub frequency: i64,
    pub last_seen: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionHistoryEntry {
    pub id: i64,
    pub instruction: String,
    pub normalized: String,
    pub steps: Value,
    pub success: bool,
    pub duration_s: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMatch {
    pub intent_type: String,
    pub confidence: f32,
    pub metadata: Value,
    pub is_fast_path: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Frustrated,
    Anxious,
    Tired,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: Emotion,
    pub confidence: f64,
    pub keywords_found: Vec<String>,
    pub suggestion: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatKind {
    None,
    Hourly,
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub message: String,
    pub trigger_time: String,
    pub repeat: RepeatKind,
    pub command: Option<String>,
    pub triggered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub instructions: Vec<String>,
}

// --- Internal event set (§4.5.2) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalEventType {
    ExecutionStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    Thinking,
    PlanReady,
    SensitiveOperationDetected,
    Error,
}

impl InternalEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            InternalEventType::ExecutionStarted => "execution_started",
            InternalEventType::StepStarted => "step_started",
            InternalEventType::StepCompleted => "step_completed",
            InternalEventType::StepFailed => "step_failed",
            InternalEventType::Thinking => "thinking",
            InternalEventType::PlanReady => "plan_ready",
            InternalEventType::SensitiveOperationDetected => "sensitive_operation_detected",
            InternalEventType::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InternalEvent {
    pub event_type: InternalEventType,
    pub data: Value,
}

/// Outbound stdout protocol envelope (§6). `timestamp` is filled in by the
/// server loop at emission time, never computed inside pure logic (keeps
/// business logic free of wall-clock reads).
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    pub steps: Vec<StepRecord>,
    pub user_instruction: String,
}

/// Inbound command line on stdin (§6, §4.9).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command {
    Ping { id: String },
    Execute { id: String, instruction: String, #[serde(default)] context: Option<Value> },
    Stop { id: String },
    Shutdown { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_result_round_trips_through_json() {
        let result = TaskResult {
            success: true,
            message: "done".into(),
            steps: vec![StepRecord {
                step: Step {
                    step_type: "screenshot_desktop".into(),
                    action: None,
                    params: serde_json::json!({}),
                    description: None,
                },
                result: StepResult::ok_with_data("ok", serde_json::json!({"path": "/tmp/a.png"})),
            }],
            user_instruction: "截个图".into(),
        };
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: TaskResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.success, result.success);
        assert_eq!(decoded.message, result.message);
        assert_eq!(decoded.user_instruction, result.user_instruction);
        assert_eq!(decoded.steps.len(), 1);
        assert_eq!(decoded.steps[0].step.step_type, "screenshot_desktop");
    }

    #[test]
    fn config_error_and_requires_user_action_are_terminal() {
        let cfg = StepResult::config_error("no key", vec!["switch provider".into()]);
        assert!(cfg.is_terminal_failure());
        let rua = StepResult::requires_user_action("need login");
        assert!(rua.is_terminal_failure());
        let plain_fail = StepResult::fail("transient network error");
        assert!(!plain_fail.is_terminal_failure());
        let ok = StepResult::ok("fine");
        assert!(!ok.is_terminal_failure());
    }

    #[test]
    fn step_is_sensitive_only_with_prefix() {
        let mut step = Step {
            step_type: "file_delete".into(),
            action: None,
            params: Value::Null,
            description: Some("[SENSITIVE] delete the report".into()),
        };
        assert!(step.is_sensitive());
        step.description = Some("delete the report".into());
        assert!(!step.is_sensitive());
        step.description = None;
        assert!(!step.is_sensitive());
    }

    #[tokio::test]
    async fn stop_signal_wait_or_timeout_resolves_on_fire() {
        let stop = StopSignal::new();
        assert!(!stop.is_fired());
        let waiter = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            waiter.fire();
        });
        let fired = stop.wait_or_timeout(std::time::Duration::from_secs(1)).await;
        assert!(fired);
        assert!(stop.is_fired());
    }

    #[tokio::test]
    async fn stop_signal_wait_or_timeout_returns_false_if_never_fired() {
        let stop = StopSignal::new();
        let fired = stop.wait_or_timeout(std::time::Duration::from_millis(20)).await;
        assert!(!fired);
    }
}
