//! Startup-time `step_type -> executor` dispatch table (§4.6). Grounds
//! on the four-arm `StepType` match the teacher's execution controller
//! used internally (reconstructed — not present verbatim in the final
//! tree), generalized to the full filesystem/browser/system/email/
//! code_interpreter/visual_assist catalogue, plus
//! `action_schema.rs`'s `normalize_action_name()` match-table idiom
//! folded in as the heuristic type-repair function.

use crate::schema::{ExecutionContext, Step, StepResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Uniform contract every concrete executor implements. Concrete
/// executor bodies (browser automation, IMAP, OCR, …) are external
/// collaborators per §1 — the kernel only ships the dispatch table and
/// trait objects.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute_step(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult;
    fn name(&self) -> &'static str;
}

const FILESYSTEM_TYPES: &[&str] = &[
    "file_create", "file_read", "file_write", "file_delete", "file_rename", "file_move",
    "file_copy", "file_organize", "file_classify", "file_batch_rename", "file_batch_move",
    "file_batch_delete", "list_dir",
];

const BROWSER_TYPES: &[&str] = &[
    "browser_navigate", "browser_click", "browser_fill", "browser_wait", "browser_screenshot",
    "browser_check_element", "download_file", "request_login", "request_captcha",
    "request_qr_login",
];

const EMAIL_TYPES: &[&str] = &[
    "send_email", "search_emails", "get_email_details", "download_attachments",
    "manage_emails", "compress_files",
];

const SYSTEM_TYPES: &[&str] = &[
    "screenshot_desktop", "volume_control", "brightness_control", "system_info", "app_open",
    "app_close", "open_folder", "open_file", "text_translate", "text_summarize", "text_polish",
    "create_reminder", "list_reminders", "run_workflow", "list_workflows", "instruction_history",
    "clipboard_read", "clipboard_write", "keyboard_simulate", "mouse_simulate",
];

/// Heuristic type repairs for step types the Reflector or an upstream
/// planner may emit loosely — e.g. `file_manager` with a deletion
/// `action` really means `file_delete`.
fn repair_type(step_type: &str, action: Option<&str>) -> String {
    let action_lower = action.map(str::to_lowercase).unwrap_or_default();
    match step_type {
        "file_manager" if action_lower.contains("delete") => "file_delete".to_string(),
        "file_manager" if action_lower.contains("rename") => "file_rename".to_string(),
        "file_manager" if action_lower.contains("move") => "file_move".to_string(),
        "file_manager" if action_lower.contains("copy") => "file_copy".to_string(),
        "browser" if action_lower.contains("click") => "browser_click".to_string(),
        "browser" if action_lower.contains("fill") || action_lower.contains("type") => {
            "browser_fill".to_string()
        }
        "browser" if action_lower.contains("navigate") || action_lower.contains("goto") => {
            "browser_navigate".to_string()
        }
        "email" if action_lower.contains("send") => "send_email".to_string(),
        "email" if action_lower.contains("search") => "search_emails".to_string(),
        other => other.to_string(),
    }
}

pub struct ExecutorRegistry {
    by_name: HashMap<&'static str, Arc<dyn Executor>>,
    routes: HashMap<String, &'static str>,
    fallback: Arc<dyn Executor>,
}

impl ExecutorRegistry {
    pub fn builder() -> ExecutorRegistryBuilder {
        ExecutorRegistryBuilder::new()
    }

    /// Resolves a step to its executor, applying heuristic type repair
    /// first. Unknown types dispatch to the system-executor fallback,
    /// which must return an explanatory failure rather than panic.
    pub async fn dispatch(&self, step: &Step, ctx: &mut ExecutionContext) -> StepResult {
        let repaired = repair_type(&step.step_type, step.action.as_deref());
        let executor = self
            .routes
            .get(repaired.as_str())
            .and_then(|name| self.by_name.get(name))
            .unwrap_or(&self.fallback);

        if repaired != step.step_type {
            let mut repaired_step = step.clone();
            repaired_step.step_type = repaired;
            executor.execute_step(&repaired_step, ctx).await
        } else {
            executor.execute_step(step, ctx).await
        }
    }

    pub fn supported_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

pub struct ExecutorRegistryBuilder {
    by_name: HashMap<&'static str, Arc<dyn Executor>>,
    routes: HashMap<String, &'static str>,
}

impl ExecutorRegistryBuilder {
    fn new() -> Self {
        ExecutorRegistryBuilder { by_name: HashMap::new(), routes: HashMap::new() }
    }

    pub fn register(mut self, executor: Arc<dyn Executor>, step_types: &[&str]) -> Self {
        let name = executor.name();
        self.by_name.insert(name, executor);
        for t in step_types {
            self.routes.insert(t.to_string(), name);
        }
        self
    }

    pub fn build(self, fallback: Arc<dyn Executor>) -> ExecutorRegistry {
        ExecutorRegistry { by_name: self.by_name, routes: self.routes, fallback }
    }
}

pub fn filesystem_types() -> &'static [&'static str] {
    FILESYSTEM_TYPES
}
pub fn browser_types() -> &'static [&'static str] {
    BROWSER_TYPES
}
pub fn email_types() -> &'static [&'static str] {
    EMAIL_TYPES
}
pub fn system_types() -> &'static [&'static str] {
    SYSTEM_TYPES
}

/// Default fallback executor for unrecognized step types. Per §4.6,
/// unknown types MUST fail explicitly, listing the supported
/// vocabulary, rather than silently no-op or panic.
pub struct SystemExecutor {
    registry_types: Vec<String>,
}

impl SystemExecutor {
    pub fn new(registry_types: Vec<String>) -> Self {
        SystemExecutor { registry_types }
    }
}

#[async_trait]
impl Executor for SystemExecutor {
    async fn execute_step(&self, step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
        StepResult::fail(format!(
            "unsupported step type '{}'; supported types: {}",
            step.step_type,
            self.registry_types.join(", ")
        ))
    }

    fn name(&self) -> &'static str {
        "system_fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoExecutor;

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute_step(&self, step: &Step, _ctx: &mut ExecutionContext) -> StepResult {
            StepResult::ok(format!("ran {}", step.step_type))
        }
        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn step(step_type: &str, action: Option<&str>) -> Step {
        Step {
            step_type: step_type.to_string(),
            action: action.map(str::to_string),
            params: json!({}),
            description: None,
        }
    }

    #[tokio::test]
    async fn unknown_type_fails_explicitly() {
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(EchoExecutor), &["file_delete"])
            .build(Arc::new(SystemExecutor::new(vec!["file_delete".into()])));
        let mut ctx = ExecutionContext::new(crate::schema::StopSignal::new());
        let result = registry.dispatch(&step("teleport", None), &mut ctx).await;
        assert!(!result.success);
        assert!(result.message.contains("file_delete"));
    }

    #[tokio::test]
    async fn heuristic_repair_routes_file_manager_delete() {
        let registry = ExecutorRegistry::builder()
            .register(Arc::new(EchoExecutor), &["file_delete"])
            .build(Arc::new(SystemExecutor::new(vec!["file_delete".into()])));
        let mut ctx = ExecutionContext::new(crate::schema::StopSignal::new());
        let result = registry.dispatch(&step("file_manager", Some("delete the file")), &mut ctx).await;
        assert!(result.success);
        assert_eq!(result.message, "ran file_delete");
    }

    #[test]
    fn repair_is_identity_for_known_types() {
        assert_eq!(repair_type("browser_click", None), "browser_click");
    }
}
