//! Planner (C4): one chat completion that turns an instruction plus
//! memory context into a typed [`crate::schema::Plan`]. Grounded on
//! `llm_gateway::plan_next_step`/`generate_plan_with_feedback`'s
//! tolerant-parsing behavior (strict JSON first, then a regex-extracted
//! first balanced `{...}` substring) and `post_with_retry`'s backoff,
//! reused here via [`crate::llm::LLMClient::chat_completion`].

use crate::executor_registry;
use crate::llm::LLMClient;
use crate::schema::{Plan, Step};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

static BALANCED_BRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{").unwrap());

pub struct Planner {
    llm: Arc<LLMClient>,
}

impl Planner {
    pub fn new(llm: Arc<LLMClient>) -> Self {
        Planner { llm }
    }

    /// Stateless across calls — memory conditioning flows in only
    /// through `memory_context`. On persistent parse failure, returns
    /// an empty plan; the orchestrator surfaces "planning failed".
    pub async fn plan(&self, instruction: &str, memory_context: &str) -> Plan {
        let system_prompt = build_system_prompt();
        let user_prompt = format!(
            "User instruction: {}\n\nRelevant memory context:\n{}\n\nRespond with strict JSON only: {{\"steps\": [...]}}",
            instruction, memory_context
        );

        let messages = vec![
            serde_json::json!({ "role": "system", "content": system_prompt }),
            serde_json::json!({ "role": "user", "content": user_prompt }),
        ];

        let raw = match self.llm.chat_completion(messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "planner LLM call failed");
                return Plan::empty();
            }
        };

        match parse_plan(&raw) {
            Some(plan) => plan,
            None => {
                tracing::warn!(raw = %raw, "planner output unparseable, returning empty plan");
                Plan::empty()
            }
        }
    }
}

/// Enumerates the executor-step catalogue, documents the placeholder
/// grammar, and requires strict JSON (§4.4).
fn build_system_prompt() -> String {
    let types = [
        executor_registry::filesystem_types(),
        executor_registry::browser_types(),
        executor_registry::email_types(),
        executor_registry::system_types(),
    ]
    .concat();

    format!(
        "You are the planning module of a desktop automation agent. \
         Produce a plan as strict JSON: {{\"steps\": [{{\"type\": str, \"action\": str?, \
         \"params\": object, \"description\": str?}}]}}. \
         Supported step types: {}. Also accepted: execute_python_script, visual_assist. \
         A step's params may reference a previous step's result data with the placeholder \
         grammar {{{{stepN.path}}}}, where N is 1-based and path is a dotted/indexed \
         expression such as result.emails[0].id. Only reference steps that precede the \
         current one. Mark a step sensitive by prefixing its description with \
         \"[SENSITIVE]\" when it has an irreversible or high-impact side effect \
         (deleting files, sending emails, making payments). Respond with JSON only, no \
         prose, no markdown fences.",
        types.join(", ")
    )
}

/// Tolerant parse: strict JSON first, then the first balanced `{...}`
/// substring extracted via brace counting (not a true regex — `regex`
/// cannot express brace balancing, so this walks the string directly
/// once the first `{` is located by `BALANCED_BRACE_RE`).
fn parse_plan(raw: &str) -> Option<Plan> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        if let Some(plan) = value_to_plan(&value) {
            return Some(plan);
        }
    }

    let start = BALANCED_BRACE_RE.find(raw)?.start();
    let candidate = extract_balanced(&raw[start..])?;
    let value: Value = serde_json::from_str(&candidate).ok()?;
    value_to_plan(&value)
}

fn value_to_plan(value: &Value) -> Option<Plan> {
    let steps_value = value.get("steps")?;
    let steps: Vec<Step> = serde_json::from_value(steps_value.clone()).ok()?;
    Some(Plan { steps })
}

/// Walks a string starting at its first `{`, tracking brace depth while
/// respecting quoted strings, and returns the first balanced substring.
fn extract_balanced(s: &str) -> Option<String> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json() {
        let raw = r#"{"steps":[{"type":"screenshot_desktop","params":{}}]}"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].step_type, "screenshot_desktop");
    }

    #[test]
    fn parses_balanced_brace_embedded_in_prose() {
        let raw = "Sure, here is the plan:\n```json\n{\"steps\":[{\"type\":\"app_open\",\"params\":{\"name\":\"chrome\"}}]}\n```\nLet me know if that works.";
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].step_type, "app_open");
    }

    #[test]
    fn unparseable_output_yields_none() {
        assert!(parse_plan("not json at all").is_none());
    }

    #[test]
    fn balanced_extraction_ignores_braces_in_strings() {
        let raw = r#"{"steps":[{"type":"file_write","params":{"content":"a { b } c"}}]}"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.steps[0].params["content"], "a { b } c");
    }
}
