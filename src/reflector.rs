//! Reflector (C5): on step failure, asks a vision-capable LLM to
//! propose a corrected step. Grounds on `replanning_config::
//! get_replan_strategy` + `replan_templates::build_replan_steps` for the
//! non-retryable-override table and WAIT/ACTIVATE/SCROLL retry-step
//! synthesis (kept, adapted from the old `executor::PlanStep` type to
//! `schema::Step`), and on the crate's `image`/base64 vision-message
//! pattern (`llm::chat_completion_vision`) for the screenshot path.

use crate::llm::LLMClient;
use crate::schema::Step;
use image::imageops::FilterType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

const MAX_SCREENSHOT_WIDTH: u32 = 1920;

const BROWSER_ERROR_KEYWORDS: &[&str] = &[
    "selector", "element not found", "element-not-found", "click failed", "fill failed",
    "credential prompt", "未找到元素", "no such element",
];

const NON_RETRYABLE_KEYWORDS: &[&str] = &[
    "missing api key", "api key not set", "capability mismatch", "model cannot see",
    "vision required", "missing dependency", "dependency not installed",
];

static BALANCED_BRACE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{").unwrap());
static PLACEHOLDER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[REPLACE_WITH[^\]]*\]").unwrap());

#[derive(Debug, Clone)]
pub struct ReflectorVerdict {
    pub is_retryable: bool,
    pub modified_step: Option<Step>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    is_retryable: bool,
    #[serde(default)]
    modified_step: Option<Step>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct Reflector {
    llm: Option<Arc<LLMClient>>,
    downloads_dir: PathBuf,
}

impl Reflector {
    pub fn new(llm: Option<Arc<LLMClient>>, downloads_dir: PathBuf) -> Self {
        Reflector { llm, downloads_dir }
    }

    pub async fn analyze_failure(
        &self,
        step: &Step,
        error_message: &str,
        ctx_summary: &str,
    ) -> ReflectorVerdict {
        let Some(llm) = &self.llm else {
            return ReflectorVerdict {
                is_retryable: false,
                modified_step: None,
                reason: "reflector disabled".to_string(),
            };
        };

        if !llm.has_credentials() {
            return ReflectorVerdict {
                is_retryable: false,
                modified_step: None,
                reason: "reflector disabled".to_string(),
            };
        }

        if is_non_retryable_message(error_message) {
            return ReflectorVerdict {
                is_retryable: false,
                modified_step: None,
                reason: "cannot extract from context".to_string(),
            };
        }

        let screenshot_b64 = if is_browser_error(error_message) {
            self.find_and_prepare_screenshot().await
        } else {
            None
        };

        let system_prompt = build_system_prompt(screenshot_b64.is_some());
        let user_prompt = format!(
            "Failed step: {}\nRaw error: {}\nContext summary: {}\n\
             Respond with strict JSON: {{\"is_retryable\": bool, \"modified_step\": {{...}} | null, \"reason\": str}}.",
            serde_json::to_string(step).unwrap_or_default(),
            error_message,
            ctx_summary
        );

        let raw = match &screenshot_b64 {
            Some(b64) => llm.chat_completion_vision(&system_prompt, &user_prompt, b64).await,
            None => {
                llm.chat_completion(vec![
                    serde_json::json!({ "role": "system", "content": system_prompt }),
                    serde_json::json!({ "role": "user", "content": user_prompt }),
                ])
                .await
            }
        };

        let raw = match raw {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "reflector LLM call failed");
                return ReflectorVerdict {
                    is_retryable: false,
                    modified_step: None,
                    reason: "reflector LLM call failed".to_string(),
                };
            }
        };

        match parse_verdict(&raw) {
            Some(verdict) => verdict,
            None => ReflectorVerdict {
                is_retryable: false,
                modified_step: None,
                reason: "reflector returned unparseable output".to_string(),
            },
        }
    }

    /// Finds the most recent `*error_*.png`/`*login_error*.png` under
    /// the configured downloads directory by mtime, downscales to max
    /// width 1920px preserving aspect ratio (halving first if the
    /// capture looks like a Retina screenshot, i.e. width > 2x the
    /// common desktop width), encodes as base64, and deletes the temp
    /// file at the end of analysis regardless of outcome.
    async fn find_and_prepare_screenshot(&self) -> Option<String> {
        let path = self.most_recent_error_screenshot()?;
        let img = image::open(&path).ok()?;

        let is_retina = img.width() > MAX_SCREENSHOT_WIDTH * 2;
        let logical_width = if is_retina { img.width() / 2 } else { img.width() };
        let target_width = logical_width.min(MAX_SCREENSHOT_WIDTH);
        let scale = target_width as f64 / img.width() as f64;
        let target_height = (img.height() as f64 * scale).round() as u32;

        let resized = img.resize(target_width.max(1), target_height.max(1), FilterType::Lanczos3);

        let tmp = tempfile_path();
        resized.save(&tmp).ok()?;
        let bytes = std::fs::read(&tmp).ok();
        let _ = std::fs::remove_file(&tmp);

        bytes.map(|b| {
            use base64::{engine::general_purpose::STANDARD, Engine as _};
            STANDARD.encode(b)
        })
    }

    fn most_recent_error_screenshot(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.downloads_dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter(|e| is_error_screenshot_name(&e.file_name().to_string_lossy()))
            .filter_map(|e| e.metadata().ok().and_then(|m| m.modified().ok()).map(|mt| (e.path(), mt)))
            .max_by_key(|(_, mt)| *mt)
            .map(|(path, _)| path)
    }
}

fn is_error_screenshot_name(name: &str) -> bool {
    name.contains("error_") || name.contains("login_error")
}

fn is_browser_error(message: &str) -> bool {
    let m = message.to_lowercase();
    BROWSER_ERROR_KEYWORDS.iter().any(|kw| m.contains(&kw.to_lowercase()))
}

fn is_non_retryable_message(message: &str) -> bool {
    let m = message.to_lowercase();
    NON_RETRYABLE_KEYWORDS.iter().any(|kw| m.contains(kw))
}

fn build_system_prompt(has_screenshot: bool) -> String {
    let mut prompt = String::from(
        "You are the reflector of a desktop automation agent. A step failed; propose a \
         corrected replacement step or declare the failure terminal. The replacement \
         step's type SHOULD match the original unless the tool choice itself was wrong. \
         Its params MUST contain only concrete, resolved values — never a bracketed \
         placeholder like [REPLACE_WITH_SELECTOR]. If you cannot produce concrete values, \
         set is_retryable to false with reason \"cannot extract from context\".",
    );
    if has_screenshot {
        prompt.push_str(
            " An error screenshot is attached. Report any coordinates in the CSS-pixel \
             viewport coordinate system (halve device-pixel/Retina coordinates before \
             reporting). Never invent coordinates you cannot see.",
        );
    }
    prompt
}

fn parse_verdict(raw: &str) -> Option<ReflectorVerdict> {
    let value = parse_json_tolerant(raw)?;
    let raw_verdict: RawVerdict = serde_json::from_value(value).ok()?;

    if let Some(step) = &raw_verdict.modified_step {
        if PLACEHOLDER_TOKEN.is_match(&step.params.to_string()) {
            return Some(ReflectorVerdict {
                is_retryable: false,
                modified_step: None,
                reason: "cannot extract from context".to_string(),
            });
        }
    }

    Some(ReflectorVerdict {
        is_retryable: raw_verdict.is_retryable,
        modified_step: raw_verdict.modified_step,
        reason: raw_verdict.reason.unwrap_or_default(),
    })
}

fn parse_json_tolerant(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(v);
    }
    let start = BALANCED_BRACE_START.find(raw)?.start();
    let candidate = extract_balanced(&raw[start..])?;
    serde_json::from_str(&candidate).ok()
}

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

fn tempfile_path() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("deskjarvis_reflector_{}.jpg", uuid::Uuid::new_v4()));
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_browser_error_keywords() {
        assert!(is_browser_error("selector not found on page"));
        assert!(is_browser_error("未找到元素"));
        assert!(!is_browser_error("disk full"));
    }

    #[test]
    fn detects_non_retryable_config_messages() {
        assert!(is_non_retryable_message("missing API key for provider"));
        assert!(!is_non_retryable_message("element not found"));
    }

    #[test]
    fn parses_verdict_with_modified_step() {
        let raw = r#"{"is_retryable":true,"modified_step":{"type":"browser_click","params":{"x":640,"y":360}},"reason":"stale selector"}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!(verdict.is_retryable);
        assert!(verdict.modified_step.is_some());
    }

    #[test]
    fn placeholder_token_in_params_downgrades_to_non_retryable() {
        let raw = r#"{"is_retryable":true,"modified_step":{"type":"browser_fill","params":{"value":"[REPLACE_WITH_EMAIL]"}},"reason":"ok"}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!(!verdict.is_retryable);
        assert_eq!(verdict.reason, "cannot extract from context");
    }

    #[test]
    fn error_screenshot_name_matches_glob_patterns() {
        assert!(is_error_screenshot_name("browser_error_20260101.png"));
        assert!(is_error_screenshot_name("login_error_attempt2.png"));
        assert!(!is_error_screenshot_name("screenshot.png"));
    }
}
