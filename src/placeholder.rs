//! `{{stepN.path}}` substitution grammar (§4.5.1). Generalizes the
//! teacher's flat named-slot substitution into the full indexed-path
//! addressing the spec requires (`step1.result[0].id`).

use crate::schema::StepRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const NULL_ID: &str = "NULL_ID";

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{step(\d+)\.([^}]+)\}\}").unwrap());

#[derive(Debug)]
pub struct PlaceholderError {
    pub placeholder: String,
    pub step_index: usize,
}

impl std::fmt::Display for PlaceholderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unresolved placeholder {} at step {}", self.placeholder, self.step_index)
    }
}
impl std::error::Error for PlaceholderError {}

/// Recursively substitutes every `{{stepN.path}}` occurrence in `params`
/// using `step_results` (already-dispatched steps of the current task).
/// `current_index` is the 0-based index of the step about to run; a
/// reference to `stepN` with `N >= current_index + 1` is a forward
/// reference and is an error.
///
/// Returns the substituted value, or a `PlaceholderError` naming the
/// first token that could not be resolved (so the caller can hand it to
/// the Reflector per §4.5 step 9).
pub fn substitute(
    params: &Value,
    step_results: &[StepRecord],
    current_index: usize,
) -> Result<Value, PlaceholderError> {
    match params {
        Value::String(s) => substitute_string(s, step_results, current_index).map(Value::String),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute(item, step_results, current_index)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, step_results, current_index)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    step_results: &[StepRecord],
    current_index: usize,
) -> Result<String, PlaceholderError> {
    if !PLACEHOLDER_RE.is_match(s) {
        return Ok(s.to_string());
    }

    let mut result = String::new();
    let mut last_end = 0;
    for caps in PLACEHOLDER_RE.captures_iter(s) {
        let whole = caps.get(0).unwrap();
        result.push_str(&s[last_end..whole.start()]);

        let n: usize = caps[1].parse().unwrap_or(0);
        let path = &caps[2];

        if n == 0 || n >= current_index + 1 {
            return Err(PlaceholderError {
                placeholder: whole.as_str().to_string(),
                step_index: current_index,
            });
        }

        let record = step_results.get(n - 1);
        let resolved = record
            .and_then(|r| r.result.data.as_ref())
            .and_then(|data| walk_path(data, path));

        match resolved {
            Some(value) => result.push_str(&value_to_token(&value)),
            None => {
                tracing::warn!(placeholder = %whole.as_str(), step = current_index, "placeholder resolved to null, substituting NULL_ID");
                result.push_str(NULL_ID);
            }
        }

        last_end = whole.end();
    }
    result.push_str(&s[last_end..]);

    if result.contains(NULL_ID) {
        return Err(PlaceholderError {
            placeholder: s.to_string(),
            step_index: current_index,
        });
    }

    Ok(result)
}

/// Walks a dotted/indexed path (`result.emails[0].id`) into `data`.
fn walk_path(data: &Value, path: &str) -> Option<Value> {
    let mut current = data.clone();
    for segment in split_path(path) {
        match segment {
            PathSegment::Key(key) => match current {
                Value::Object(ref map) => current = map.get(&key)?.clone(),
                _ => return None,
            },
            PathSegment::Index(idx) => match current {
                Value::Array(ref arr) => current = arr.get(idx)?.clone(),
                _ => return None,
            },
        }
        if current.is_null() {
            return None;
        }
    }
    Some(current)
}

enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[0].c` into `[Key(a), Key(b), Index(0), Key(c)]`. A
/// bracket-free segment that is itself a bare integer (`a.0.c`) is also
/// an index, matching the original's `part.isdigit()` list-indexing
/// path (`get_deep_value`).
fn split_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        if let Some(bracket_pos) = part.find('[') {
            let name = &part[..bracket_pos];
            if !name.is_empty() {
                segments.push(PathSegment::Key(name.to_string()));
            }
            let rest = &part[bracket_pos..];
            for idx_str in rest.split('[').skip(1) {
                if let Some(end) = idx_str.find(']') {
                    if let Ok(idx) = idx_str[..end].parse::<usize>() {
                        segments.push(PathSegment::Index(idx));
                    }
                }
            }
        } else if let Ok(idx) = part.parse::<usize>() {
            segments.push(PathSegment::Index(idx));
        } else {
            segments.push(PathSegment::Key(part.to_string()));
        }
    }
    segments
}

fn value_to_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Step, StepResult};
    use serde_json::json;

    fn record(data: Value) -> StepRecord {
        StepRecord {
            step: Step { step_type: "noop".into(), action: None, params: Value::Null, description: None },
            result: StepResult { success: true, message: "ok".into(), data: Some(data) },
        }
    }

    #[test]
    fn resolves_indexed_path() {
        let results = vec![record(json!({ "emails": [{ "id": "abc123" }] }))];
        let params = json!({ "id": "{{step1.emails[0].id}}" });
        let resolved = substitute(&params, &results, 1).unwrap();
        assert_eq!(resolved["id"], "abc123");
    }

    #[test]
    fn resolves_bare_dotted_index_into_list() {
        let results = vec![record(json!({ "result": [{ "id": "xyz789" }] }))];
        let params = json!({ "id": "{{step1.result.0.id}}" });
        let resolved = substitute(&params, &results, 1).unwrap();
        assert_eq!(resolved["id"], "xyz789");
    }

    #[test]
    fn missing_value_becomes_error() {
        let results = vec![record(json!({ "emails": [] }))];
        let params = json!({ "id": "{{step1.emails[0].id}}" });
        let err = substitute(&params, &results, 1).unwrap_err();
        assert_eq!(err.step_index, 1);
    }

    #[test]
    fn forward_reference_is_error() {
        let results = vec![record(json!({}))];
        let params = json!({ "id": "{{step5.x}}" });
        assert!(substitute(&params, &results, 1).is_err());
    }

    #[test]
    fn passthrough_when_no_placeholder() {
        let results: Vec<StepRecord> = Vec::new();
        let params = json!({ "path": "/tmp/report.pdf" });
        let resolved = substitute(&params, &results, 0).unwrap();
        assert_eq!(resolved, params);
    }
}
