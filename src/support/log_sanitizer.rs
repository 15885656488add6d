//! Recursive JSON log sanitizer. Keyword list grounded on
//! `tools/log_sanitizer.py`; generalized from the teacher's flat string
//! matchers to recurse into nested objects/arrays.

use serde_json::Value;

const SENSITIVE_KEYWORDS: &[&str] = &[
    "password", "passwd", "secret", "token", "api_key", "apikey", "auth", "credential",
    "private", "access_key", "session_id",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub fn mask_value(value: &str) -> String {
    if value.len() > 6 {
        format!("{}***{}", &value[..3], &value[value.len() - 3..])
    } else {
        "***".to_string()
    }
}

/// Recursively sanitizes a JSON value, masking string values whose key
/// matches a sensitive keyword.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(mask_scalar(v)));
                } else {
                    out.insert(k.clone(), sanitize(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn mask_scalar(v: &Value) -> String {
    match v {
        Value::String(s) => mask_value(s),
        other => mask_value(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_nested_sensitive_key() {
        let input = json!({ "user": "alice", "credentials": { "api_key": "sk-abcdef123456" } });
        let out = sanitize(&input);
        assert_eq!(out["user"], "alice");
        assert_eq!(out["credentials"]["api_key"], "sk-***456");
    }

    #[test]
    fn masks_short_value_fully() {
        assert_eq!(mask_value("ab"), "***");
    }
}
