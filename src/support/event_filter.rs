//! Orchestrator-boundary event filter/dedupe pass (§4.5.2). Maps
//! internal events to the narrow outbound vocabulary, strips internal
//! detail, and suppresses consecutive duplicates.

use crate::schema::{InternalEvent, InternalEventType};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DedupeKey {
    mapped_type: String,
    description: Option<String>,
    step_index: Option<i64>,
}

pub struct EventFilter {
    last: Option<DedupeKey>,
}

impl EventFilter {
    pub fn new() -> Self {
        EventFilter { last: None }
    }

    /// Returns `Some((mapped_type, data))` if the event should be
    /// forwarded to the host, or `None` if it's unknown-typed or a
    /// duplicate of the immediately preceding event.
    pub fn filter(&mut self, event: &InternalEvent) -> Option<(String, Value)> {
        let mapped_type = map_type(event.event_type)?;
        let data = sanitize_content(mapped_type, &event.data);

        let description = data.get("description").and_then(Value::as_str).map(str::to_string);
        let step_index = data.get("step_index").and_then(Value::as_i64);

        let key = DedupeKey { mapped_type: mapped_type.to_string(), description, step_index };
        if self.last.as_ref() == Some(&key) {
            return None;
        }
        self.last = Some(key);

        Some((mapped_type.to_string(), data))
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn map_type(event_type: InternalEventType) -> Option<&'static str> {
    use InternalEventType::*;
    Some(match event_type {
        ExecutionStarted | StepStarted => "executing",
        StepCompleted => "success",
        StepFailed => "error",
        Thinking | PlanReady | SensitiveOperationDetected => "thinking",
        Error => "error",
    })
}

fn sanitize_content(mapped_type: &str, data: &Value) -> Value {
    match mapped_type {
        "thinking" => {
            let phase = data.get("phase").cloned().unwrap_or(Value::Null);
            let summary = data
                .get("summary")
                .and_then(Value::as_str)
                .map(|s| truncate(s, 50))
                .unwrap_or_default();
            json!({ "phase": phase, "summary": summary })
        }
        "executing" | "success" => json!({
            "description": data.get("description").cloned().unwrap_or(Value::Null),
            "step_index": data.get("step_index").cloned().unwrap_or(Value::Null),
            "total_steps": data.get("total_steps").cloned().unwrap_or(Value::Null),
        }),
        "error" => json!({
            "message": data.get("message").cloned().unwrap_or(Value::Null),
            "description": data.get("description").cloned().unwrap_or(Value::Null),
            "step_index": data.get("step_index").cloned().unwrap_or(Value::Null),
            "total_steps": data.get("total_steps").cloned().unwrap_or(Value::Null),
        }),
        _ => Value::Null,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: InternalEventType, data: Value) -> InternalEvent {
        InternalEvent { event_type, data }
    }

    #[test]
    fn dedupes_consecutive_identical_events() {
        let mut filter = EventFilter::new();
        let e = event(InternalEventType::StepStarted, json!({ "description": "click", "step_index": 0 }));
        assert!(filter.filter(&e).is_some());
        assert!(filter.filter(&e).is_none());
    }

    #[test]
    fn strips_raw_params_from_error() {
        let mut filter = EventFilter::new();
        let e = event(
            InternalEventType::StepFailed,
            json!({ "message": "boom", "params": {"secret": "x"}, "step_index": 1 }),
        );
        let (mapped, data) = filter.filter(&e).unwrap();
        assert_eq!(mapped, "error");
        assert!(data.get("params").is_none());
        assert_eq!(data["message"], "boom");
    }
}
