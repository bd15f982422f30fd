//! Human-in-the-loop escalation via marker detection. Shared by the
//! task-level check in
//! [`crate::orchestrator::Orchestrator::execute_with_collaboration`] and by
//! the `review_flag` `custom_predicate` a [`stagecraft_gate::GateEvaluator`]
//! can register for stage-level gates.

use serde_json::Value;
use std::collections::HashMap;

const MARKERS: &[&str] = &[
    "NEEDS_HUMAN_REVIEW",
    "HUMAN_REVIEW_REQUIRED",
    "CRITICAL_SECURITY_ISSUE",
    "\"APPROVED\":FALSE",
    "\"APPROVED\": FALSE",
];

/// Whether any output carries one of the review markers, case-insensitively.
pub fn detect_review_markers(outputs: &HashMap<String, Value>) -> bool {
    outputs.values().any(|v| value_contains_marker(v))
}

fn value_contains_marker(value: &Value) -> bool {
    match value {
        Value::String(s) => contains_marker(s),
        Value::Object(map) => map.values().any(value_contains_marker),
        Value::Array(items) => items.iter().any(value_contains_marker),
        other => contains_marker(&other.to_string()),
    }
}

fn contains_marker(text: &str) -> bool {
    let upper = text.to_uppercase();
    MARKERS.iter().any(|m| upper.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_markers_in_plain_output() {
        let mut outputs = HashMap::new();
        outputs.insert("result".to_string(), json!("all good"));
        assert!(!detect_review_markers(&outputs));
    }

    #[test]
    fn detects_marker_in_nested_object() {
        let mut outputs = HashMap::new();
        outputs.insert("review".to_string(), json!({"notes": "NEEDS_HUMAN_REVIEW: check this"}));
        assert!(detect_review_markers(&outputs));
    }

    #[test]
    fn detects_approved_false_case_insensitively() {
        let mut outputs = HashMap::new();
        outputs.insert("review".to_string(), json!(r#"{"approved": false}"#));
        assert!(detect_review_markers(&outputs));
    }

    #[test]
    fn detects_marker_in_array_entry() {
        let mut outputs = HashMap::new();
        outputs.insert("notes".to_string(), json!(["fine", "CRITICAL_SECURITY_ISSUE found"]));
        assert!(detect_review_markers(&outputs));
    }
}
