//! Quality gate evaluation for completing stages.
//!
//! Evaluation is total: every declared gate runs even after an earlier one
//! fails, so the returned findings are always complete. Only a failing
//! `blocking` gate prevents a stage from completing; non-blocking failures
//! are reported as warnings.

use regex::Regex;
use serde_json::Value;
use stagecraft_registry::{GateKind, QualityGate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A predicate registered under `custom_predicate` gates, evaluated against
/// a stage's accumulated outputs.
pub type Predicate = Arc<dyn Fn(&HashMap<String, Value>) -> bool + Send + Sync>;

/// The result of evaluating a single gate.
#[derive(Debug, Clone)]
pub struct GateFinding {
    pub gate_id: String,
    pub kind: GateKind,
    pub pass: bool,
    pub blocking: bool,
    pub message: String,
}

/// The aggregate result of evaluating every gate declared on a stage.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    /// `true` iff every blocking gate passed. Non-blocking failures do not
    /// affect this flag.
    pub pass: bool,
    pub findings: Vec<GateFinding>,
}

impl GateOutcome {
    /// Findings for gates that failed, blocking or not.
    pub fn failures(&self) -> impl Iterator<Item = &GateFinding> {
        self.findings.iter().filter(|f| !f.pass)
    }
}

/// Evaluates a stage's declared gates against its produced outputs.
#[derive(Default)]
pub struct GateEvaluator {
    predicates: HashMap<String, Predicate>,
}

impl GateEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `custom_predicate` implementation. The registry's loader
    /// already guarantees every `custom_predicate` gate references a known
    /// predicate id before a workflow can start; this is where that id gets
    /// bound to actual logic.
    pub fn register_predicate(
        &mut self,
        id: impl Into<String>,
        predicate: impl Fn(&HashMap<String, Value>) -> bool + Send + Sync + 'static,
    ) {
        self.predicates.insert(id.into(), Arc::new(predicate));
    }

    /// Evaluate every gate in declaration order against `outputs`, never
    /// short-circuiting on an earlier failure.
    pub fn evaluate(&self, gates: &[QualityGate], outputs: &HashMap<String, Value>) -> GateOutcome {
        let findings: Vec<GateFinding> = gates.iter().map(|gate| self.evaluate_one(gate, outputs)).collect();

        let pass = findings.iter().all(|f| f.pass || !f.blocking);

        GateOutcome { pass, findings }
    }

    fn evaluate_one(&self, gate: &QualityGate, outputs: &HashMap<String, Value>) -> GateFinding {
        let (pass, message) = match gate.kind {
            GateKind::ArtifactExists => self.eval_artifact_exists(gate, outputs),
            GateKind::RegexMatch => self.eval_regex_match(gate, outputs),
            GateKind::CountThreshold => self.eval_count_threshold(gate, outputs),
            GateKind::CustomPredicate => self.eval_custom_predicate(gate, outputs),
        };

        if !pass {
            warn!(gate = %gate.id, kind = ?gate.kind, blocking = gate.blocking, "quality gate failed");
        }

        GateFinding {
            gate_id: gate.id.clone(),
            kind: gate.kind,
            pass,
            blocking: gate.blocking,
            message,
        }
    }

    fn eval_artifact_exists(&self, gate: &QualityGate, outputs: &HashMap<String, Value>) -> (bool, String) {
        let output_name = match gate.parameters.get("output").and_then(Value::as_str) {
            Some(name) => name,
            None => return (false, format!("artifact_exists({}) missing 'output' parameter", gate.id)),
        };

        let pass = match outputs.get(output_name) {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };

        let message = if pass {
            format!("artifact_exists({output_name}) passed")
        } else {
            format!("artifact_exists({output_name}) failed")
        };
        (pass, message)
    }

    fn eval_regex_match(&self, gate: &QualityGate, outputs: &HashMap<String, Value>) -> (bool, String) {
        let output_name = match gate.parameters.get("output").and_then(Value::as_str) {
            Some(name) => name,
            None => return (false, format!("regex_match({}) missing 'output' parameter", gate.id)),
        };
        let pattern = match gate.parameters.get("pattern").and_then(Value::as_str) {
            Some(p) => p,
            None => return (false, format!("regex_match({}) missing 'pattern' parameter", gate.id)),
        };

        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return (false, format!("regex_match({output_name}) invalid pattern: {e}")),
        };

        let text = match outputs.get(output_name) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return (false, format!("regex_match({output_name}) output missing")),
        };

        let pass = regex.is_match(&text);
        let message = if pass {
            format!("regex_match({output_name}) matched /{pattern}/")
        } else {
            format!("regex_match({output_name}) did not match /{pattern}/")
        };
        (pass, message)
    }

    fn eval_count_threshold(&self, gate: &QualityGate, outputs: &HashMap<String, Value>) -> (bool, String) {
        let output_name = match gate.parameters.get("output").and_then(Value::as_str) {
            Some(name) => name,
            None => return (false, format!("count_threshold({}) missing 'output' parameter", gate.id)),
        };
        let threshold = match gate.parameters.get("threshold").and_then(Value::as_f64) {
            Some(t) => t,
            None => return (false, format!("count_threshold({}) missing 'threshold' parameter", gate.id)),
        };

        let value = match outputs.get(output_name).and_then(Value::as_f64) {
            Some(v) => v,
            None => return (false, format!("count_threshold({output_name}) output is not numeric")),
        };

        let pass = value >= threshold;
        let message = if pass {
            format!("count_threshold({output_name}) {value} >= {threshold}")
        } else {
            format!("count_threshold({output_name}) {value} < {threshold}")
        };
        (pass, message)
    }

    fn eval_custom_predicate(&self, gate: &QualityGate, outputs: &HashMap<String, Value>) -> (bool, String) {
        let predicate_id = gate
            .parameters
            .get("predicate_id")
            .and_then(Value::as_str)
            .unwrap_or(gate.id.as_str());

        match self.predicates.get(predicate_id) {
            Some(predicate) => {
                let pass = predicate(outputs);
                let message = format!("custom_predicate({predicate_id}) {}", if pass { "passed" } else { "failed" });
                (pass, message)
            }
            None => (
                false,
                format!("custom_predicate({predicate_id}) has no registered implementation"),
            ),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(id: &str, kind: GateKind, params: &[(&str, Value)], blocking: bool) -> QualityGate {
        QualityGate {
            id: id.into(),
            kind,
            parameters: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            blocking,
        }
    }

    #[test]
    fn artifact_exists_passes_on_nonempty_output() {
        let evaluator = GateEvaluator::new();
        let gates = vec![gate(
            "g1",
            GateKind::ArtifactExists,
            &[("output", json!("result"))],
            true,
        )];
        let outputs = HashMap::from([("result".to_string(), json!("some content"))]);

        let outcome = evaluator.evaluate(&gates, &outputs);
        assert!(outcome.pass);
    }

    #[test]
    fn artifact_exists_fails_on_empty_output_and_blocks() {
        let evaluator = GateEvaluator::new();
        let gates = vec![gate(
            "g1",
            GateKind::ArtifactExists,
            &[("output", json!("result"))],
            true,
        )];
        let outputs = HashMap::from([("result".to_string(), json!(""))]);

        let outcome = evaluator.evaluate(&gates, &outputs);
        assert!(!outcome.pass);
        assert_eq!(outcome.failures().count(), 1);
    }

    #[test]
    fn non_blocking_failure_does_not_block_the_stage() {
        let evaluator = GateEvaluator::new();
        let gates = vec![gate(
            "g1",
            GateKind::ArtifactExists,
            &[("output", json!("result"))],
            false,
        )];
        let outputs = HashMap::from([("result".to_string(), json!(""))]);

        let outcome = evaluator.evaluate(&gates, &outputs);
        assert!(outcome.pass, "non-blocking gate failure must not block the stage");
        assert_eq!(outcome.failures().count(), 1, "the failure is still reported");
    }

    #[test]
    fn evaluation_is_total_even_after_earlier_failure() {
        let evaluator = GateEvaluator::new();
        let gates = vec![
            gate("g1", GateKind::ArtifactExists, &[("output", json!("missing"))], true),
            gate("g2", GateKind::ArtifactExists, &[("output", json!("present"))], true),
        ];
        let outputs = HashMap::from([("present".to_string(), json!("x"))]);

        let outcome = evaluator.evaluate(&gates, &outputs);
        assert_eq!(outcome.findings.len(), 2, "both gates must be evaluated");
        assert!(!outcome.findings[0].pass);
        assert!(outcome.findings[1].pass);
    }

    #[test]
    fn regex_match_evaluates_pattern_against_output() {
        let evaluator = GateEvaluator::new();
        let gates = vec![gate(
            "g1",
            GateKind::RegexMatch,
            &[("output", json!("summary")), ("pattern", json!(r"^[A-Z]"))],
            true,
        )];
        let outputs = HashMap::from([("summary".to_string(), json!("Looks good"))]);

        assert!(evaluator.evaluate(&gates, &outputs).pass);
    }

    #[test]
    fn count_threshold_compares_numeric_output() {
        let evaluator = GateEvaluator::new();
        let gates = vec![gate(
            "g1",
            GateKind::CountThreshold,
            &[("output", json!("coverage")), ("threshold", json!(0.8))],
            true,
        )];
        let passing = HashMap::from([("coverage".to_string(), json!(0.95))]);
        let failing = HashMap::from([("coverage".to_string(), json!(0.5))]);

        assert!(evaluator.evaluate(&gates, &passing).pass);
        assert!(!evaluator.evaluate(&gates, &failing).pass);
    }

    #[test]
    fn custom_predicate_calls_registered_function() {
        let mut evaluator = GateEvaluator::new();
        evaluator.register_predicate("has_tests", |outputs| outputs.contains_key("test_report"));

        let gates = vec![gate(
            "g1",
            GateKind::CustomPredicate,
            &[("predicate_id", json!("has_tests"))],
            true,
        )];

        assert!(!evaluator.evaluate(&gates, &HashMap::new()).pass);
        let outputs = HashMap::from([("test_report".to_string(), json!("ok"))]);
        assert!(evaluator.evaluate(&gates, &outputs).pass);
    }

    #[test]
    fn custom_predicate_falls_back_to_gate_id() {
        let mut evaluator = GateEvaluator::new();
        evaluator.register_predicate("g1", |_| true);

        let gates = vec![gate("g1", GateKind::CustomPredicate, &[], true)];
        assert!(evaluator.evaluate(&gates, &HashMap::new()).pass);
    }
}
