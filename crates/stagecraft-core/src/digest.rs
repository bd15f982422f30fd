use sha2::{Digest, Sha256};
use serde::Serialize;

/// Computes a stable content digest for a serializable value, used as the
/// `input_digest`/`output_digest` on a `SkillExecution` and for the
/// Orchestrator's idempotent-reuse check.
///
/// Returns a lowercase hex-encoded SHA-256 digest of the value's canonical
/// JSON serialization. Falls back to hashing the Debug-formatted value if
/// serialization fails, so this never panics in the caller's hot path.
pub fn digest_of<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_else(|_| b"<unserializable>".to_vec());
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_input_same_digest() {
        let a = digest_of(&json!({"x": 1, "y": "z"}));
        let b = digest_of(&json!({"x": 1, "y": "z"}));
        assert_eq!(a, b);
    }

    #[test]
    fn different_input_different_digest() {
        let a = digest_of(&json!({"x": 1}));
        let b = digest_of(&json!({"x": 2}));
        assert_ne!(a, b);
    }
}
