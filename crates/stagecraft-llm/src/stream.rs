use serde::{Deserialize, Serialize};

/// One increment of a streamed completion, trimmed to text-only tokens
/// since this crate has no tool-calling concept of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of generated text.
    TextDelta {
        /// The incremental text.
        text: String,
    },
    /// The stream completed successfully.
    Done,
    /// The backend failed mid-stream.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}
