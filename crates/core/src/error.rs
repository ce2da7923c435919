//! Error types for the dispatch boundary.
//!
//! Uses `thiserror` for ergonomic error definitions. Engine-side errors live
//! in `nvlp-engine`; this module only covers what a [`crate::DispatchSink`]
//! or the dispatcher in front of it can report.

use thiserror::Error;

/// Why a batch of triggered actions did not reach its sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Sink '{sink}' rejected batch: {reason}")]
    Rejected { sink: String, reason: String },

    #[error("Sink '{sink}' timed out after {timeout_ms}ms")]
    Timeout { sink: String, timeout_ms: u64 },

    #[error("Dispatch queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Dispatcher is closed")]
    Closed,
}

impl DispatchError {
    /// Convenience constructor for sinks that refuse a batch.
    pub fn rejected(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            sink: sink.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_displays_sink_and_reason() {
        let err = DispatchError::rejected("ui", "learner offline");
        assert!(err.to_string().contains("ui"));
        assert!(err.to_string().contains("learner offline"));
    }

    #[test]
    fn timeout_displays_duration() {
        let err = DispatchError::Timeout {
            sink: "log".into(),
            timeout_ms: 250,
        };
        assert!(err.to_string().contains("250ms"));
    }
}
