//! Adaptive rule engine — maps learner telemetry to UI/content actions.
//!
//! Each telemetry event is turned into an immutable [`Snapshot`] of signals,
//! every active rule in the [`Catalog`] is tested against it, and the
//! [`SelectionPolicy`] resolves conflicts before the surviving actions are
//! handed to a [`Dispatcher`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │ TelemetryEvent │──▶│  Snapshot    │──▶│   Trigger    │──▶│ Selection  │
//! │ + Profile      │   │  Builder     │   │  Evaluation  │   │  Policy    │
//! └───────────────┘   └──────────────┘   └──────────────┘   └─────┬──────┘
//!                                                                 │
//!                                                           ┌─────▼──────┐
//!                                                           │ Dispatcher │
//!                                                           │  → Sink    │
//!                                                           └────────────┘
//! ```
//!
//! # Example Rule
//!
//! ```json
//! {
//!   "AI_SENSORY_REDUCE": {
//!     "trigger": "learner_profile.contains('autistic_profile') || sensory_overload_detected == true",
//!     "action": "reduce_sensory_input",
//!     "modifiers": { "visual_contrast": "neutral", "audio_volume": "low" }
//!   }
//! }
//! ```

mod builtin;
mod catalog;
mod dispatch;
mod engine;
mod model;
mod parser;
mod selection;
mod snapshot;

pub use builtin::{builtin_rule_set, builtin_rules, builtin_rules_json};
pub use catalog::{Catalog, LoadReport, RuleCatalog, UpsertOutcome};
pub use dispatch::{DispatchOptions, Dispatcher, LogSink, MemorySink};
pub use engine::{AdaptiveEngine, EngineBuilder, Evaluation};
pub use model::{Rule, RuleDefinition, RuleSet};
pub use parser::{
    CompareOp, Comparison, Literal, MAX_NESTING, MAX_TOKENS, TriggerExpr, parse_trigger,
};
pub use selection::{ConflictTable, Selection, SelectionPolicy, SuppressedRule, SuppressionReason};
pub use snapshot::{
    ATTENTION_DROP_DETECTED, CONTEXT_FLAGS, LEARNING_STYLE_SIGNAL, LONG_CONTENT_DETECTED,
    PROFILE_SIGNAL, SENSORY_OVERLOAD_DETECTED, SignalKind, SignalSchema, SignalThresholds,
    SignalValue, Snapshot, SnapshotBuilder, validate_event,
};

/// Re-export for convenience.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors from the rule engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("trigger parse error in rule '{name}': {detail}")]
    ConditionParse { name: String, detail: String },

    #[error("{metric_type} event is missing field '{field}'")]
    MissingField { metric_type: String, field: String },

    #[error("invalid value {value} for field '{field}': {reason}")]
    InvalidField {
        field: String,
        value: String,
        reason: String,
    },

    #[error("duplicate rule name '{0}'")]
    DuplicateName(String),

    #[error("rule '{0}' not found")]
    NotFound(String),

    #[error("invalid rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    #[error("rule JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rule file error: {0}")]
    Io(#[from] std::io::Error),
}
