//! # NVLP Core
//!
//! Domain types, traits, and error definitions shared by the NVLP adaptive
//! engine crates. Nothing here evaluates rules; this crate only defines the
//! vocabulary the engine and its collaborators speak.
//!
//! ## Boundaries
//!
//! - Telemetry facts flow *in* as [`TelemetryEvent`]s together with a
//!   [`LearnerProfile`].
//! - Triggered adaptations flow *out* as [`TriggeredAction`]s, grouped per
//!   event into a [`DispatchBatch`] and handed to a [`DispatchSink`].
//! - Observers subscribe to [`EngineEvent`]s on the [`EventBus`].

pub mod action;
pub mod error;
pub mod event;
pub mod profile;
pub mod sink;
pub mod telemetry;

// Re-export key types at crate root for ergonomics
pub use action::{DispatchBatch, ModifierValue, Modifiers, TriggeredAction};
pub use error::DispatchError;
pub use event::{EngineEvent, EventBus};
pub use profile::LearnerProfile;
pub use sink::DispatchSink;
pub use telemetry::{EngagementMetric, MetricType, SensoryLog, TelemetryEvent};
