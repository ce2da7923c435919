//! Dispatch sink trait — the engine's output boundary.
//!
//! A sink receives the ordered actions produced for one learner and one
//! telemetry event and applies, queues, or records them. The engine never
//! calls a sink on its evaluation path: batches go through a dispatcher
//! that runs sinks on a background task with a timeout, so a sink is free to
//! be slow or unreliable.

use async_trait::async_trait;

use crate::action::DispatchBatch;
use crate::error::DispatchError;

/// A consumer of triggered actions (UI adaptation layer, notifier, log).
#[async_trait]
pub trait DispatchSink: Send + Sync {
    /// A short name for logs and error messages (e.g. "log", "ui").
    fn name(&self) -> &str;

    /// Accept one batch. Returning an error never affects evaluation of
    /// later events; retry policy is up to the sink.
    async fn dispatch(&self, batch: &DispatchBatch) -> Result<(), DispatchError>;
}
