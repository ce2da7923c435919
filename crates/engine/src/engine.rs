//! The adaptive engine pipeline.
//!
//! Snapshot → match → select → dispatch, for one telemetry event at a time.
//! Evaluation takes no locks: the catalog and thresholds are read through
//! atomic snapshots, and dispatch happens on a background task.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use nvlp_core::{
    DispatchBatch, DispatchSink, EngineEvent, EventBus, LearnerProfile, TelemetryEvent,
    TriggeredAction,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::EngineResult;
use crate::catalog::{Catalog, RuleCatalog};
use crate::dispatch::{DispatchOptions, Dispatcher};
use crate::selection::{Selection, SelectionPolicy};
use crate::snapshot::{SignalThresholds, Snapshot, SnapshotBuilder, validate_event};

/// The result of evaluating one event.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub user_id: String,
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub evaluated_at: DateTime<Utc>,
    /// Every rule whose trigger held, in priority order.
    pub matched: Vec<String>,
    #[serde(flatten)]
    pub selection: Selection,
}

impl Evaluation {
    pub fn actions(&self) -> &[TriggeredAction] {
        &self.selection.actions
    }

    pub fn is_empty(&self) -> bool {
        self.selection.actions.is_empty()
    }

    pub fn to_batch(&self) -> DispatchBatch {
        DispatchBatch {
            user_id: self.user_id.clone(),
            event_id: self.event_id,
            occurred_at: self.occurred_at,
            actions: self.selection.actions.clone(),
        }
    }
}

/// Maps telemetry events to adaptation actions.
pub struct AdaptiveEngine {
    catalog: Arc<RuleCatalog>,
    thresholds: ArcSwap<SignalThresholds>,
    policy: SelectionPolicy,
    dispatcher: Option<Dispatcher>,
    events: Arc<EventBus>,
}

impl AdaptiveEngine {
    /// An engine with default thresholds and policy, and no sink.
    pub fn new(catalog: Catalog) -> Self {
        Self::builder(catalog).build()
    }

    pub fn builder(catalog: Catalog) -> EngineBuilder {
        EngineBuilder {
            catalog,
            thresholds: SignalThresholds::default(),
            policy: SelectionPolicy::default(),
            events: None,
            sink: None,
        }
    }

    /// The shared catalog handle. Writes through it are seen by the next
    /// evaluation.
    pub fn catalog(&self) -> &Arc<RuleCatalog> {
        &self.catalog
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub fn thresholds(&self) -> SignalThresholds {
        **self.thresholds.load()
    }

    /// Swap the derived-signal thresholds. The catalog is untouched.
    pub fn set_thresholds(&self, thresholds: SignalThresholds) {
        self.thresholds.store(Arc::new(thresholds));
        info!(
            idle_ratio = thresholds.idle_ratio_threshold,
            completion_rate = thresholds.completion_rate_threshold,
            long_content_minutes = thresholds.long_content_minutes,
            "Signal thresholds updated"
        );
    }

    /// Validate the event and build its snapshot.
    pub fn snapshot(
        &self,
        event: &TelemetryEvent,
        profile: &LearnerProfile,
    ) -> EngineResult<Snapshot> {
        validate_event(event)?;
        SnapshotBuilder::new(self.thresholds()).build(event, profile)
    }

    /// Evaluate one event. No I/O besides logging.
    pub fn evaluate(
        &self,
        event: &TelemetryEvent,
        profile: &LearnerProfile,
    ) -> EngineResult<Evaluation> {
        let snapshot = self.snapshot(event, profile)?;
        let evaluated_at = Utc::now();
        let (matched, selection) = self.evaluate_snapshot(&snapshot, &event.user_id, evaluated_at);

        debug!(
            user_id = %event.user_id,
            event_id = %event.event_id,
            matched = matched.len(),
            selected = selection.actions.len(),
            suppressed = selection.suppressed.len(),
            "Event evaluated"
        );

        Ok(Evaluation {
            user_id: event.user_id.clone(),
            event_id: event.event_id,
            occurred_at: event.occurred_at,
            evaluated_at,
            matched,
            selection,
        })
    }

    /// Match the active rules against a prepared snapshot and select.
    pub fn evaluate_snapshot(
        &self,
        snapshot: &Snapshot,
        user_id: &str,
        matched_at: DateTime<Utc>,
    ) -> (Vec<String>, Selection) {
        let catalog = self.catalog.snapshot();
        let matched: Vec<_> = catalog
            .active_rules()
            .filter(|rule| {
                let hit = rule.matches(snapshot);
                if hit {
                    debug!(rule = %rule.name, %user_id, "Rule matched");
                }
                hit
            })
            .collect();
        let names = matched.iter().map(|r| r.name.clone()).collect();
        let selection = self.policy.select(matched, user_id, matched_at);
        (names, selection)
    }

    /// Evaluate, publish, and hand the result to the dispatcher.
    ///
    /// An event that cannot be evaluated is logged and skipped; `None` is
    /// returned. Dispatch problems never surface here.
    pub fn process(&self, event: &TelemetryEvent, profile: &LearnerProfile) -> Option<Evaluation> {
        let evaluation = match self.evaluate(event, profile) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(
                    user_id = %event.user_id,
                    event_id = %event.event_id,
                    error = %e,
                    "Telemetry event skipped"
                );
                self.events.publish(EngineEvent::EventSkipped {
                    user_id: event.user_id.clone(),
                    event_id: event.event_id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                return None;
            }
        };
        self.deliver(&evaluation);
        Some(evaluation)
    }

    /// Publish an evaluation's outcome and queue its actions for dispatch.
    /// Dispatch problems are published, never returned.
    pub fn deliver(&self, evaluation: &Evaluation) {
        for suppressed in &evaluation.selection.suppressed {
            self.events.publish(EngineEvent::RuleSuppressed {
                user_id: evaluation.user_id.clone(),
                rule_name: suppressed.rule_name.clone(),
                reason: suppressed.reason.to_string(),
                timestamp: evaluation.evaluated_at,
            });
        }

        if !evaluation.is_empty() {
            self.events.publish(EngineEvent::ActionsTriggered {
                user_id: evaluation.user_id.clone(),
                event_id: evaluation.event_id,
                rule_names: evaluation.selection.rule_names(),
                timestamp: evaluation.evaluated_at,
            });

            if let Some(dispatcher) = &self.dispatcher {
                if let Err(e) = dispatcher.submit(evaluation.to_batch()) {
                    self.events.publish(EngineEvent::DispatchFailed {
                        sink: dispatcher.sink_name().to_string(),
                        user_id: evaluation.user_id.clone(),
                        event_id: evaluation.event_id,
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    /// Stop the dispatcher after delivering what is already queued.
    pub async fn shutdown(self) {
        if let Some(dispatcher) = self.dispatcher {
            dispatcher.shutdown().await;
        }
    }
}

/// Configures an [`AdaptiveEngine`].
pub struct EngineBuilder {
    catalog: Catalog,
    thresholds: SignalThresholds,
    policy: SelectionPolicy,
    events: Option<Arc<EventBus>>,
    sink: Option<(Arc<dyn DispatchSink>, DispatchOptions)>,
}

impl EngineBuilder {
    pub fn thresholds(mut self, thresholds: SignalThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Dispatch selected actions to `sink`. `build` must then run inside a
    /// Tokio runtime.
    pub fn sink(mut self, sink: Arc<dyn DispatchSink>, options: DispatchOptions) -> Self {
        self.sink = Some((sink, options));
        self
    }

    pub fn build(self) -> AdaptiveEngine {
        let events = self.events.unwrap_or_default();
        let dispatcher = self
            .sink
            .map(|(sink, options)| Dispatcher::spawn(sink, options, events.clone()));
        AdaptiveEngine {
            catalog: Arc::new(RuleCatalog::with_events(self.catalog, events.clone())),
            thresholds: ArcSwap::from_pointee(self.thresholds),
            policy: self.policy,
            dispatcher,
            events,
        }
    }
}
