//! Inbound telemetry facts.
//!
//! The surrounding application records engagement metrics and sensory logs
//! while a learner works through content. Each record reaches the engine as
//! a [`TelemetryEvent`]: a loosely typed bag of fields tagged with a metric
//! type. The engine extracts the fields it needs when it builds a snapshot,
//! so an unknown metric type or a missing field is reported there, not at
//! deserialization time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Field names shared by the event constructors and the snapshot builder.
pub mod fields {
    pub const TIME_ON_TASK: &str = "time_on_task";
    pub const COMPLETION_RATE: &str = "completion_rate";
    pub const IDLE_RATIO: &str = "idle_ratio";
    pub const MOOD_SCORE: &str = "mood_score";
    pub const SENSORY_OVERLOAD_FLAG: &str = "sensory_overload_flag";
}

/// The kind of telemetry record an event carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricType {
    /// Time on task, completion rate and idle ratio.
    Engagement,
    /// Mood score and sensory overload flag.
    Sensory,
    /// Anything else. Kept so the engine can report it instead of failing
    /// to decode the whole event.
    Other(String),
}

impl From<String> for MetricType {
    fn from(s: String) -> Self {
        if s == "engagement" {
            MetricType::Engagement
        } else if s == "sensory" {
            MetricType::Sensory
        } else {
            MetricType::Other(s)
        }
    }
}

impl From<MetricType> for String {
    fn from(m: MetricType) -> Self {
        match m {
            MetricType::Engagement => "engagement".into(),
            MetricType::Sensory => "sensory".into(),
            MetricType::Other(s) => s,
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Engagement => f.write_str("engagement"),
            MetricType::Sensory => f.write_str("sensory"),
            MetricType::Other(s) => f.write_str(s),
        }
    }
}

/// One telemetry fact about one learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Identifier for correlating dispatch output with its source event.
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,

    /// The learner this fact is about.
    pub user_id: String,

    /// What kind of record `fields` holds.
    pub metric_type: MetricType,

    /// Raw metric fields (e.g. `idle_ratio`, `sensory_overload_flag`).
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Context flags set by the application (e.g. `ambiguity_flag`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,

    /// When the fact was observed.
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Build an engagement event from a typed metric.
    pub fn engagement(user_id: impl Into<String>, metric: EngagementMetric) -> Self {
        let mut values = BTreeMap::new();
        values.insert(fields::TIME_ON_TASK.into(), metric.time_on_task.into());
        values.insert(fields::COMPLETION_RATE.into(), metric.completion_rate.into());
        values.insert(fields::IDLE_RATIO.into(), metric.idle_ratio.into());
        Self::with_fields(user_id, MetricType::Engagement, values)
    }

    /// Build a sensory event from a typed log entry.
    pub fn sensory(user_id: impl Into<String>, log: SensoryLog) -> Self {
        let mut values = BTreeMap::new();
        values.insert(fields::MOOD_SCORE.into(), log.mood_score.into());
        values.insert(
            fields::SENSORY_OVERLOAD_FLAG.into(),
            log.sensory_overload_flag.into(),
        );
        Self::with_fields(user_id, MetricType::Sensory, values)
    }

    /// Build an event from raw fields.
    pub fn with_fields(
        user_id: impl Into<String>,
        metric_type: MetricType,
        fields: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id: user_id.into(),
            metric_type,
            fields,
            flags: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Attach an application context flag.
    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.flags.insert(name.into(), value);
        self
    }
}

/// Engagement measurements for a stretch of learner activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetric {
    /// Minutes spent on the current task.
    pub time_on_task: f64,
    /// Percentage of the task completed (0–100).
    pub completion_rate: f64,
    /// Idle time over active time (0–1).
    pub idle_ratio: f64,
}

/// A learner's self-reported or inferred sensory state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensoryLog {
    /// From -1.0 (negative) to 1.0 (positive).
    pub mood_score: f64,
    pub sensory_overload_flag: bool,
}
