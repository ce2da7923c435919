//! Signal snapshots — the facts a rule trigger can see.
//!
//! A [`Snapshot`] is built fresh for every telemetry event from the event's
//! fields, the application's context flags, and the learner's static
//! profile. It is never mutated after construction.
//!
//! Derived signals are computed here, from thresholds held in
//! [`SignalThresholds`], so rule triggers never embed magic numbers:
//!
//! | Signal | Formula |
//! |---|---|
//! | `attention_drop_detected` | `idle_ratio > idle_ratio_threshold OR completion_rate < completion_rate_threshold` |
//! | `long_content_detected` | `time_on_task > long_content_minutes` |
//! | `sensory_overload_detected` | `sensory_overload_flag` |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use nvlp_core::telemetry::fields;
use nvlp_core::{LearnerProfile, MetricType, TelemetryEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::EngineError;

/// The profile tag set.
pub const PROFILE_SIGNAL: &str = "learner_profile";
/// The learner's preferred learning style, when recorded.
pub const LEARNING_STYLE_SIGNAL: &str = "learning_style";

pub const ATTENTION_DROP_DETECTED: &str = "attention_drop_detected";
pub const LONG_CONTENT_DETECTED: &str = "long_content_detected";
pub const SENSORY_OVERLOAD_DETECTED: &str = "sensory_overload_detected";

/// Boolean flags the application may attach to an event.
pub const CONTEXT_FLAGS: [&str; 4] = [
    "learner_requests_structure",
    "ambiguity_flag",
    "reading_load_high",
    "math_abstraction_difficulty",
];

/// A typed signal value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Num(f64),
    Text(String),
    Tags(BTreeSet<String>),
}

impl SignalValue {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalValue::Bool(_) => SignalKind::Bool,
            SignalValue::Num(_) => SignalKind::Number,
            SignalValue::Text(_) => SignalKind::Text,
            SignalValue::Tags(_) => SignalKind::Tags,
        }
    }
}

/// The type a known signal always has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Bool,
    Number,
    Text,
    Tags,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::Bool => "bool",
            SignalKind::Number => "number",
            SignalKind::Text => "text",
            SignalKind::Tags => "tag-set",
        })
    }
}

/// Every signal a snapshot can contain, with its kind.
///
/// Rule triggers are checked against this at load time.
#[derive(Debug, Clone)]
pub struct SignalSchema {
    signals: BTreeMap<&'static str, SignalKind>,
}

static STANDARD_SCHEMA: LazyLock<SignalSchema> = LazyLock::new(|| {
    let mut signals = BTreeMap::from([
        (PROFILE_SIGNAL, SignalKind::Tags),
        (LEARNING_STYLE_SIGNAL, SignalKind::Text),
        (fields::TIME_ON_TASK, SignalKind::Number),
        (fields::COMPLETION_RATE, SignalKind::Number),
        (fields::IDLE_RATIO, SignalKind::Number),
        (fields::MOOD_SCORE, SignalKind::Number),
        (fields::SENSORY_OVERLOAD_FLAG, SignalKind::Bool),
        (ATTENTION_DROP_DETECTED, SignalKind::Bool),
        (LONG_CONTENT_DETECTED, SignalKind::Bool),
        (SENSORY_OVERLOAD_DETECTED, SignalKind::Bool),
    ]);
    for flag in CONTEXT_FLAGS {
        signals.insert(flag, SignalKind::Bool);
    }
    SignalSchema { signals }
});

impl SignalSchema {
    /// The schema the snapshot builder produces.
    pub fn standard() -> &'static SignalSchema {
        &STANDARD_SCHEMA
    }

    pub fn kind(&self, name: &str) -> Option<SignalKind> {
        self.signals.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, SignalKind)> + '_ {
        self.signals.iter().map(|(name, kind)| (*name, *kind))
    }
}

/// An immutable set of signal values at one evaluation instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    signals: BTreeMap<String, SignalValue>,
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&SignalValue> {
        self.signals.get(name)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.signals.get(name) {
            Some(SignalValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.signals.get(name) {
            Some(SignalValue::Num(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SignalValue)> {
        self.signals.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, SignalValue)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, SignalValue)>>(iter: I) -> Self {
        Self {
            signals: iter.into_iter().collect(),
        }
    }
}

/// Thresholds behind the derived signals (see the module docs).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalThresholds {
    pub idle_ratio_threshold: f64,
    pub completion_rate_threshold: f64,
    pub long_content_minutes: f64,
}

impl Default for SignalThresholds {
    fn default() -> Self {
        Self {
            idle_ratio_threshold: 0.5,
            completion_rate_threshold: 30.0,
            long_content_minutes: 10.0,
        }
    }
}

/// Maps one telemetry event plus a learner profile to a [`Snapshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotBuilder {
    thresholds: SignalThresholds,
}

impl SnapshotBuilder {
    pub fn new(thresholds: SignalThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SignalThresholds {
        &self.thresholds
    }

    /// Build the snapshot. Pure: no I/O, no clock.
    pub fn build(
        &self,
        event: &TelemetryEvent,
        profile: &LearnerProfile,
    ) -> Result<Snapshot, EngineError> {
        let mut signals = BTreeMap::new();
        let t = &self.thresholds;

        match &event.metric_type {
            MetricType::Engagement => {
                let time_on_task = number_field(event, fields::TIME_ON_TASK)?;
                let completion_rate = number_field(event, fields::COMPLETION_RATE)?;
                let idle_ratio = number_field(event, fields::IDLE_RATIO)?;
                if time_on_task.is_none() && completion_rate.is_none() && idle_ratio.is_none() {
                    return Err(missing(event, fields::TIME_ON_TASK));
                }

                if idle_ratio.is_some() || completion_rate.is_some() {
                    let attention_drop = idle_ratio.is_some_and(|r| r > t.idle_ratio_threshold)
                        || completion_rate.is_some_and(|c| c < t.completion_rate_threshold);
                    signals.insert(
                        ATTENTION_DROP_DETECTED.into(),
                        SignalValue::Bool(attention_drop),
                    );
                }
                if let Some(minutes) = time_on_task {
                    signals.insert(
                        LONG_CONTENT_DETECTED.into(),
                        SignalValue::Bool(minutes > t.long_content_minutes),
                    );
                }
                for (name, value) in [
                    (fields::TIME_ON_TASK, time_on_task),
                    (fields::COMPLETION_RATE, completion_rate),
                    (fields::IDLE_RATIO, idle_ratio),
                ] {
                    if let Some(v) = value {
                        signals.insert(name.into(), SignalValue::Num(v));
                    }
                }
            }
            MetricType::Sensory => {
                let mood_score = number_field(event, fields::MOOD_SCORE)?;
                let overload = bool_field(event, fields::SENSORY_OVERLOAD_FLAG)?;
                if mood_score.is_none() && overload.is_none() {
                    return Err(missing(event, fields::SENSORY_OVERLOAD_FLAG));
                }

                if let Some(flag) = overload {
                    signals.insert(fields::SENSORY_OVERLOAD_FLAG.into(), SignalValue::Bool(flag));
                    signals.insert(SENSORY_OVERLOAD_DETECTED.into(), SignalValue::Bool(flag));
                }
                if let Some(mood) = mood_score {
                    signals.insert(fields::MOOD_SCORE.into(), SignalValue::Num(mood));
                }
            }
            MetricType::Other(_) => return Err(missing(event, "metric_type")),
        }

        for (name, value) in &event.flags {
            if CONTEXT_FLAGS.contains(&name.as_str()) {
                signals.insert(name.clone(), SignalValue::Bool(*value));
            } else {
                debug!(flag = %name, event_id = %event.event_id, "Ignoring unknown context flag");
            }
        }

        signals.insert(PROFILE_SIGNAL.into(), SignalValue::Tags(profile.tags.clone()));
        if let Some(style) = &profile.learning_style {
            signals.insert(LEARNING_STYLE_SIGNAL.into(), SignalValue::Text(style.clone()));
        }

        Ok(Snapshot { signals })
    }
}

/// Range checks on telemetry fields, applied before a snapshot is built.
///
/// Only fields that are present and numeric are checked; absence and type
/// errors are the builder's concern.
pub fn validate_event(event: &TelemetryEvent) -> Result<(), EngineError> {
    const RANGES: [(&str, f64, f64); 4] = [
        (fields::TIME_ON_TASK, 0.0, f64::INFINITY),
        (fields::COMPLETION_RATE, 0.0, 100.0),
        (fields::IDLE_RATIO, 0.0, 1.0),
        (fields::MOOD_SCORE, -1.0, 1.0),
    ];
    for (field, min, max) in RANGES {
        let Some(value) = event.fields.get(field).and_then(|v| v.as_f64()) else {
            continue;
        };
        if !(min..=max).contains(&value) {
            return Err(EngineError::InvalidField {
                field: field.into(),
                value: value.to_string(),
                reason: if max.is_infinite() {
                    format!("must be >= {min}")
                } else {
                    format!("must be between {min} and {max}")
                },
            });
        }
    }
    Ok(())
}

fn missing(event: &TelemetryEvent, field: &str) -> EngineError {
    EngineError::MissingField {
        metric_type: event.metric_type.to_string(),
        field: field.into(),
    }
}

fn number_field(event: &TelemetryEvent, field: &str) -> Result<Option<f64>, EngineError> {
    match event.fields.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| EngineError::InvalidField {
            field: field.into(),
            value: v.to_string(),
            reason: "expected a number".into(),
        }),
    }
}

fn bool_field(event: &TelemetryEvent, field: &str) -> Result<Option<bool>, EngineError> {
    match event.fields.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| EngineError::InvalidField {
            field: field.into(),
            value: v.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvlp_core::profile::tags;
    use nvlp_core::{EngagementMetric, SensoryLog};
    use serde_json::json;

    fn engagement(pairs: serde_json::Value) -> TelemetryEvent {
        let fields = pairs
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        TelemetryEvent::with_fields("u1", MetricType::Engagement, fields)
    }

    #[test]
    fn attention_drop_from_idle_or_completion() {
        let builder = SnapshotBuilder::default();
        let profile = LearnerProfile::new();

        let s = builder
            .build(&engagement(json!({"idle_ratio": 0.6, "completion_rate": 20.0})), &profile)
            .unwrap();
        assert_eq!(s.bool(ATTENTION_DROP_DETECTED), Some(true));

        let s = builder
            .build(&engagement(json!({"idle_ratio": 0.6, "completion_rate": 80.0})), &profile)
            .unwrap();
        assert_eq!(s.bool(ATTENTION_DROP_DETECTED), Some(true));

        let s = builder
            .build(&engagement(json!({"idle_ratio": 0.1, "completion_rate": 80.0})), &profile)
            .unwrap();
        assert_eq!(s.bool(ATTENTION_DROP_DETECTED), Some(false));
    }

    #[test]
    fn thresholds_are_strict_inequalities() {
        let builder = SnapshotBuilder::default();
        let event = TelemetryEvent::engagement(
            "u1",
            EngagementMetric {
                time_on_task: 10.0,
                completion_rate: 30.0,
                idle_ratio: 0.5,
            },
        );
        let s = builder.build(&event, &LearnerProfile::new()).unwrap();
        assert_eq!(s.bool(ATTENTION_DROP_DETECTED), Some(false));
        assert_eq!(s.bool(LONG_CONTENT_DETECTED), Some(false));
    }

    #[test]
    fn long_content_only_from_time_on_task() {
        let s = SnapshotBuilder::default()
            .build(&engagement(json!({"time_on_task": 15.0})), &LearnerProfile::new())
            .unwrap();
        assert_eq!(s.bool(LONG_CONTENT_DETECTED), Some(true));
        assert_eq!(s.number(fields::TIME_ON_TASK), Some(15.0));
        // No inputs for attention → signal absent, not false.
        assert!(s.get(ATTENTION_DROP_DETECTED).is_none());
    }

    #[test]
    fn custom_thresholds_change_derived_signals() {
        let builder = SnapshotBuilder::new(SignalThresholds {
            long_content_minutes: 20.0,
            ..SignalThresholds::default()
        });
        let s = builder
            .build(&engagement(json!({"time_on_task": 15.0})), &LearnerProfile::new())
            .unwrap();
        assert_eq!(s.bool(LONG_CONTENT_DETECTED), Some(false));
    }

    #[test]
    fn sensory_overload_maps_to_detected() {
        let event = TelemetryEvent::sensory(
            "u1",
            SensoryLog {
                mood_score: -0.2,
                sensory_overload_flag: true,
            },
        );
        let s = SnapshotBuilder::default()
            .build(&event, &LearnerProfile::new())
            .unwrap();
        assert_eq!(s.bool(SENSORY_OVERLOAD_DETECTED), Some(true));
        assert_eq!(s.bool(fields::SENSORY_OVERLOAD_FLAG), Some(true));
        assert_eq!(s.number(fields::MOOD_SCORE), Some(-0.2));
    }

    #[test]
    fn profile_and_learning_style_included() {
        let profile = LearnerProfile::with_tags([tags::AUTISTIC]).with_learning_style("visual");
        let event = TelemetryEvent::sensory("u1", SensoryLog::default());
        let s = SnapshotBuilder::default().build(&event, &profile).unwrap();
        assert!(matches!(s.get(PROFILE_SIGNAL), Some(SignalValue::Tags(t)) if t.contains(tags::AUTISTIC)));
        assert_eq!(s.get(LEARNING_STYLE_SIGNAL), Some(&SignalValue::Text("visual".into())));
    }

    #[test]
    fn only_known_context_flags_copied() {
        let event = TelemetryEvent::sensory("u1", SensoryLog::default())
            .with_flag("reading_load_high", true)
            .with_flag("attention_drop_detected", true)
            .with_flag("made_up", true);
        let s = SnapshotBuilder::default()
            .build(&event, &LearnerProfile::new())
            .unwrap();
        assert_eq!(s.bool("reading_load_high"), Some(true));
        assert!(s.get("attention_drop_detected").is_none());
        assert!(s.get("made_up").is_none());
    }

    #[test]
    fn unknown_metric_type_is_missing_field() {
        let event = TelemetryEvent::with_fields(
            "u1",
            MetricType::Other("gaze".into()),
            BTreeMap::new(),
        );
        let err = SnapshotBuilder::default()
            .build(&event, &LearnerProfile::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField { ref metric_type, .. } if metric_type == "gaze"));
    }

    #[test]
    fn event_without_any_field_is_missing_field() {
        let err = SnapshotBuilder::default()
            .build(&engagement(json!({})), &LearnerProfile::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingField { .. }));
    }

    #[test]
    fn wrong_field_type_is_invalid_field() {
        let err = SnapshotBuilder::default()
            .build(&engagement(json!({"idle_ratio": "high"})), &LearnerProfile::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidField { ref field, .. } if field == "idle_ratio"));
    }

    #[test]
    fn range_validation() {
        assert!(validate_event(&engagement(json!({"idle_ratio": 0.4}))).is_ok());
        assert!(validate_event(&engagement(json!({"idle_ratio": 1.4}))).is_err());
        assert!(validate_event(&engagement(json!({"completion_rate": 101.0}))).is_err());
        assert!(validate_event(&engagement(json!({"time_on_task": -1.0}))).is_err());
        assert!(validate_event(&engagement(json!({"time_on_task": 500.0}))).is_ok());

        let mut event = TelemetryEvent::sensory("u1", SensoryLog::default());
        event.fields.insert("mood_score".into(), json!(-1.5));
        assert!(validate_event(&event).is_err());
    }

    #[test]
    fn schema_covers_builder_output() {
        let schema = SignalSchema::standard();
        let event = TelemetryEvent::engagement("u1", EngagementMetric::default())
            .with_flag("ambiguity_flag", false);
        let profile = LearnerProfile::new().with_learning_style("auditory");
        let s = SnapshotBuilder::default().build(&event, &profile).unwrap();
        for (name, value) in s.iter() {
            assert_eq!(schema.kind(name), Some(value.kind()), "{name}");
        }
    }
}
