//! Triggered actions — the engine's output unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single rule modifier value.
///
/// Modifiers describe *how* an adaptation is applied (e.g.
/// `audio_volume = "low"`, `chunk_length_seconds = 90`). Objects and `null`
/// are not valid modifier values and fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModifierValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ModifierValue>),
}

/// Modifier name → value, ordered by name.
pub type Modifiers = BTreeMap<String, ModifierValue>;

impl std::fmt::Display for ModifierValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModifierValue::Bool(b) => write!(f, "{b}"),
            ModifierValue::Int(n) => write!(f, "{n}"),
            ModifierValue::Float(x) => write!(f, "{x}"),
            ModifierValue::Text(s) => write!(f, "{s:?}"),
            ModifierValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for ModifierValue {
    fn from(s: &str) -> Self {
        ModifierValue::Text(s.to_string())
    }
}

impl From<bool> for ModifierValue {
    fn from(b: bool) -> Self {
        ModifierValue::Bool(b)
    }
}

impl From<i64> for ModifierValue {
    fn from(n: i64) -> Self {
        ModifierValue::Int(n)
    }
}

/// The output of one matched rule for one learner.
///
/// Holds a weak reference to its rule (by name): deleting or deactivating
/// the rule later does not invalidate an action already dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredAction {
    pub rule_name: String,
    pub action: String,
    #[serde(default)]
    pub modifiers: Modifiers,
    pub matched_at: DateTime<Utc>,
    pub user_id: String,
}

/// Everything one evaluation cycle produced for a learner, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchBatch {
    pub user_id: String,
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actions: Vec<TriggeredAction>,
}

impl DispatchBatch {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifier_values_decode_by_shape() {
        let json = r#"{
            "animations": "off",
            "use_numbered_lists": true,
            "chunk_length_seconds": 90,
            "ratio": 0.5,
            "sequence": ["concrete", "representational", "abstract"]
        }"#;
        let mods: Modifiers = serde_json::from_str(json).unwrap();
        assert_eq!(mods["animations"], ModifierValue::Text("off".into()));
        assert_eq!(mods["use_numbered_lists"], ModifierValue::Bool(true));
        assert_eq!(mods["chunk_length_seconds"], ModifierValue::Int(90));
        assert_eq!(mods["ratio"], ModifierValue::Float(0.5));
        assert!(matches!(&mods["sequence"], ModifierValue::List(items) if items.len() == 3));
    }

    #[test]
    fn integer_modifiers_serialize_without_fraction() {
        let json = serde_json::to_string(&ModifierValue::Int(120)).unwrap();
        assert_eq!(json, "120");
    }

    #[test]
    fn object_and_null_modifiers_rejected() {
        assert!(serde_json::from_str::<ModifierValue>(r#"{"a": 1}"#).is_err());
        assert!(serde_json::from_str::<ModifierValue>("null").is_err());
    }

    #[test]
    fn triggered_action_json_shape() {
        let action = TriggeredAction {
            rule_name: "AI_TTS_ON".into(),
            action: "enable_text_to_speech".into(),
            modifiers: Modifiers::from([("voice".to_string(), "calm".into())]),
            matched_at: Utc::now(),
            user_id: "u1".into(),
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["rule_name"], "AI_TTS_ON");
        assert_eq!(value["modifiers"]["voice"], "calm");
        assert!(value.get("matched_at").is_some());
    }

    #[test]
    fn list_display() {
        let v = ModifierValue::List(vec!["a".into(), 2i64.into(), true.into()]);
        assert_eq!(v.to_string(), r#"["a", 2, true]"#);
    }
}
