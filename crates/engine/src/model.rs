//! Rule data model — named trigger/action pairs and their JSON form.

use std::fmt;

use chrono::{DateTime, Utc};
use nvlp_core::{ModifierValue, Modifiers};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::parser::{TriggerExpr, parse_trigger};
use crate::snapshot::{SignalSchema, Snapshot};
use crate::{EngineError, EngineResult};

/// A single adaptation rule.
///
/// The trigger text is parsed once, on construction. A rule whose trigger
/// does not parse, or references a signal the snapshot schema does not
/// know, keeps the error and never matches.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique name within a catalog.
    pub name: String,

    /// Adaptation to apply when the trigger holds (e.g. `chunk_content`).
    pub action: String,

    /// Parameters passed along with the action.
    pub modifiers: Modifiers,

    /// Inactive rules are never evaluated.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    condition: String,
    trigger: Result<TriggerExpr, String>,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        condition: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        let condition = condition.into();
        let trigger = compile(&condition);
        let now = Utc::now();
        Self {
            name: name.into(),
            action: action.into(),
            modifiers: Modifiers::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
            condition,
            trigger,
        }
    }

    pub fn with_modifier(
        mut self,
        key: impl Into<String>,
        value: impl Into<ModifierValue>,
    ) -> Self {
        self.modifiers.insert(key.into(), value.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// The trigger source text as written.
    pub fn condition(&self) -> &str {
        &self.condition
    }

    /// The parsed trigger, if it compiled.
    pub fn trigger(&self) -> Option<&TriggerExpr> {
        self.trigger.as_ref().ok()
    }

    /// Why the trigger failed to compile, if it did.
    pub fn parse_error(&self) -> Option<&str> {
        self.trigger.as_ref().err().map(String::as_str)
    }

    /// Active with a valid trigger.
    pub fn is_evaluable(&self) -> bool {
        self.is_active && self.trigger.is_ok()
    }

    /// Evaluate the trigger. Always `false` for a rule that is not evaluable.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        match &self.trigger {
            Ok(expr) if self.is_active => expr.evaluate(snapshot),
            _ => false,
        }
    }

    /// Check the rule is well-formed, surfacing any trigger error.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidRule {
                name: "(empty)".into(),
                reason: "rule name cannot be empty".into(),
            });
        }
        if self.action.trim().is_empty() {
            return Err(EngineError::InvalidRule {
                name: self.name.clone(),
                reason: "action cannot be empty".into(),
            });
        }
        if let Err(detail) = &self.trigger {
            return Err(EngineError::ConditionParse {
                name: self.name.clone(),
                detail: detail.clone(),
            });
        }
        Ok(())
    }

    pub fn from_definition(name: impl Into<String>, def: RuleDefinition) -> Self {
        let mut rule = Rule::new(name, def.trigger, def.action);
        rule.modifiers = def.modifiers;
        rule.is_active = def.is_active;
        rule
    }

    pub fn to_definition(&self) -> RuleDefinition {
        RuleDefinition {
            trigger: self.condition.clone(),
            action: self.action.clone(),
            modifiers: self.modifiers.clone(),
            is_active: self.is_active,
        }
    }
}

fn compile(condition: &str) -> Result<TriggerExpr, String> {
    let expr = parse_trigger(condition)?;
    expr.validate(SignalSchema::standard())?;
    Ok(expr)
}

/// The JSON body of one rule in a rule-definition document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub trigger: String,
    pub action: String,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

fn is_true(b: &bool) -> bool {
    *b
}

/// An ordered rule-definition document: a JSON object keyed by rule name.
///
/// Document order is kept, and so are repeated names; the catalog decides
/// what a duplicate means.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub rules: Vec<(String, RuleDefinition)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, def: RuleDefinition) {
        self.rules.push((name.into(), def));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Parse a rule-definition document.
    pub fn from_json(text: &str) -> EngineResult<Self> {
        let set: RuleSet = serde_json::from_str(text)?;
        for (name, def) in &set.rules {
            if name.trim().is_empty() {
                return Err(EngineError::InvalidRule {
                    name: "(empty)".into(),
                    reason: "rule name cannot be empty".into(),
                });
            }
            if def.action.trim().is_empty() {
                return Err(EngineError::InvalidRule {
                    name: name.clone(),
                    reason: "action cannot be empty".into(),
                });
            }
        }
        Ok(set)
    }

    pub fn to_json_pretty(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compile every definition, in document order.
    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
            .into_iter()
            .map(|(name, def)| Rule::from_definition(name, def))
            .collect()
    }
}

impl Serialize for RuleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rules.len()))?;
        for (name, def) in &self.rules {
            map.serialize_entry(name, def)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuleSetVisitor;

        impl<'de> Visitor<'de> for RuleSetVisitor {
            type Value = RuleSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping rule names to definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RuleSet, A::Error> {
                let mut rules = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, def)) = access.next_entry::<String, RuleDefinition>()? {
                    rules.push((name, def));
                }
                Ok(RuleSet { rules })
            }
        }

        deserializer.deserialize_map(RuleSetVisitor)
    }
}
