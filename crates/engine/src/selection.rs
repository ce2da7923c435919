//! Selection policy — turns matched rules into the actions actually applied.
//!
//! Matched rules arrive in catalog order, which is priority order. A rule
//! is suppressed when its action conflicts with one already selected, or
//! when the per-event action cap has been reached. Conflicts are checked
//! first, so a conflicting rule is reported as a conflict even past the cap.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use nvlp_core::TriggeredAction;
use serde::Serialize;
use tracing::debug;

use crate::model::Rule;

/// Symmetric action-name exclusion table.
#[derive(Debug, Clone, Default)]
pub struct ConflictTable {
    pairs: HashMap<String, BTreeSet<String>>,
}

impl ConflictTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stimulation increases conflict with either kind of reduction.
    pub fn standard() -> Self {
        Self::from_pairs([
            ("increase_stimulation", "reduce_sensory_input"),
            ("increase_stimulation", "reduce_stimulation"),
        ])
    }

    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut table = Self::new();
        for (a, b) in pairs {
            table.add(a, b);
        }
        table
    }

    pub fn add(&mut self, a: impl Into<String>, b: impl Into<String>) {
        let (a, b) = (a.into(), b.into());
        self.pairs.entry(a.clone()).or_default().insert(b.clone());
        self.pairs.entry(b).or_default().insert(a);
    }

    pub fn conflicts(&self, a: &str, b: &str) -> bool {
        self.pairs.get(a).is_some_and(|set| set.contains(b))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Why a matched rule was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Its action conflicts with a higher-priority selected action.
    Conflict { kept_rule: String, kept_action: String },
    /// The per-event action cap was already reached.
    CapacityExceeded { limit: usize },
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressionReason::Conflict {
                kept_rule,
                kept_action,
            } => write!(f, "conflicts with '{kept_action}' from rule '{kept_rule}'"),
            SuppressionReason::CapacityExceeded { limit } => {
                write!(f, "action limit of {limit} reached")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuppressedRule {
    pub rule_name: String,
    pub action: String,
    pub reason: SuppressionReason,
}

/// The outcome of one selection pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Selection {
    /// Applied actions, highest priority first.
    pub actions: Vec<TriggeredAction>,
    pub suppressed: Vec<SuppressedRule>,
}

impl Selection {
    pub fn rule_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.rule_name.clone()).collect()
    }
}

/// Priority, mutual exclusion and cardinality for matched rules.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub conflicts: ConflictTable,
    /// `None` means no cap.
    pub max_actions: Option<usize>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            conflicts: ConflictTable::standard(),
            max_actions: None,
        }
    }
}

impl SelectionPolicy {
    pub fn new(conflicts: ConflictTable, max_actions: Option<usize>) -> Self {
        Self {
            conflicts,
            max_actions,
        }
    }

    /// Select from `matched`, which must be in priority order.
    ///
    /// Deterministic: the same input always yields the same selection.
    pub fn select<'a>(
        &self,
        matched: impl IntoIterator<Item = &'a Rule>,
        user_id: &str,
        matched_at: DateTime<Utc>,
    ) -> Selection {
        let mut selection = Selection::default();

        for rule in matched {
            let conflict = selection
                .actions
                .iter()
                .find(|kept| self.conflicts.conflicts(&kept.action, &rule.action));

            let reason = match conflict {
                Some(kept) => Some(SuppressionReason::Conflict {
                    kept_rule: kept.rule_name.clone(),
                    kept_action: kept.action.clone(),
                }),
                None => self
                    .max_actions
                    .filter(|&limit| selection.actions.len() >= limit)
                    .map(|limit| SuppressionReason::CapacityExceeded { limit }),
            };

            match reason {
                Some(reason) => {
                    debug!(rule = %rule.name, action = %rule.action, %reason, "Rule suppressed");
                    selection.suppressed.push(SuppressedRule {
                        rule_name: rule.name.clone(),
                        action: rule.action.clone(),
                        reason,
                    });
                }
                None => selection.actions.push(TriggeredAction {
                    rule_name: rule.name.clone(),
                    action: rule.action.clone(),
                    modifiers: rule.modifiers.clone(),
                    matched_at,
                    user_id: user_id.to_string(),
                }),
            }
        }

        selection
    }
}
