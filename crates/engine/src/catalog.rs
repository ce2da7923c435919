//! Rule catalog — the ordered, named rule collection the engine reads.
//!
//! A [`Catalog`] is a plain value: order is priority, names are unique.
//! [`RuleCatalog`] wraps one in an [`ArcSwap`] so evaluators take a cheap
//! snapshot and never wait on an administrative writer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use chrono::Utc;
use nvlp_core::{EngineEvent, EventBus};
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{Rule, RuleSet};
use crate::{EngineError, EngineResult};

/// Whether an upsert added a new rule or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Counts from a bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub created: usize,
    pub updated: usize,
    /// Rules stored with a trigger that failed to compile.
    pub invalid: usize,
}

/// An ordered set of uniquely named rules.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rules: Vec<Arc<Rule>>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog in the given order. A repeated name replaces the
    /// earlier rule in the earlier position.
    pub fn load(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut catalog = Self::new();
        for rule in rules {
            warn_if_invalid(&rule);
            match catalog.index.get(&rule.name) {
                Some(&i) => catalog.rules[i] = Arc::new(rule),
                None => catalog.push(rule),
            }
        }
        catalog.log_loaded();
        catalog
    }

    /// Like [`Catalog::load`], but a repeated name is an error.
    pub fn load_strict(rules: impl IntoIterator<Item = Rule>) -> EngineResult<Self> {
        let mut catalog = Self::new();
        for rule in rules {
            if catalog.index.contains_key(&rule.name) {
                return Err(EngineError::DuplicateName(rule.name));
            }
            warn_if_invalid(&rule);
            catalog.push(rule);
        }
        catalog.log_loaded();
        Ok(catalog)
    }

    pub fn from_rule_set(set: RuleSet, strict: bool) -> EngineResult<Self> {
        let rules = set.into_rules();
        if strict {
            Self::load_strict(rules)
        } else {
            Ok(Self::load(rules))
        }
    }

    /// Load a rule-definition JSON document. Document order is priority.
    pub fn load_definitions_json(text: &str, strict: bool) -> EngineResult<Self> {
        Self::from_rule_set(RuleSet::from_json(text)?, strict)
    }

    pub fn to_rule_set(&self) -> RuleSet {
        RuleSet {
            rules: self
                .rules
                .iter()
                .map(|r| (r.name.clone(), r.to_definition()))
                .collect(),
        }
    }

    pub fn to_definitions_json(&self) -> EngineResult<String> {
        self.to_rule_set().to_json_pretty()
    }

    /// Active rules with a valid trigger, in priority order.
    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(Arc::as_ref).filter(|r| r.is_evaluable())
    }

    pub fn get(&self, name: &str) -> EngineResult<&Rule> {
        self.index
            .get(name)
            .map(|&i| self.rules[i].as_ref())
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    /// Replace a rule in place, or append a new one. An existing rule's
    /// `created_at` is kept.
    pub fn upsert(&mut self, mut rule: Rule) -> UpsertOutcome {
        warn_if_invalid(&rule);
        match self.index.get(&rule.name) {
            Some(&i) => {
                rule.created_at = self.rules[i].created_at;
                rule.updated_at = Utc::now();
                self.rules[i] = Arc::new(rule);
                UpsertOutcome::Updated
            }
            None => {
                self.push(rule);
                UpsertOutcome::Created
            }
        }
    }

    pub fn upsert_all(&mut self, rules: impl IntoIterator<Item = Rule>) -> LoadReport {
        let mut report = LoadReport::default();
        for rule in rules {
            if rule.parse_error().is_some() {
                report.invalid += 1;
            }
            match self.upsert(rule) {
                UpsertOutcome::Created => report.created += 1,
                UpsertOutcome::Updated => report.updated += 1,
            }
        }
        report
    }

    pub fn deactivate(&mut self, name: &str) -> EngineResult<()> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let mut rule = self.rules[i].as_ref().clone();
        rule.is_active = false;
        rule.updated_at = Utc::now();
        self.rules[i] = Arc::new(rule);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> EngineResult<Arc<Rule>> {
        let i = self
            .index
            .remove(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let removed = self.rules.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule, active or not, in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(Arc::as_ref)
    }

    pub fn active_count(&self) -> usize {
        self.active_rules().count()
    }

    /// Rules whose trigger failed to compile, with the reason.
    pub fn invalid_rules(&self) -> impl Iterator<Item = (&Rule, &str)> {
        self.iter()
            .filter_map(|r| r.parse_error().map(|err| (r, err)))
    }

    fn push(&mut self, rule: Rule) {
        self.index.insert(rule.name.clone(), self.rules.len());
        self.rules.push(Arc::new(rule));
    }

    fn log_loaded(&self) {
        info!(
            total = self.len(),
            active = self.active_count(),
            invalid = self.invalid_rules().count(),
            "Rule catalog loaded"
        );
    }
}

fn warn_if_invalid(rule: &Rule) {
    if let Some(err) = rule.parse_error() {
        warn!(rule = %rule.name, error = %err, "Rule trigger failed to compile; rule disabled");
    }
}

/// Shared, concurrently readable catalog handle.
///
/// Readers call [`RuleCatalog::snapshot`] and keep the `Arc` for as long as
/// they need a consistent view. Writers clone the current catalog, change
/// the clone, and swap it in; they are serialized by an internal lock.
pub struct RuleCatalog {
    current: ArcSwap<Catalog>,
    write_lock: Mutex<()>,
    events: Option<Arc<EventBus>>,
}

impl RuleCatalog {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: ArcSwap::from_pointee(catalog),
            write_lock: Mutex::new(()),
            events: None,
        }
    }

    /// Publish `CatalogUpdated` on `events` after every write.
    pub fn with_events(catalog: Catalog, events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(catalog)
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.load_full()
    }

    pub fn replace(&self, catalog: Catalog) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store(catalog);
    }

    /// Apply a fallible change. Nothing is stored when `f` fails.
    pub fn try_update<T>(
        &self,
        f: impl FnOnce(&mut Catalog) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Catalog::clone(&self.current.load());
        let out = f(&mut next)?;
        self.store(next);
        Ok(out)
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut Catalog) -> T) -> T {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Catalog::clone(&self.current.load());
        let out = f(&mut next);
        self.store(next);
        out
    }

    pub fn upsert(&self, rule: Rule) -> UpsertOutcome {
        self.update(|c| c.upsert(rule))
    }

    pub fn upsert_all(&self, rules: impl IntoIterator<Item = Rule>) -> LoadReport {
        self.update(|c| c.upsert_all(rules))
    }

    pub fn deactivate(&self, name: &str) -> EngineResult<()> {
        self.try_update(|c| c.deactivate(name))
    }

    pub fn remove(&self, name: &str) -> EngineResult<Arc<Rule>> {
        self.try_update(|c| c.remove(name))
    }

    fn store(&self, catalog: Catalog) {
        let (total_rules, active_rules) = (catalog.len(), catalog.active_count());
        self.current.store(Arc::new(catalog));
        info!(total = total_rules, active = active_rules, "Rule catalog updated");
        if let Some(events) = &self.events {
            events.publish(EngineEvent::CatalogUpdated {
                total_rules,
                active_rules,
                timestamp: Utc::now(),
            });
        }
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::new(Catalog::new())
    }
}
