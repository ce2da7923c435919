//! Subcommand implementations and the config → engine wiring they share.

pub mod config_cmd;
pub mod evaluate;
pub mod rules;

use std::path::Path;
use std::time::Duration;

use nvlp_config::{AppConfig, ConfigError};
use nvlp_engine::{
    Catalog, ConflictTable, DispatchOptions, EngineResult, SelectionPolicy, SignalThresholds,
    builtin_rules,
};

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
}

/// Built-in rules (if enabled) overlaid with the configured rule file.
///
/// A rule in the file replaces the built-in rule of the same name in place;
/// new rules are appended in file order.
pub fn build_catalog(config: &AppConfig) -> EngineResult<Catalog> {
    let mut catalog = if config.catalog.seed_builtin {
        Catalog::load(builtin_rules())
    } else {
        Catalog::new()
    };
    if let Some(path) = &config.catalog.rules_file {
        let text = std::fs::read_to_string(path)?;
        let from_file = Catalog::load_definitions_json(&text, config.catalog.strict)?;
        catalog.upsert_all(from_file.iter().cloned());
    }
    Ok(catalog)
}

pub fn thresholds(config: &AppConfig) -> SignalThresholds {
    SignalThresholds {
        idle_ratio_threshold: config.signals.idle_ratio_threshold,
        completion_rate_threshold: config.signals.completion_rate_threshold,
        long_content_minutes: config.signals.long_content_minutes,
    }
}

pub fn selection_policy(config: &AppConfig) -> SelectionPolicy {
    let conflicts = ConflictTable::from_pairs(
        config
            .selection
            .conflicts
            .iter()
            .map(|[a, b]| (a.as_str(), b.as_str())),
    );
    SelectionPolicy::new(conflicts, config.selection.max_actions)
}

pub fn dispatch_options(config: &AppConfig) -> DispatchOptions {
    DispatchOptions {
        queue_capacity: config.dispatch.queue_capacity,
        timeout: Duration::from_millis(config.dispatch.timeout_ms),
    }
}
