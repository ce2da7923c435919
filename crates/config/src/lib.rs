//! Configuration loading, validation, and management for NVLP.
//!
//! Loads configuration from `~/.nvlp/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.nvlp/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Thresholds for derived signals
    #[serde(default)]
    pub signals: SignalsConfig,

    /// Selection policy (conflicts, cardinality)
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Dispatch queue and sink settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Where rules come from
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Thresholds behind the derived snapshot signals.
///
/// - `attention_drop_detected := idle_ratio > idle_ratio_threshold
///   OR completion_rate < completion_rate_threshold`
/// - `long_content_detected := time_on_task > long_content_minutes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    #[serde(default = "default_idle_ratio_threshold")]
    pub idle_ratio_threshold: f64,

    #[serde(default = "default_completion_rate_threshold")]
    pub completion_rate_threshold: f64,

    #[serde(default = "default_long_content_minutes")]
    pub long_content_minutes: f64,
}

fn default_idle_ratio_threshold() -> f64 {
    0.5
}
fn default_completion_rate_threshold() -> f64 {
    30.0
}
fn default_long_content_minutes() -> f64 {
    10.0
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            idle_ratio_threshold: default_idle_ratio_threshold(),
            completion_rate_threshold: default_completion_rate_threshold(),
            long_content_minutes: default_long_content_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Maximum simultaneous actions per evaluation (absent = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actions: Option<usize>,

    /// Pairs of mutually exclusive action names
    #[serde(default = "default_conflicts")]
    pub conflicts: Vec<[String; 2]>,
}

fn default_conflicts() -> Vec<[String; 2]> {
    vec![
        ["increase_stimulation".into(), "reduce_sensory_input".into()],
        ["increase_stimulation".into(), "reduce_stimulation".into()],
    ]
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_actions: None,
            conflicts: default_conflicts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Which sink receives triggered actions: "log" or "memory"
    #[serde(default = "default_sink")]
    pub sink: String,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-batch sink timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sink() -> String {
    "log".into()
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_timeout_ms() -> u64 {
    2_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            queue_capacity: default_queue_capacity(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON rule-definition file to load at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<PathBuf>,

    /// Reject duplicate rule names instead of letting the later one win
    #[serde(default)]
    pub strict: bool,

    /// Load the built-in neuro rule set before `rules_file`
    #[serde(default = "default_true")]
    pub seed_builtin: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            strict: false,
            seed_builtin: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.nvlp/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `NVLP_IDLE_RATIO_THRESHOLD`
    /// - `NVLP_COMPLETION_RATE_THRESHOLD`
    /// - `NVLP_LONG_CONTENT_MINUTES`
    /// - `NVLP_MAX_ACTIONS`
    /// - `NVLP_RULES_FILE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("NVLP_IDLE_RATIO_THRESHOLD") {
            self.signals.idle_ratio_threshold = parse_override("NVLP_IDLE_RATIO_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("NVLP_COMPLETION_RATE_THRESHOLD") {
            self.signals.completion_rate_threshold =
                parse_override("NVLP_COMPLETION_RATE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("NVLP_LONG_CONTENT_MINUTES") {
            self.signals.long_content_minutes = parse_override("NVLP_LONG_CONTENT_MINUTES", &v)?;
        }
        if let Some(v) = lookup("NVLP_MAX_ACTIONS") {
            self.selection.max_actions = Some(parse_override("NVLP_MAX_ACTIONS", &v)?);
        }
        if let Some(v) = lookup("NVLP_RULES_FILE") {
            self.catalog.rules_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".nvlp")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.signals;
        if !(0.0..=1.0).contains(&s.idle_ratio_threshold) {
            return Err(ConfigError::ValidationError(
                "signals.idle_ratio_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&s.completion_rate_threshold) {
            return Err(ConfigError::ValidationError(
                "signals.completion_rate_threshold must be between 0.0 and 100.0".into(),
            ));
        }
        if !s.long_content_minutes.is_finite() || s.long_content_minutes < 0.0 {
            return Err(ConfigError::ValidationError(
                "signals.long_content_minutes must be a non-negative number".into(),
            ));
        }
        if self.selection.max_actions == Some(0) {
            return Err(ConfigError::ValidationError(
                "selection.max_actions must be at least 1 (omit it for no limit)".into(),
            ));
        }
        if let Some([a, _]) = self.selection.conflicts.iter().find(|[a, b]| a == b) {
            return Err(ConfigError::ValidationError(format!(
                "selection.conflicts: action '{a}' cannot conflict with itself"
            )));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.queue_capacity must be > 0".into(),
            ));
        }
        if self.dispatch.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.timeout_ms must be > 0".into(),
            ));
        }
        if !matches!(self.dispatch.sink.as_str(), "log" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.sink must be \"log\" or \"memory\", got \"{}\"",
                self.dispatch.sink
            )));
        }
        Ok(())
    }

    /// Generate a default config TOML string (for `config default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key}: invalid value \"{value}\"")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
