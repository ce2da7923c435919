//! `nvlp evaluate` — run a single telemetry event through the engine.

use std::path::Path;
use std::sync::Arc;

use nvlp_core::{DispatchSink, LearnerProfile, TelemetryEvent};
use nvlp_engine::{AdaptiveEngine, Evaluation, LogSink, MemorySink};
use tracing::debug;

use super::{build_catalog, dispatch_options, load_config, selection_policy, thresholds};

pub async fn run(
    config_path: Option<&Path>,
    event: &str,
    profile: Vec<String>,
    learning_style: Option<String>,
    raw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let event = parse_event(event)?;
    let mut profile = LearnerProfile::with_tags(profile.into_iter().filter(|t| !t.is_empty()));
    profile.learning_style = learning_style;

    let sink: Arc<dyn DispatchSink> = match config.dispatch.sink.as_str() {
        "memory" => Arc::new(MemorySink::default()),
        _ => Arc::new(LogSink),
    };
    let engine = AdaptiveEngine::builder(build_catalog(&config)?)
        .thresholds(thresholds(&config))
        .policy(selection_policy(&config))
        .sink(sink, dispatch_options(&config))
        .build();

    // A bad event is an error here, not a skipped-event log line.
    let evaluation = engine.evaluate(&event, &profile)?;
    debug!(matched = ?evaluation.matched, "Event evaluated");
    engine.deliver(&evaluation);
    engine.shutdown().await;

    if raw {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        print_evaluation(&evaluation);
    }
    Ok(())
}

fn parse_event(arg: &str) -> Result<TelemetryEvent, Box<dyn std::error::Error>> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read event file {path}: {e}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| format!("Invalid telemetry event: {e}").into())
}

fn print_evaluation(evaluation: &Evaluation) {
    println!(
        "Event {} for {} ({} matched)",
        evaluation.event_id,
        evaluation.user_id,
        evaluation.matched.len()
    );
    if evaluation.is_empty() {
        println!("  No adaptations triggered.");
    }
    for action in evaluation.actions() {
        println!("  ✓ {} → {}", action.rule_name, action.action);
        for (key, value) in &action.modifiers {
            println!("      {key} = {value}");
        }
    }
    for suppressed in &evaluation.selection.suppressed {
        println!(
            "  ✗ {} → {} (suppressed: {})",
            suppressed.rule_name, suppressed.action, suppressed.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvlp_core::MetricType;

    #[test]
    fn parse_inline_event() {
        let event = parse_event(
            r#"{"user_id": "u1", "metric_type": "engagement", "fields": {"idle_ratio": 0.7}}"#,
        )
        .unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.metric_type, MetricType::Engagement);
    }

    #[test]
    fn parse_event_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(
            &path,
            r#"{"user_id": "u2", "metric_type": "sensory", "fields": {"sensory_overload_flag": true}, "flags": {"ambiguity_flag": true}}"#,
        )
        .unwrap();
        let event = parse_event(&format!("@{}", path.display())).unwrap();
        assert_eq!(event.metric_type, MetricType::Sensory);
        assert_eq!(event.flags.get("ambiguity_flag"), Some(&true));
    }

    #[tokio::test]
    async fn out_of_range_event_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "[dispatch]\nsink = \"memory\"\n").unwrap();

        let event = r#"{"user_id": "u1", "metric_type": "engagement", "fields": {"idle_ratio": 2.0}}"#;
        let result = run(Some(&config), event, Vec::new(), None, true).await;
        assert!(result.unwrap_err().to_string().contains("idle_ratio"));

        let event = r#"{"user_id": "u1", "metric_type": "sensory", "fields": {"sensory_overload_flag": true}}"#;
        assert!(run(Some(&config), event, Vec::new(), None, true).await.is_ok());
    }

    #[test]
    fn parse_event_rejects_garbage() {
        assert!(parse_event("not json").is_err());
        assert!(parse_event("@/nonexistent/event.json").is_err());
    }
}
