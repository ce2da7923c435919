//! Built-in neuro rule set.
//!
//! Seven profile- and signal-driven adaptations, in priority order. Used to
//! seed an empty catalog and by `nvlp rules seed`.

use nvlp_core::ModifierValue;

use crate::EngineResult;
use crate::model::{Rule, RuleSet};

/// The built-in rules, highest priority first.
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "AI_SENSORY_REDUCE",
            "learner_profile.contains('autistic_profile') || sensory_overload_detected == true",
            "reduce_sensory_input",
        )
        .with_modifier("visual_contrast", "neutral")
        .with_modifier("audio_volume", "low")
        .with_modifier("animations", "off"),
        Rule::new(
            "AI_STRUCTURE_INCREASE",
            "learner_profile.contains('autistic_profile') || learner_requests_structure == true",
            "apply_structured_format",
        )
        .with_modifier("sequence_format", "step_by_step")
        .with_modifier("use_numbered_lists", true),
        Rule::new(
            "AI_LITERAL_MODE",
            "learner_profile.contains('autistic_profile') || ambiguity_flag == true",
            "convert_language_literal",
        )
        .with_modifier("figurative_language", "remove")
        .with_modifier("replace_with", "literal_equivalent"),
        Rule::new(
            "AI_CONTENT_CHUNK",
            "learner_profile.contains('adhd_profile') || long_content_detected == true",
            "chunk_content",
        )
        .with_modifier("chunk_length_seconds", 90i64)
        .with_modifier("max_chunk_length_words", 120i64),
        Rule::new(
            "AI_MICRO_GOALS",
            "attention_drop_detected == true || learner_profile.contains('adhd_profile')",
            "create_micro_goals",
        )
        .with_modifier("goal_unit", "small")
        .with_modifier("reward_on_completion", true),
        Rule::new(
            "AI_TTS_ON",
            "reading_load_high == true || learner_profile.contains('dyslexic_profile')",
            "enable_text_to_speech",
        )
        .with_modifier("voice", "calm")
        .with_modifier("speed", "slow"),
        Rule::new(
            "AI_CRA_SEQUENCE",
            "math_abstraction_difficulty == true || learner_profile.contains('dyscalculia_profile')",
            "apply_CRA_sequence",
        )
        .with_modifier(
            "sequence",
            ModifierValue::List(vec![
                "concrete".into(),
                "representational".into(),
                "abstract".into(),
            ]),
        ),
    ]
}

pub fn builtin_rule_set() -> RuleSet {
    RuleSet {
        rules: builtin_rules()
            .into_iter()
            .map(|r| (r.name.clone(), r.to_definition()))
            .collect(),
    }
}

/// The built-in rules as a rule-definition JSON document.
pub fn builtin_rules_json() -> EngineResult<String> {
    builtin_rule_set().to_json_pretty()
}
