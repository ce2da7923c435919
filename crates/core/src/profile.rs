//! Learner profile — the static facts an external profile store supplies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Well-known profile tags referenced by the built-in rule set.
pub mod tags {
    pub const AUTISTIC: &str = "autistic_profile";
    pub const ADHD: &str = "adhd_profile";
    pub const DYSLEXIC: &str = "dyslexic_profile";
    pub const DYSCALCULIA: &str = "dyscalculia_profile";
}

/// Static learner attributes that accompany every telemetry event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerProfile {
    /// Profile tags. Membership tests are case-sensitive.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Preferred learning style, if the learner recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_style: Option<String>,
}

impl LearnerProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a profile from a list of tags.
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            learning_style: None,
        }
    }

    pub fn with_learning_style(mut self, style: impl Into<String>) -> Self {
        self.learning_style = Some(style.into());
        self
    }

    /// Case-sensitive tag membership.
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_case_sensitive() {
        let profile = LearnerProfile::with_tags([tags::ADHD]);
        assert!(profile.contains("adhd_profile"));
        assert!(!profile.contains("ADHD_PROFILE"));
    }

    #[test]
    fn deserializes_bare_tags() {
        let profile: LearnerProfile =
            serde_json::from_str(r#"{"tags": ["dyslexic_profile"]}"#).unwrap();
        assert!(profile.contains(tags::DYSLEXIC));
        assert!(profile.learning_style.is_none());
    }
}
