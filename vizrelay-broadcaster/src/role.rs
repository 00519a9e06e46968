//! Connection role classification
//!
//! A connection is the source when its `User-Agent` contains one of the
//! configured bot markers. Everything else, including a missing header, is a
//! viewer. The decision is taken once at accept time.

use serde::{Deserialize, Serialize};

/// Markers recognized when none are configured
pub const DEFAULT_BOT_MARKERS: &[&str] = &["MusicBot", "Discord-Bot"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Viewer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

/// Case-sensitive substring matcher over the identity hint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleClassifier {
    markers: Vec<String>,
}

impl RoleClassifier {
    /// Empty markers are discarded so they cannot match every hint
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, hint: Option<&str>) -> Role {
        match hint {
            Some(hint) if self.markers.iter().any(|m| hint.contains(m.as_str())) => Role::Source,
            _ => Role::Viewer,
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

impl Default for RoleClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_MARKERS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_user_agents_are_sources() {
        let classifier = RoleClassifier::default();
        assert_eq!(classifier.classify(Some("MusicBot/1.0")), Role::Source);
        assert_eq!(classifier.classify(Some("node Discord-Bot (v14)")), Role::Source);
    }

    #[test]
    fn test_everything_else_is_a_viewer() {
        let classifier = RoleClassifier::default();
        assert_eq!(
            classifier.classify(Some("Mozilla/5.0 (X11; Linux x86_64)")),
            Role::Viewer
        );
        assert_eq!(classifier.classify(Some("")), Role::Viewer);
        assert_eq!(classifier.classify(None), Role::Viewer);
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let classifier = RoleClassifier::default();
        assert_eq!(classifier.classify(Some("musicbot/1.0")), Role::Viewer);
    }

    #[test]
    fn test_custom_markers() {
        let classifier = RoleClassifier::new(["SpectrumFeeder"]);
        assert_eq!(classifier.classify(Some("SpectrumFeeder/2")), Role::Source);
        assert_eq!(classifier.classify(Some("MusicBot/1.0")), Role::Viewer);
    }

    #[test]
    fn test_empty_marker_never_matches() {
        let classifier = RoleClassifier::new(["", "MusicBot"]);
        assert_eq!(classifier.markers(), &["MusicBot".to_string()]);
        assert_eq!(classifier.classify(Some("curl/8.0")), Role::Viewer);
    }
}
