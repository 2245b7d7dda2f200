//! Loop prevention
//!
//! Everything the sync writes carries a control marker: issues get an origin
//! label, comments get a suffix, and GitHub titles of mirrored Jira issues
//! start with the Jira key. Inbound events carrying those markers are echoes
//! of our own writes and are dropped before any remote call.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// The two connected trackers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    GitHub,
    Jira,
}

impl System {
    pub fn opposite(self) -> Self {
        match self {
            System::GitHub => System::Jira,
            System::Jira => System::GitHub,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            System::GitHub => "github",
            System::Jira => "jira",
        }
    }
}

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control labels and comment suffixes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMarkers {
    #[serde(default = "default_label_from_github")]
    pub label_from_github: String,
    #[serde(default = "default_label_from_jira")]
    pub label_from_jira: String,
    #[serde(default = "default_comment_from_github")]
    pub comment_from_github: String,
    #[serde(default = "default_comment_from_jira")]
    pub comment_from_jira: String,
}

fn default_label_from_github() -> String {
    "source:github".to_string()
}

fn default_label_from_jira() -> String {
    "source:jira".to_string()
}

fn default_comment_from_github() -> String {
    "comment from github".to_string()
}

fn default_comment_from_jira() -> String {
    "comment from jira".to_string()
}

impl Default for ControlMarkers {
    fn default() -> Self {
        Self {
            label_from_github: default_label_from_github(),
            label_from_jira: default_label_from_jira(),
            comment_from_github: default_comment_from_github(),
            comment_from_jira: default_comment_from_jira(),
        }
    }
}

impl ControlMarkers {
    /// Label marking an artifact that originated in `system`
    pub fn origin_label(&self, system: System) -> &str {
        match system {
            System::GitHub => &self.label_from_github,
            System::Jira => &self.label_from_jira,
        }
    }

    /// Suffix marking a comment that originated in `system`
    pub fn comment_suffix(&self, system: System) -> &str {
        match system {
            System::GitHub => &self.comment_from_github,
            System::Jira => &self.comment_from_jira,
        }
    }

    pub fn is_control_label(&self, label: &str) -> bool {
        label == self.label_from_github || label == self.label_from_jira
    }

    /// An issue created in `source` that carries the other side's origin label
    /// was created by us.
    pub fn is_issue_echo<S: AsRef<str>>(&self, source: System, labels: &[S]) -> bool {
        let foreign = self.origin_label(source.opposite());
        labels.iter().any(|l| l.as_ref() == foreign)
    }

    /// Either suffix anywhere in the body marks a synced comment
    pub fn is_comment_echo(&self, body: &str) -> bool {
        body.contains(self.comment_from_github.as_str())
            || body.contains(self.comment_from_jira.as_str())
    }

    /// Body to post on the other tracker for a comment written in `source`
    pub fn tag_comment(&self, body: &str, source: System) -> String {
        format!("{}\n\n{}", body, self.comment_suffix(source))
    }

    /// Origin of an issue: an existing control label wins over the event source
    pub fn origin_of<S: AsRef<str>>(&self, labels: &[S], source: System) -> System {
        let has = |label: &str| labels.iter().any(|l| l.as_ref() == label);
        if has(&self.label_from_jira) {
            System::Jira
        } else if has(&self.label_from_github) {
            System::GitHub
        } else {
            source
        }
    }

    /// Strip control labels, add the origin label, drop exact duplicates
    ///
    /// Order of first appearance is kept so outbound payloads are stable.
    pub fn tag_labels<S: AsRef<str>>(&self, labels: &[S], origin: System) -> Vec<String> {
        let mut tagged: Vec<String> = Vec::with_capacity(labels.len() + 1);
        for label in labels.iter().map(AsRef::as_ref) {
            if self.is_control_label(label) || tagged.iter().any(|l| l == label) {
                continue;
            }
            tagged.push(label.to_string());
        }
        tagged.push(self.origin_label(origin).to_string());
        tagged
    }

    /// User-visible labels with control labels removed
    pub fn strip_control_labels<S: AsRef<str>>(&self, labels: &[S]) -> Vec<String> {
        let mut stripped: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels.iter().map(AsRef::as_ref) {
            if !self.is_control_label(label) && !stripped.iter().any(|l| l == label) {
                stripped.push(label.to_string());
            }
        }
        stripped
    }
}

fn native_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]+-[0-9]+)").expect("native key pattern is valid"))
}

/// Leading Jira key of a title, if any
pub fn extract_native_key(title: &str) -> Option<&str> {
    native_key_regex()
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// `"<KEY> - <title>"`
pub fn format_mirrored_title(key: &str, title: &str) -> String {
    format!("{} - {}", key, title)
}

/// Title with a leading key prefix removed
pub fn strip_native_key(title: &str) -> &str {
    match extract_native_key(title) {
        Some(key) => {
            let rest = &title[key.len()..];
            let rest = rest.trim_start();
            rest.strip_prefix('-').map(str::trim_start).unwrap_or(rest)
        }
        None => title,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_extraction() {
        assert_eq!(extract_native_key("PROJ-7 - Fix crash"), Some("PROJ-7"));
        assert_eq!(extract_native_key("AB-123 edited later"), Some("AB-123"));
        assert_eq!(extract_native_key("Fix crash"), None);
        assert_eq!(extract_native_key("proj-7 - lower"), None);
        assert_eq!(extract_native_key("Fix PROJ-7 later"), None);
        assert_eq!(extract_native_key("PROJ-7x - glued"), Some("PROJ-7"));
        assert_eq!(extract_native_key("PROJ-7_draft fix"), Some("PROJ-7"));
    }

    #[test]
    fn test_key_extraction_roundtrip() {
        for (key, title) in [("PROJ-7", "Fix crash"), ("A-1", ""), ("XYZ-99999", "PROJ-1 nested")] {
            let mirrored = format_mirrored_title(key, title);
            assert_eq!(extract_native_key(&mirrored), Some(key));
        }
    }

    #[test]
    fn test_strip_native_key() {
        assert_eq!(strip_native_key("PROJ-7 - Fix crash"), "Fix crash");
        assert_eq!(strip_native_key("PROJ-7 Fix crash"), "Fix crash");
        assert_eq!(strip_native_key("Fix crash"), "Fix crash");
    }

    #[test]
    fn test_issue_echo() {
        let markers = ControlMarkers::default();

        // GitHub issue created by the sync carries the Jira origin label
        assert!(markers.is_issue_echo(System::GitHub, &["bug", "source:jira"]));
        assert!(!markers.is_issue_echo(System::GitHub, &["bug", "source:github"]));
        assert!(markers.is_issue_echo(System::Jira, &["source:github"]));
        assert!(!markers.is_issue_echo::<&str>(System::Jira, &[]));
    }

    #[test]
    fn test_comment_echo() {
        let markers = ControlMarkers::default();

        assert!(markers.is_comment_echo("looks good\n\ncomment from jira"));
        assert!(markers.is_comment_echo("comment from github"));
        assert!(!markers.is_comment_echo("looks good"));
    }

    #[test]
    fn test_tag_comment_is_recognized() {
        let markers = ControlMarkers::default();
        let tagged = markers.tag_comment("ship it", System::GitHub);

        assert_eq!(tagged, "ship it\n\ncomment from github");
        assert!(markers.is_comment_echo(&tagged));
    }

    #[test]
    fn test_tag_labels() {
        let markers = ControlMarkers::default();
        let tagged = markers.tag_labels(&["bug", "source:jira", "bug", "Bug"], System::GitHub);

        assert_eq!(tagged, vec!["bug", "Bug", "source:github"]);
    }

    #[test]
    fn test_origin_of() {
        let markers = ControlMarkers::default();

        assert_eq!(markers.origin_of(&["source:jira"], System::GitHub), System::Jira);
        assert_eq!(markers.origin_of(&["bug"], System::GitHub), System::GitHub);
        assert_eq!(markers.origin_of::<&str>(&[], System::Jira), System::Jira);
    }
}
