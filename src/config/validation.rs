//! Configuration validation
//!
//! Validates tracksync configuration for correctness:
//! - Required tracker settings are present
//! - Jira URL is well-formed
//! - Control markers are non-empty and disjoint
//! - Retry and server settings are usable
//! - The static user mapping table parses

use super::sync_config::SyncConfig;
use crate::sync::identity::parse_user_table;
use crate::SyncError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub section: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            section: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn in_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref section) = self.section {
            write!(f, "[{}] {}: {}", section, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a tracksync configuration, collecting every problem
pub fn validate_config(config: &SyncConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let required = [
        ("github", "organization", &config.github.organization),
        ("github", "repository", &config.github.repository),
        ("jira", "url", &config.jira.url),
        ("jira", "project", &config.jira.project),
        ("jira", "project_id", &config.jira.project_id),
        ("jira", "done_transition_id", &config.jira.done_transition_id),
        ("jira", "done_status_name", &config.jira.done_status_name),
        (
            "jira",
            "custom_fields.github_repository",
            &config.jira.custom_fields.github_repository,
        ),
        (
            "jira",
            "custom_fields.github_issue_number",
            &config.jira.custom_fields.github_issue_number,
        ),
    ];

    for (section, field, value) in required {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(field, "Must not be empty").in_section(section));
        }
    }

    if !config.jira.url.is_empty() && !is_http_url(&config.jira.url) {
        errors.push(
            ValidationError::new("url", format!("Invalid URL: {}", config.jira.url))
                .in_section("jira"),
        );
    }

    if !is_http_url(&config.github.url) {
        errors.push(
            ValidationError::new("url", format!("Invalid URL: {}", config.github.url))
                .in_section("github"),
        );
    }

    let markers = &config.markers;
    let marker_values = [
        ("label_from_github", &markers.label_from_github),
        ("label_from_jira", &markers.label_from_jira),
        ("comment_from_github", &markers.comment_from_github),
        ("comment_from_jira", &markers.comment_from_jira),
    ];
    for (field, value) in marker_values {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(field, "Must not be empty").in_section("markers"));
        }
    }
    if markers.label_from_github == markers.label_from_jira {
        errors.push(
            ValidationError::new("label_from_jira", "Control labels must differ")
                .in_section("markers"),
        );
    }
    if markers.comment_from_github == markers.comment_from_jira {
        errors.push(
            ValidationError::new("comment_from_jira", "Comment suffixes must differ")
                .in_section("markers"),
        );
    }

    if config.retry.max_attempts == 0 {
        errors.push(
            ValidationError::new("max_attempts", "Must be at least 1").in_section("retry"),
        );
    }

    if config.server.port == 0 {
        errors.push(
            ValidationError::new("port", "Port must be greater than 0").in_section("server"),
        );
    }

    if let Err(e) = parse_user_table(&config.user_mappings) {
        errors.push(ValidationError::new("user_mappings", e.to_string()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and fold all problems into a single error
pub fn validate_config_result(config: &SyncConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let msg = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");
        SyncError::Config(format!("Configuration validation failed:\n{}", msg))
    })
}

fn is_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty() && !host.contains(' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> SyncConfig {
        serde_yaml::from_str(
            r#"
github:
  organization: acme
  repository: widgets
jira:
  url: https://acme.atlassian.net
  project: PROJ
  project_id: "10000"
  custom_fields:
    github_repository: customfield_10050
    github_issue_number: customfield_10051
user_mappings: "octocat:5b10a;hubot:99ff"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_required_fields() {
        let mut config = valid_config();
        config.github.organization = String::new();
        config.jira.custom_fields.github_issue_number = " ".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.field == "organization"));
    }

    #[test]
    fn test_invalid_jira_url() {
        let mut config = valid_config();
        config.jira.url = "acme.atlassian.net".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("[jira] url"));
    }

    #[test]
    fn test_markers_must_be_disjoint() {
        let mut config = valid_config();
        config.markers.label_from_jira = config.markers.label_from_github.clone();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "label_from_jira"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = valid_config();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_user_table() {
        let mut config = valid_config();
        config.user_mappings = "octocat".to_string();

        let result = validate_config_result(&config);
        assert!(result.unwrap_err().to_string().contains("user_mappings"));
    }
}
