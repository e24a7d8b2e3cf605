//! Admission validation for session specs. The gateway rejects writes
//! that fail these checks; nothing invalid ever reaches the store.

use crate::SessionSpec;
use url::Url;

pub const MODEL_ALLOWLIST: &[&str] = &[
    "claude-sonnet-4-5",
    "claude-opus-4-1",
    "claude-haiku-4-5",
];

pub const MIN_TIMEOUT_SECONDS: i64 = 60;
pub const MAX_TIMEOUT_SECONDS: i64 = 604_800;
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;
pub const MAX_ENV_VALUE_BYTES: usize = 4 * 1024;
pub const MAX_ENV_BUNDLE_BYTES: usize = 64 * 1024;
pub const MAX_NAME_LEN: usize = 63;

/// A single field-level admission failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Session names become child object names and DNS labels; RFC 1123.
pub fn validate_session_name(name: &str) -> Result<(), FieldError> {
    if name.is_empty() {
        return Err(FieldError::new("name", "must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FieldError::new(
            "name",
            format!("must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    let valid_inner = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());
    if !valid_inner || !valid_edges {
        return Err(FieldError::new(
            "name",
            "must be a lowercase DNS label (a-z, 0-9, '-', alphanumeric edges)",
        ));
    }
    Ok(())
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn validate_repo_url(field: &str, raw: &str, errors: &mut Vec<FieldError>) {
    match Url::parse(raw) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "https" && scheme != "git+ssh" {
                errors.push(FieldError::new(
                    field,
                    format!("scheme must be https or git+ssh, got {scheme}"),
                ));
            }
        }
        Err(e) => errors.push(FieldError::new(field, format!("invalid URL: {e}"))),
    }
}

/// Validates a fully-defaulted spec. Returns every violation, not just
/// the first, so the client sees a complete field-level report.
pub fn validate_session_spec(spec: &SessionSpec) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if spec.display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        errors.push(FieldError::new(
            "displayName",
            format!("must be at most {MAX_DISPLAY_NAME_CHARS} characters"),
        ));
    }

    if spec.initial_prompt.is_empty() && !spec.interactive {
        errors.push(FieldError::new(
            "initialPrompt",
            "must not be empty unless interactive is true",
        ));
    }

    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&spec.timeout) {
        errors.push(FieldError::new(
            "timeout",
            format!("must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS} seconds"),
        ));
    }

    if !MODEL_ALLOWLIST.contains(&spec.llm_settings.model.as_str()) {
        errors.push(FieldError::new(
            "llmSettings.model",
            format!("unknown model {:?}", spec.llm_settings.model),
        ));
    }
    if !(0.0..=2.0).contains(&spec.llm_settings.temperature)
        || !spec.llm_settings.temperature.is_finite()
    {
        errors.push(FieldError::new(
            "llmSettings.temperature",
            "must be between 0 and 2",
        ));
    }
    if spec.llm_settings.max_tokens < 1 {
        errors.push(FieldError::new("llmSettings.maxTokens", "must be at least 1"));
    }

    for (i, repo) in spec.repos.iter().enumerate() {
        validate_repo_url(&format!("repos[{i}].url"), &repo.url, &mut errors);
        if let Some(branch) = &repo.branch
            && branch.is_empty()
        {
            errors.push(FieldError::new(
                &format!("repos[{i}].branch"),
                "must not be empty when present",
            ));
        }
    }

    if let Some(workflow) = &spec.active_workflow {
        validate_repo_url("activeWorkflow.gitUrl", &workflow.git_url, &mut errors);
    }

    let mut bundle_bytes = 0usize;
    for (key, value) in &spec.environment_variables {
        if !is_env_key(key) {
            errors.push(FieldError::new(
                &format!("environmentVariables.{key}"),
                "key must match [A-Z_][A-Z0-9_]*",
            ));
        }
        if value.len() > MAX_ENV_VALUE_BYTES {
            errors.push(FieldError::new(
                &format!("environmentVariables.{key}"),
                format!("value exceeds {MAX_ENV_VALUE_BYTES} bytes"),
            ));
        }
        bundle_bytes += key.len() + value.len();
    }
    if bundle_bytes > MAX_ENV_BUNDLE_BYTES {
        errors.push(FieldError::new(
            "environmentVariables",
            format!("bundle exceeds {MAX_ENV_BUNDLE_BYTES} bytes"),
        ));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LlmSettings, RepoRef, WorkflowRef};

    fn valid_spec() -> SessionSpec {
        SessionSpec {
            initial_prompt: "list files".to_string(),
            display_name: "List files".to_string(),
            interactive: false,
            timeout: 3600,
            llm_settings: LlmSettings::default(),
            repos: vec![RepoRef {
                url: "https://example.com/o/r.git".to_string(),
                branch: None,
            }],
            environment_variables: Default::default(),
            resource_overrides: None,
            user_context: None,
            active_workflow: None,
        }
    }

    fn fields(spec: &SessionSpec) -> Vec<String> {
        validate_session_spec(spec)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn accepts_valid_spec() {
        assert!(validate_session_spec(&valid_spec()).is_ok());
    }

    #[test]
    fn rejects_unknown_model() {
        let mut spec = valid_spec();
        spec.llm_settings.model = "gpt-7".to_string();
        assert_eq!(fields(&spec), vec!["llmSettings.model"]);
    }

    #[test]
    fn rejects_temperature_out_of_range() {
        let mut spec = valid_spec();
        spec.llm_settings.temperature = 2.5;
        assert_eq!(fields(&spec), vec!["llmSettings.temperature"]);
        spec.llm_settings.temperature = -0.1;
        assert_eq!(fields(&spec), vec!["llmSettings.temperature"]);
        spec.llm_settings.temperature = f64::NAN;
        assert_eq!(fields(&spec), vec!["llmSettings.temperature"]);
    }

    #[test]
    fn rejects_non_positive_max_tokens() {
        let mut spec = valid_spec();
        spec.llm_settings.max_tokens = 0;
        assert_eq!(fields(&spec), vec!["llmSettings.maxTokens"]);
    }

    #[test]
    fn rejects_timeout_outside_bounds() {
        let mut spec = valid_spec();
        spec.timeout = 59;
        assert_eq!(fields(&spec), vec!["timeout"]);
        spec.timeout = 604_801;
        assert_eq!(fields(&spec), vec!["timeout"]);
        spec.timeout = 60;
        assert!(validate_session_spec(&spec).is_ok());
        spec.timeout = 604_800;
        assert!(validate_session_spec(&spec).is_ok());
    }

    #[test]
    fn empty_prompt_requires_interactive() {
        let mut spec = valid_spec();
        spec.initial_prompt = String::new();
        assert_eq!(fields(&spec), vec!["initialPrompt"]);
        spec.interactive = true;
        assert!(validate_session_spec(&spec).is_ok());
    }

    #[test]
    fn rejects_long_display_name() {
        let mut spec = valid_spec();
        spec.display_name = "x".repeat(51);
        assert_eq!(fields(&spec), vec!["displayName"]);
        spec.display_name = "é".repeat(50); // counted in chars, not bytes
        assert!(validate_session_spec(&spec).is_ok());
    }

    #[test]
    fn rejects_bad_repo_urls() {
        let mut spec = valid_spec();
        spec.repos = vec![
            RepoRef {
                url: "ftp://example.com/r.git".to_string(),
                branch: None,
            },
            RepoRef {
                url: "not a url".to_string(),
                branch: None,
            },
            RepoRef {
                url: "git+ssh://git@example.com/o/r.git".to_string(),
                branch: Some(String::new()),
            },
        ];
        assert_eq!(
            fields(&spec),
            vec!["repos[0].url", "repos[1].url", "repos[2].branch"]
        );
    }

    #[test]
    fn validates_workflow_url() {
        let mut spec = valid_spec();
        spec.active_workflow = Some(WorkflowRef {
            git_url: "http://insecure.example.com/w.git".to_string(),
            branch: None,
            path: None,
        });
        assert_eq!(fields(&spec), vec!["activeWorkflow.gitUrl"]);
    }

    #[test]
    fn rejects_bad_env_keys_and_oversized_values() {
        let mut spec = valid_spec();
        spec.environment_variables
            .insert("lower_case".to_string(), "v".to_string());
        spec.environment_variables
            .insert("9LEADING".to_string(), "v".to_string());
        spec.environment_variables
            .insert("BIG".to_string(), "x".repeat(MAX_ENV_VALUE_BYTES + 1));
        spec.environment_variables
            .insert("OK_KEY_2".to_string(), "v".to_string());
        let got = fields(&spec);
        assert!(got.contains(&"environmentVariables.lower_case".to_string()));
        assert!(got.contains(&"environmentVariables.9LEADING".to_string()));
        assert!(got.contains(&"environmentVariables.BIG".to_string()));
        assert!(!got.iter().any(|f| f.ends_with("OK_KEY_2")));
    }

    #[test]
    fn rejects_oversized_env_bundle() {
        let mut spec = valid_spec();
        for i in 0..20 {
            spec.environment_variables
                .insert(format!("KEY_{i}"), "x".repeat(4000));
        }
        assert!(fields(&spec).contains(&"environmentVariables".to_string()));
    }

    #[test]
    fn session_name_rules() {
        assert!(validate_session_name("fix-ci-123").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("Uppercase").is_err());
        assert!(validate_session_name("-leading").is_err());
        assert!(validate_session_name("trailing-").is_err());
        assert!(validate_session_name("dot.name").is_err());
        assert!(validate_session_name(&"a".repeat(64)).is_err());
        assert!(validate_session_name(&"a".repeat(63)).is_ok());
    }
}
