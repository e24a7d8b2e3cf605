//! Defaulting at admission. Workspace defaults are materialized into the
//! session spec exactly once, when the gateway persists the object;
//! later edits to `WorkspaceSettings` never mutate existing sessions.

use crate::{LlmSettings, ResourceOverrides, WorkspaceSettingsSpec};

pub fn resolve_llm(user: Option<LlmSettings>, settings: &WorkspaceSettingsSpec) -> LlmSettings {
    user.unwrap_or_else(|| settings.default_llm_settings.clone())
}

pub fn resolve_timeout(user: Option<i64>, settings: &WorkspaceSettingsSpec) -> i64 {
    user.unwrap_or(settings.default_timeout)
}

/// Storage size and class for the session volume claim, from overrides
/// falling back to workspace defaults.
pub fn resolve_storage(
    overrides: Option<&ResourceOverrides>,
    settings: &WorkspaceSettingsSpec,
) -> (String, Option<String>) {
    let size = overrides
        .and_then(|o| o.storage.clone())
        .unwrap_or_else(|| settings.default_storage.size.clone());
    let class = overrides
        .and_then(|o| o.storage_class_name.clone())
        .or_else(|| settings.default_storage.storage_class_name.clone());
    (size, class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageDefaults;

    fn settings() -> WorkspaceSettingsSpec {
        WorkspaceSettingsSpec {
            default_llm_settings: LlmSettings {
                model: "claude-opus-4-1".to_string(),
                temperature: 0.2,
                max_tokens: 8192,
            },
            default_timeout: 7200,
            default_storage: StorageDefaults {
                size: "20Gi".to_string(),
                storage_class_name: Some("fast".to_string()),
            },
            ..Default::default()
        }
    }

    #[test]
    fn user_settings_win_over_workspace_defaults() {
        let user = LlmSettings {
            model: "claude-haiku-4-5".to_string(),
            temperature: 1.0,
            max_tokens: 1024,
        };
        assert_eq!(resolve_llm(Some(user.clone()), &settings()), user);
        assert_eq!(resolve_timeout(Some(600), &settings()), 600);
    }

    #[test]
    fn missing_fields_inherit_workspace_defaults() {
        let s = settings();
        assert_eq!(resolve_llm(None, &s), s.default_llm_settings);
        assert_eq!(resolve_timeout(None, &s), 7200);
    }

    #[test]
    fn storage_prefers_overrides_per_field() {
        let s = settings();
        let overrides = ResourceOverrides {
            storage: Some("50Gi".to_string()),
            ..Default::default()
        };
        // Size overridden, class inherited.
        assert_eq!(
            resolve_storage(Some(&overrides), &s),
            ("50Gi".to_string(), Some("fast".to_string()))
        );
        assert_eq!(
            resolve_storage(None, &s),
            ("20Gi".to_string(), Some("fast".to_string()))
        );
    }
}
