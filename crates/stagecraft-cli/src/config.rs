//! Loads a [`RegistryConfig`] from a YAML file on disk. This engine's
//! config *is* the registry — skills, roles, and workflow — rather than a
//! separate server-settings file.

use std::path::Path;

use stagecraft_core::{StagecraftError, StagecraftResult};
use stagecraft_registry::RegistryConfig;

/// Reads and parses a YAML registry file. Errors are reported as
/// [`StagecraftError::Validation`] — the YAML layer is not part of the
/// structured `ConfigError` taxonomy, which only covers cross-reference
/// validation performed by [`stagecraft_registry::Registry::load`].
pub async fn load_registry_config(path: &Path) -> StagecraftResult<RegistryConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StagecraftError::Validation(format!("reading '{}': {e}", path.display())))?;
    serde_yaml_ng::from_str(&raw)
        .map_err(|e| StagecraftError::Validation(format!("parsing '{}': {e}", path.display())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_a_minimal_config() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("registry.yaml");
        tokio::fs::write(
            &path,
            r#"
skills:
  - id: s1
    name: S1
    description: does s1 things
    skill_type: procedural
roles:
  - id: builder
    name: Builder
    description: builds things
    required_skills:
      - skill_id: s1
        min_level: 1
workflow:
  id: wf
  name: wf
  stages:
    - id: stg
      name: build
      role_id: builder
      outputs: [result]
"#,
        )
        .await
        .expect("write config");

        let config = load_registry_config(&path).await.expect("load");
        assert_eq!(config.skills.len(), 1);
        assert_eq!(config.workflow.stages.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_validation_error() {
        let err = load_registry_config(Path::new("/nonexistent/registry.yaml")).await.unwrap_err();
        assert!(matches!(err, StagecraftError::Validation(_)));
    }
}
