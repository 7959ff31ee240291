use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Environment variable overriding [`DagConfig::namespace`].
pub const NAMESPACE_ENV: &str = "BRANCHDAG_NAMESPACE";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagConfig {
    /// Second segment of every resolver name and storage path
    /// (`/<address>/<namespace>/dag/...`).
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Upper bound on branch-root ancestry walked when deriving a storage
    /// path.
    #[serde(default = "default_max_branch_depth")]
    pub max_branch_depth: usize,
    /// Deadline applied by [`crate::context::OpContext::from_config`]; 0
    /// disables it.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            max_branch_depth: default_max_branch_depth(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_namespace() -> String {
    "ledger".to_string()
}

const fn default_max_branch_depth() -> usize {
    256
}

const fn default_timeout_ms() -> u64 {
    30_000
}

impl DagConfig {
    /// Parse a configuration from TOML text. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value has the
    /// wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse dag config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty or slash-containing namespace, or a zero
    /// depth bound.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.contains('/') {
            anyhow::bail!("namespace {:?} must be non-empty and contain no '/'", self.namespace);
        }
        if self.max_branch_depth == 0 {
            anyhow::bail!("max_branch_depth must be > 0");
        }
        Ok(())
    }
}

/// Load the configuration at `path`, falling back to defaults when the file
/// does not exist, then apply environment overrides.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<DagConfig> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        DagConfig::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        DagConfig::default()
    };

    apply_env_overrides(&mut config, env::var(NAMESPACE_ENV).ok())?;
    Ok(config)
}

fn apply_env_overrides(config: &mut DagConfig, namespace: Option<String>) -> Result<()> {
    if let Some(namespace) = namespace.filter(|ns| !ns.trim().is_empty()) {
        config.namespace = namespace.trim().to_owned();
        config.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DagConfig::default();
        assert_eq!(config.namespace, "ledger");
        assert_eq!(config.max_branch_depth, 256);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = DagConfig::from_toml_str("namespace = \"social\"\n").expect("parse");
        assert_eq!(config.namespace, "social");
        assert_eq!(config.default_timeout_ms, 30_000);
    }

    #[test]
    fn invalid_namespace_is_rejected() {
        assert!(DagConfig::from_toml_str("namespace = \"a/b\"\n").is_err());
        assert!(DagConfig::from_toml_str("namespace = \"\"\n").is_err());
        assert!(DagConfig::from_toml_str("max_branch_depth = 0\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.max_branch_depth, DagConfig::default().max_branch_depth);
    }

    #[test]
    fn file_is_read_when_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dag.toml");
        std::fs::write(&path, "namespace = \"feeds\"\ndefault_timeout_ms = 0\n").expect("write");
        let config = load_config(&path).expect("load");
        assert_eq!(config.default_timeout_ms, 0);
    }

    #[test]
    fn env_override_replaces_namespace() {
        let mut config = DagConfig::default();
        apply_env_overrides(&mut config, Some(" timeline ".into())).expect("override");
        assert_eq!(config.namespace, "timeline");

        apply_env_overrides(&mut config, Some("   ".into())).expect("blank ignored");
        assert_eq!(config.namespace, "timeline");

        assert!(apply_env_overrides(&mut config, Some("bad/ns".into())).is_err());
    }
}
