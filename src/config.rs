//! Resolution configuration.
//!
//! An immutable value handed to the query factory. Every query built by a
//! factory snapshots the configuration it was built with, so toggling type
//! inference only ever affects queries constructed afterwards.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Options controlling query construction and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Narrow atoms with types derivable from the schema (default: true).
    #[serde(default = "default_infer_types")]
    pub infer_types: bool,
    /// Attach explanations to answers (default: false).
    #[serde(default)]
    pub explain: bool,
    /// Maximum nesting of atomic sub-goals (default: 64).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum rule-expansion rounds for a recursive component (default: 64).
    #[serde(default = "default_max_fixpoint_iterations")]
    pub max_fixpoint_iterations: usize,
}

fn default_infer_types() -> bool {
    true
}
fn default_max_depth() -> usize {
    64
}
fn default_max_fixpoint_iterations() -> usize {
    64
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            infer_types: default_infer_types(),
            explain: false,
            max_depth: default_max_depth(),
            max_fixpoint_iterations: default_max_fixpoint_iterations(),
        }
    }
}

impl ResolutionConfig {
    pub fn with_infer_types(self, infer_types: bool) -> Self {
        Self {
            infer_types,
            ..self
        }
    }

    pub fn with_explain(self, explain: bool) -> Self {
        Self { explain, ..self }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "max_depth must be at least 1".into(),
            });
        }
        if self.max_fixpoint_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "max_fixpoint_iterations must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &std::path::Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}
