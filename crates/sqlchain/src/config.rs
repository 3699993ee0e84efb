use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlchain_api::{ChainError, Namespace, Result};

use crate::chain::DEFAULT_ALIAS_PREFIX;
use crate::composer::CompileStyle;

fn default_alias_prefix() -> String {
    DEFAULT_ALIAS_PREFIX.to_string()
}

fn default_preview_limit() -> usize {
    10
}

/// Session settings, usually read from `config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// `DB.SCHEMA` completing one- and two-part table names.
    pub default_namespace: Option<Namespace>,
    pub compile_style: CompileStyle,
    #[serde(default = "default_alias_prefix")]
    pub alias_prefix: String,
    /// Extra template directories, loaded after the builtins in order.
    pub template_dirs: Vec<PathBuf>,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            default_namespace: None,
            compile_style: CompileStyle::default(),
            alias_prefix: default_alias_prefix(),
            template_dirs: Vec::new(),
            preview_limit: default_preview_limit(),
        }
    }
}

impl ChainConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ChainError::Config(e.to_string()))
    }

    /// Load a YAML config file. Relative template directories are resolved
    /// against the file's directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content).map_err(|e| {
            ChainError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        if let Some(base) = path.parent() {
            for dir in &mut config.template_dirs {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(config)
    }
}
