//! Configuration module for the embedding index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `EMBEDIX_` and use double
//! underscores to separate nested levels:
//! - `EMBEDIX_SEMANTIC_SEARCH__ENABLED=true` sets `semantic_search.enabled`
//! - `EMBEDIX_BUDGET__MEMORY_FRACTION=0.1` sets `budget.memory_fraction`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::budget::DEFAULT_MEMORY_FRACTION;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Path to the index directory
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Semantic search settings
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,

    /// Memory budget settings
    #[serde(default)]
    pub budget: BudgetConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SemanticSearchConfig {
    /// Enable semantic search
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Similarity threshold for search results
    #[serde(default = "default_similarity_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BudgetConfig {
    /// Fraction of available memory shared by all indices
    #[serde(default = "default_memory_fraction")]
    pub memory_fraction: f64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_index_path() -> PathBuf {
    PathBuf::from(".embedix/index")
}
fn default_false() -> bool {
    false
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_similarity_threshold() -> f32 {
    0.6
}
fn default_memory_fraction() -> f64 {
    DEFAULT_MEMORY_FRACTION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index_path: default_index_path(),
            debug: false,
            semantic_search: SemanticSearchConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_embedding_model(),
            threshold: default_similarity_threshold(),
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            memory_fraction: default_memory_fraction(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(".embedix/settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Layer in environment variables with EMBEDIX_ prefix.
            // Double underscore separates nested levels; single underscore
            // remains as is within field names.
            .merge(Env::prefixed("EMBEDIX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .embedix directory,
    /// searching from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(".embedix");
            if config_dir.exists() && config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.index_path, PathBuf::from(".embedix/index"));
        assert!(!settings.semantic_search.enabled);
        assert_eq!(settings.semantic_search.model, "AllMiniLML6V2");
        assert!((settings.budget.memory_fraction - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[semantic_search]
enabled = true
threshold = 0.4

[budget]
memory_fraction = 0.1
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert!(settings.semantic_search.enabled);
        assert!((settings.semantic_search.threshold - 0.4).abs() < f32::EPSILON);
        assert!((settings.budget.memory_fraction - 0.1).abs() < f64::EPSILON);
        // Untouched fields keep their defaults
        assert_eq!(settings.semantic_search.model, "AllMiniLML6V2");
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.semantic_search.enabled = true;
        settings.budget.memory_fraction = 0.5;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert!(loaded.semantic_search.enabled);
        assert!((loaded.budget.memory_fraction - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_env_overrides_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[semantic_search]
threshold = 0.7
"#;
        fs::write(&config_path, toml_content).unwrap();

        unsafe {
            std::env::set_var("EMBEDIX_SEMANTIC_SEARCH__THRESHOLD", "0.3");
        }

        let settings = Settings::load_from(&config_path).unwrap();
        assert!((settings.semantic_search.threshold - 0.3).abs() < f32::EPSILON);

        unsafe {
            std::env::remove_var("EMBEDIX_SEMANTIC_SEARCH__THRESHOLD");
        }
    }
}
