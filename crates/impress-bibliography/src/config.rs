//! Configuration for impress-bibliography
//!
//! Centralized settings for search tuning, local bibliography discovery and the
//! Zotero provider. Loaded from `bibliography.toml` (or JSON) with every
//! section optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Name of the config file looked up in `~/.impress/` and `<project>/.impress/`
pub const CONFIG_FILE_NAME: &str = "bibliography.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BibliographyConfig {
    /// Fuzzy search tuning
    pub search: SearchConfig,
    /// Local bibliography files
    pub local: LocalConfig,
    /// Zotero library access
    pub zotero: ZoteroConfig,
    /// Per-provider load timeout in seconds (`None` waits indefinitely)
    pub load_timeout_secs: Option<u64>,
}

impl Default for BibliographyConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            local: LocalConfig::default(),
            zotero: ZoteroConfig::default(),
            load_timeout_secs: Some(30),
        }
    }
}

/// Relative weight of each indexed field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldWeights {
    pub id: f64,
    pub author_family: f64,
    pub author_literal: f64,
    pub title: f64,
    pub author_given: f64,
    pub issued: f64,
    /// Indexed for filtering only
    pub provider: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            id: 0.30,
            author_family: 0.275,
            author_literal: 0.275,
            title: 0.10,
            author_given: 0.025,
            issued: 0.025,
            provider: 0.0,
        }
    }
}

impl FieldWeights {
    pub fn total(&self) -> f64 {
        self.id
            + self.author_family
            + self.author_literal
            + self.title
            + self.author_given
            + self.issued
            + self.provider
    }

    fn all(&self) -> [(&'static str, f64); 7] {
        [
            ("id", self.id),
            ("author_family", self.author_family),
            ("author_literal", self.author_literal),
            ("title", self.title),
            ("author_given", self.author_given),
            ("issued", self.issued),
            ("provider", self.provider),
        ]
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Upper bound on returned results
    pub limit: usize,
    /// Queries longer than this (in characters) are truncated
    pub max_query_length: usize,
    /// Minimum similarity (0.0 to 1.0) for a field to count as matched
    pub threshold: f64,
    pub weights: FieldWeights,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 1000,
            max_query_length: 64,
            threshold: 0.6,
            weights: FieldWeights::default(),
        }
    }
}

/// Local bibliography configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalConfig {
    /// Bibliographies shared by every document of the project
    pub project_bibliographies: Vec<PathBuf>,
}

/// Zotero provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ZoteroConfig {
    pub enabled: bool,
    /// Zotero data directory; detected from the Zotero profile when unset
    pub data_dir: Option<PathBuf>,
    /// Use Better BibTeX; detected from the Zotero profile when unset
    pub better_bibtex: Option<bool>,
    /// Where the working copy of `zotero.sqlite` is kept
    pub scratch_dir: Option<PathBuf>,
    /// Better BibTeX JSON-RPC endpoint
    pub rpc_url: String,
}

impl Default for ZoteroConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: None,
            better_bibtex: None,
            scratch_dir: None,
            rpc_url: "http://127.0.0.1:23119/better-bibtex/json-rpc".to_string(),
        }
    }
}

impl ZoteroConfig {
    /// Scratch directory, defaulting to the user cache dir
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("impress")
                .join("zotero")
                .join("sqlite")
        })
    }
}

impl BibliographyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs.map(Duration::from_secs)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a file, choosing the format by extension
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Load configuration from standard locations
    ///
    /// A project file (`<root>/.impress/bibliography.toml`) takes precedence over
    /// the user file (`~/.impress/bibliography.toml`); defaults apply when
    /// neither exists.
    pub fn load_standard(project_root: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(root) = project_root {
            let project_file = root.join(".impress").join(CONFIG_FILE_NAME);
            if project_file.exists() {
                tracing::debug!("Loading bibliography config from {:?}", project_file);
                return Self::load_from_path(&project_file);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let user_file = home.join(".impress").join(CONFIG_FILE_NAME);
            if user_file.exists() {
                tracing::debug!("Loading bibliography config from {:?}", user_file);
                return Self::load_from_path(&user_file);
            }
        }

        Ok(Self::default())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.limit == 0 {
            return Err(ConfigError::OutOfRange(
                "search.limit must be positive".to_string(),
            ));
        }

        if self.search.max_query_length == 0 {
            return Err(ConfigError::OutOfRange(
                "search.max_query_length must be positive".to_string(),
            ));
        }

        if !(self.search.threshold > 0.0 && self.search.threshold <= 1.0) {
            return Err(ConfigError::OutOfRange(
                "search.threshold must be in (0.0, 1.0]".to_string(),
            ));
        }

        for (name, weight) in self.search.weights.all() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::OutOfRange(format!(
                    "search.weights.{} must be a non-negative number",
                    name
                )));
            }
        }

        if self.search.weights.total() <= 0.0 {
            return Err(ConfigError::OutOfRange(
                "search.weights must not all be zero".to_string(),
            ));
        }

        if self.load_timeout_secs == Some(0) {
            return Err(ConfigError::OutOfRange(
                "load_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
