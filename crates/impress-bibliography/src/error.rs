//! Error types for impress-bibliography

use std::path::PathBuf;
use thiserror::Error;

use crate::http::HttpError;

/// Errors raised by a provider while loading or synthesizing citations.
///
/// The manager never propagates these; it logs them and keeps the provider's
/// previous contribution.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("IO error reading {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Parse error in {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task error: {0}")]
    Task(String),
}

impl ProviderError {
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ProviderError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ProviderError {
    fn from(e: rusqlite::Error) -> Self {
        ProviderError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(e: tokio::task::JoinError) -> Self {
        ProviderError::Task(e.to_string())
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}
