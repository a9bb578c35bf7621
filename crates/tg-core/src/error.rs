//! Core error types for taskgate

use std::path::PathBuf;
use thiserror::Error;

use crate::types::SessionKind;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Key material could not be produced or read
    #[error("Key error: {0}")]
    Key(String),
}

/// Errors reported by a session registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No session with this index
    #[error("{kind} session {index} not found")]
    SessionNotFound { kind: SessionKind, index: usize },

    /// Session could not be started
    #[error("Failed to start {kind} session {index}: {reason}")]
    StartFailed {
        kind: SessionKind,
        index: usize,
        reason: String,
    },
}

/// Settings persistence errors
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Writing the settings file failed
    #[error("Failed to write settings to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings could not be encoded
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
