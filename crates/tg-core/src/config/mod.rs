//! Configuration management for taskgate

mod agent;
mod keys;

pub use agent::{AgentSettings, MergedSettings, SettingsOverrides, UnauthenticatedPolicy};
pub use keys::{
    fingerprint, load_or_generate_keys, verify_signature, BrokerKeys, KeyFile, KeyPair,
    SIGNATURE_NAMESPACE,
};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskgate")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("agent.toml")
}

/// Get the default key file path
pub fn default_key_path() -> PathBuf {
    default_config_dir().join("keys.json")
}

/// Default location of the local interprocess socket.
///
/// Prefers the per-user runtime directory and falls back to a per-user
/// name in the temp directory.
pub fn default_socket_path() -> PathBuf {
    match dirs::runtime_dir() {
        Some(dir) => dir.join("taskgate.sock"),
        None => std::env::temp_dir().join(format!("taskgate-{}.sock", whoami::username())),
    }
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let settings = AgentSettings {
            clients: 2,
            servers: 1,
            endpoints: vec!["tcp://127.0.0.1:7000".to_string()],
            ..AgentSettings::default()
        };
        save_config(&path, &settings).unwrap();

        let loaded: AgentSettings = load_config(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result: Result<AgentSettings, _> = load_config(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_default_socket_path_has_name() {
        let path = default_socket_path();
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("taskgate"));
        assert!(name.ends_with(".sock"));
    }
}
