//! Session-count persistence
//!
//! The broker persists its session counts every time one changes so that a
//! restarted agent brings the same sessions back up. Stores always rewrite
//! the whole document; saving the same counts twice is harmless.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::AgentSettings;
use crate::error::SettingsError;
use crate::types::SessionCounts;

/// Persistence handle for session counts
pub trait SettingsStore: Send + Sync {
    /// Read the stored counts; unreadable storage means no prior state
    fn load(&self) -> SessionCounts;

    /// Replace the stored counts
    fn save(&self, counts: &SessionCounts) -> Result<(), SettingsError>;
}

/// Stores counts inside the agent settings file
pub struct TomlSettingsStore {
    /// Settings file location
    path: PathBuf,
    /// Everything except the counts, written back unchanged
    base: AgentSettings,
}

impl TomlSettingsStore {
    /// Create a store writing `base` (with updated counts) to `path`
    pub fn new(path: impl Into<PathBuf>, base: AgentSettings) -> Self {
        Self {
            path: path.into(),
            base,
        }
    }

    /// Settings file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> SessionCounts {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Settings file {:?} unreadable, using defaults: {}", self.path, e);
                return SessionCounts::default();
            }
        };

        match toml::from_str::<AgentSettings>(&content) {
            Ok(settings) => SessionCounts::new(settings.clients, settings.servers),
            Err(e) => {
                tracing::warn!("Settings file {:?} invalid, using defaults: {}", self.path, e);
                SessionCounts::default()
            }
        }
    }

    fn save(&self, counts: &SessionCounts) -> Result<(), SettingsError> {
        let settings = AgentSettings {
            clients: counts.clients,
            servers: counts.servers,
            ..self.base.clone()
        };
        let content = toml::to_string_pretty(&settings)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        std::fs::write(&self.path, content).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })?;

        tracing::debug!(
            "Saved session counts to {:?}: {} clients, {} servers",
            self.path,
            counts.clients,
            counts.servers
        );
        Ok(())
    }
}

/// In-memory store for embedding and tests
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    counts: Mutex<SessionCounts>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    /// Create a store holding `counts`
    pub fn new(counts: SessionCounts) -> Self {
        Self {
            counts: Mutex::new(counts),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> SessionCounts {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, counts: &SessionCounts) -> Result<(), SettingsError> {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner()) = *counts;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnauthenticatedPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_toml_store_roundtrip_keeps_other_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        let base = AgentSettings {
            endpoints: vec!["tcp://127.0.0.1:7100".to_string()],
            unauthenticated: UnauthenticatedPolicy::Admit,
            ..AgentSettings::default()
        };
        let store = TomlSettingsStore::new(&path, base);

        store.save(&SessionCounts::new(3, 2)).unwrap();
        assert_eq!(store.load(), SessionCounts::new(3, 2));

        let on_disk: AgentSettings =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.endpoints, vec!["tcp://127.0.0.1:7100".to_string()]);
        assert_eq!(on_disk.unauthenticated, UnauthenticatedPolicy::Admit);
    }

    #[test]
    fn test_toml_store_save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        let store = TomlSettingsStore::new(&path, AgentSettings::default());

        store.save(&SessionCounts::new(1, 0)).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        store.save(&SessionCounts::new(1, 0)).unwrap();
        assert_eq!(first, std::fs::read_to_string(&path).unwrap());
    }

    #[test]
    fn test_toml_store_missing_file_defaults() {
        let dir = TempDir::new().unwrap();
        let store = TomlSettingsStore::new(dir.path().join("absent.toml"), AgentSettings::default());
        assert_eq!(store.load(), SessionCounts::default());
    }

    #[test]
    fn test_toml_store_garbage_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "clients = [not toml").unwrap();
        let store = TomlSettingsStore::new(&path, AgentSettings::default());
        assert_eq!(store.load(), SessionCounts::default());
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemorySettingsStore::new(SessionCounts::new(1, 1));
        store.save(&SessionCounts::new(2, 1)).unwrap();
        assert_eq!(store.load(), SessionCounts::new(2, 1));
        assert_eq!(store.save_count(), 1);
    }
}
