//! Broker configuration

use std::path::PathBuf;
use std::sync::Arc;

use tg_core::config::UnauthenticatedPolicy;
use tg_core::SettingsStore;

/// Everything the broker needs to start
///
/// Built once by the caller and moved into [`crate::Broker::new`].
#[derive(Clone)]
pub struct BrokerConfig {
    /// Local interprocess socket
    pub socket_path: PathBuf,
    /// Additional endpoints (`tcp://host:port` or `ipc://path`)
    pub endpoints: Vec<String>,
    /// Encoded public key a CURVE peer must present
    pub client_pubkey: String,
    /// Handling of peers that do not negotiate CURVE
    pub unauthenticated: UnauthenticatedPolicy,
    /// Worker pool size override
    pub workers: Option<usize>,
    /// Client sessions to start
    pub clients: u32,
    /// Server sessions to start
    pub servers: u32,
    /// Where session counts are persisted
    pub settings: Arc<dyn SettingsStore>,
}

impl BrokerConfig {
    /// Create a config with no sessions, no extra endpoints and the default policy
    pub fn new(
        socket_path: impl Into<PathBuf>,
        client_pubkey: impl Into<String>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            endpoints: Vec::new(),
            client_pubkey: client_pubkey.into(),
            unauthenticated: UnauthenticatedPolicy::default(),
            workers: None,
            clients: 0,
            servers: 0,
            settings,
        }
    }

    /// Add a network endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Set the unauthenticated-peer policy
    pub fn with_policy(mut self, policy: UnauthenticatedPolicy) -> Self {
        self.unauthenticated = policy;
        self
    }

    /// Fix the worker pool size
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the initial session counts
    pub fn with_sessions(mut self, clients: u32, servers: u32) -> Self {
        self.clients = clients;
        self.servers = servers;
        self
    }

    /// Number of request workers to run
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("socket_path", &self.socket_path)
            .field("endpoints", &self.endpoints)
            .field("unauthenticated", &self.unauthenticated)
            .field("workers", &self.workers)
            .field("clients", &self.clients)
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_core::MemorySettingsStore;

    fn config() -> BrokerConfig {
        BrokerConfig::new(
            "/tmp/taskgate-test.sock",
            "key",
            Arc::new(MemorySettingsStore::default()),
        )
    }

    #[test]
    fn test_worker_count_override() {
        assert_eq!(config().with_workers(4).worker_count(), 4);
    }

    #[test]
    fn test_worker_count_never_zero() {
        assert!(config().with_workers(0).worker_count() >= 1);
        assert!(config().worker_count() >= 1);
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.unauthenticated, UnauthenticatedPolicy::Reject);
        assert!(config.endpoints.is_empty());
        assert_eq!((config.clients, config.servers), (0, 0));
    }
}
