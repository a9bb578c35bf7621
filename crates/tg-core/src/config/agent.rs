//! Agent settings file
//!
//! The settings file records how many sessions the agent runs, where the
//! local socket lives and which network endpoints are bound. The broker
//! rewrites it whenever a session is added.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// What to do with peers that do not negotiate the asymmetric-key mechanism
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnauthenticatedPolicy {
    /// Route them through the auth gate, which denies them
    #[default]
    Reject,
    /// Admit them without consulting the auth gate
    Admit,
}

impl FromStr for UnauthenticatedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(UnauthenticatedPolicy::Reject),
            "admit" => Ok(UnauthenticatedPolicy::Admit),
            other => Err(format!(
                "unknown policy '{}', expected 'reject' or 'admit'",
                other
            )),
        }
    }
}

/// Persistent agent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Number of client sessions
    pub clients: u32,

    /// Number of server sessions
    pub servers: u32,

    /// Local interprocess socket path
    pub socket_path: Option<PathBuf>,

    /// Additional network endpoints (`tcp://host:port`)
    pub endpoints: Vec<String>,

    /// Policy for peers that skip public-key authentication
    pub unauthenticated: UnauthenticatedPolicy,

    /// Worker pool size (defaults to available parallelism)
    pub workers: Option<usize>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            clients: 0,
            servers: 0,
            socket_path: None,
            endpoints: Vec::new(),
            unauthenticated: UnauthenticatedPolicy::default(),
            workers: None,
        }
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub clients: Option<u32>,
    pub servers: Option<u32>,
    pub socket_path: Option<PathBuf>,
    pub endpoints: Vec<String>,
    pub unauthenticated: Option<UnauthenticatedPolicy>,
    pub workers: Option<usize>,
}

/// Result of combining the settings file with command-line values
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSettings {
    /// Settings to write back to disk
    pub persisted: AgentSettings,
    /// Socket path to bind for this run
    pub socket_path: PathBuf,
}

impl AgentSettings {
    /// Combine with command-line values.
    ///
    /// Session counts take the larger of the two sources. Endpoints are the
    /// union of both, file entries first. The command-line socket path wins
    /// for this run, but a socket path already stored in the file is kept
    /// in the file.
    pub fn merge(&self, overrides: &SettingsOverrides, default_socket: PathBuf) -> MergedSettings {
        let clients = self.clients.max(overrides.clients.unwrap_or(0));
        let servers = self.servers.max(overrides.servers.unwrap_or(0));

        let mut endpoints: Vec<String> = Vec::new();
        for endpoint in self.endpoints.iter().chain(overrides.endpoints.iter()) {
            if !endpoints.contains(endpoint) {
                endpoints.push(endpoint.clone());
            }
        }

        let socket_path = overrides
            .socket_path
            .clone()
            .or_else(|| self.socket_path.clone())
            .unwrap_or(default_socket);
        let persisted_socket = self
            .socket_path
            .clone()
            .unwrap_or_else(|| socket_path.clone());

        MergedSettings {
            persisted: AgentSettings {
                clients,
                servers,
                socket_path: Some(persisted_socket),
                endpoints,
                unauthenticated: overrides.unauthenticated.unwrap_or(self.unauthenticated),
                workers: overrides.workers.or(self.workers),
            },
            socket_path,
        }
    }
}
