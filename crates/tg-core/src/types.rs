//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionKind {
    /// Client-role session; owns tasks and publishes completions
    Client,
    /// Server-role session
    Server,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Client => write!(f, "client"),
            SessionKind::Server => write!(f, "server"),
        }
    }
}

/// Map a session number to a client index.
///
/// Client sessions use even numbers (`index * 2`); anything negative or odd
/// is not a client session.
pub fn client_index_for_session(session: i32) -> Option<usize> {
    if session < 0 || session % 2 != 0 {
        return None;
    }
    usize::try_from(session / 2).ok()
}

/// Session number of a client index
pub fn session_for_client(index: usize) -> i32 {
    (index as i32) * 2
}

/// Session number of a server index
pub fn session_for_server(index: usize) -> i32 {
    (index as i32) * 2 + 1
}

/// Number of client and server sessions started so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    /// Client sessions
    pub clients: u32,
    /// Server sessions
    pub servers: u32,
}

impl SessionCounts {
    /// Create counts
    pub fn new(clients: u32, servers: u32) -> Self {
        Self { clients, servers }
    }

    /// Count for one kind
    pub fn get(&self, kind: SessionKind) -> u32 {
        match kind {
            SessionKind::Client => self.clients,
            SessionKind::Server => self.servers,
        }
    }

    /// Bump the count for `kind`, returning the index of the new session
    pub fn increment(&mut self, kind: SessionKind) -> usize {
        let slot = match kind {
            SessionKind::Client => &mut self.clients,
            SessionKind::Server => &mut self.servers,
        };
        let index = *slot as usize;
        *slot += 1;
        index
    }
}

/// Status of an asynchronous task as seen by its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Still executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// The session does not know the task
    Unknown,
}

impl TaskStatus {
    /// Final outcome, if the task has finished
    pub fn outcome(&self) -> Option<bool> {
        match self {
            TaskStatus::Succeeded => Some(true),
            TaskStatus::Failed => Some(false),
            TaskStatus::Running | TaskStatus::Unknown => None,
        }
    }
}
