//! Session registry interface
//!
//! The registry owns the running sessions and interprets RPC commands. The
//! broker only drives it through this trait: it never looks inside a
//! session.

use async_trait::async_trait;
use tokio::sync::broadcast;

use tg_protocol::{Multipart, RpcCommand, RpcResponse, TaskId};

use crate::error::RegistryError;
use crate::types::{SessionKind, TaskStatus};

/// Subscription to a client session's completion events (`[task_id, flag]`)
pub type CompletionEndpoint = broadcast::Receiver<Multipart>;

/// Running sessions and the command interpreter behind them
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Start session `index` of the given kind
    async fn start_session(&self, kind: SessionKind, index: usize) -> Result<(), RegistryError>;

    /// Subscribe to completion events of client session `client_index`
    fn completion_endpoint(&self, client_index: usize) -> Result<CompletionEndpoint, RegistryError>;

    /// Current status of a task owned by client session `client_index`
    async fn task_status(&self, client_index: usize, task: &TaskId) -> TaskStatus;

    /// Execute a command
    async fn execute(&self, command: RpcCommand) -> RpcResponse;
}
