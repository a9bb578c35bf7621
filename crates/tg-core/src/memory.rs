//! In-process session registry
//!
//! A small registry that keeps sessions in memory. It answers the
//! session-management and identity commands itself, turns the
//! long-running commands (payments, registrations, issuance) into tasks,
//! and lets the embedding code resolve those tasks and publish completion
//! events. The `taskgate` binary runs it in standalone mode and the tests
//! use it as a controllable collaborator.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use tg_protocol::{CommandKind, CompletionEvent, Multipart, RpcCommand, RpcResponse, TaskId};

use crate::error::RegistryError;
use crate::registry::{CompletionEndpoint, SessionRegistry};
use crate::types::{client_index_for_session, session_for_client, session_for_server};
use crate::types::{SessionKind, TaskStatus};

/// Completion events buffered per subscriber
const COMPLETION_BUFFER: usize = 256;

/// A running client session
struct ClientSession {
    /// Tasks minted by this session
    tasks: DashMap<TaskId, TaskStatus>,
    /// Completion event publisher
    completions: broadcast::Sender<Multipart>,
}

impl ClientSession {
    fn new() -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_BUFFER);
        Self {
            tasks: DashMap::new(),
            completions,
        }
    }

    fn publish(&self, message: Multipart) -> usize {
        // No subscribers is fine: nobody is waiting on this session yet
        self.completions.send(message).unwrap_or(0)
    }
}

/// In-memory session registry
pub struct MemoryRegistry {
    clients: RwLock<Vec<Arc<ClientSession>>>,
    servers: AtomicUsize,
    next_task: AtomicU64,
    next_nym: AtomicU64,
    executed: AtomicUsize,
    /// When set, tasks finish with this result before the queued response is returned
    instant_result: Option<bool>,
}

impl MemoryRegistry {
    /// Create an empty registry; tasks stay running until resolved explicitly
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            servers: AtomicUsize::new(0),
            next_task: AtomicU64::new(1),
            next_nym: AtomicU64::new(1),
            executed: AtomicUsize::new(0),
            instant_result: None,
        }
    }

    /// Create a registry whose tasks finish immediately, publishing their
    /// completion event before the queued response is returned
    pub fn with_instant_completion(result: bool) -> Self {
        Self {
            instant_result: Some(result),
            ..Self::new()
        }
    }

    /// Number of client sessions
    pub fn client_count(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Number of server sessions
    pub fn server_count(&self) -> usize {
        self.servers.load(Ordering::SeqCst)
    }

    /// Number of commands executed
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    fn client(&self, index: usize) -> Result<Arc<ClientSession>, RegistryError> {
        self.clients
            .read()
            .ok()
            .and_then(|clients| clients.get(index).cloned())
            .ok_or(RegistryError::SessionNotFound {
                kind: SessionKind::Client,
                index,
            })
    }

    fn ensure_clients(&self, len: usize) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        while clients.len() < len {
            clients.push(Arc::new(ClientSession::new()));
        }
    }

    fn add_client(&self) -> usize {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.push(Arc::new(ClientSession::new()));
        clients.len() - 1
    }

    /// Record a task status without publishing anything
    pub fn set_task_status(
        &self,
        client_index: usize,
        task: &TaskId,
        status: TaskStatus,
    ) -> Result<(), RegistryError> {
        self.client(client_index)?.tasks.insert(task.clone(), status);
        Ok(())
    }

    /// Finish a task and publish its completion event.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn complete_task(
        &self,
        client_index: usize,
        task: &TaskId,
        result: bool,
    ) -> Result<usize, RegistryError> {
        let session = self.client(client_index)?;
        let status = if result {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };
        session.tasks.insert(task.clone(), status);
        Ok(session.publish(CompletionEvent::new(task.clone(), result).to_message()))
    }

    /// Publish a raw message on a client session's completion channel
    pub fn publish(&self, client_index: usize, message: Multipart) -> Result<usize, RegistryError> {
        Ok(self.client(client_index)?.publish(message))
    }

    fn queue_task(&self, command: &RpcCommand) -> RpcResponse {
        let Some(index) = client_index_for_session(command.session) else {
            return RpcResponse::failed(command)
                .with_payload(serde_json::json!({ "error": "not a client session" }));
        };
        let Ok(session) = self.client(index) else {
            return RpcResponse::failed(command)
                .with_payload(serde_json::json!({ "error": "no such session" }));
        };

        let task = TaskId::new(format!(
            "task-{}",
            self.next_task.fetch_add(1, Ordering::SeqCst)
        ));

        match self.instant_result {
            Some(result) => {
                let status = if result {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                };
                session.tasks.insert(task.clone(), status);
                session.publish(CompletionEvent::new(task.clone(), result).to_message());
            }
            None => {
                session.tasks.insert(task.clone(), TaskStatus::Running);
            }
        }

        tracing::debug!("Queued {} on client session {}", task, index);
        RpcResponse::queued(command, task.0)
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRegistry for MemoryRegistry {
    async fn start_session(&self, kind: SessionKind, index: usize) -> Result<(), RegistryError> {
        match kind {
            SessionKind::Client => self.ensure_clients(index + 1),
            SessionKind::Server => {
                self.servers.fetch_max(index + 1, Ordering::SeqCst);
            }
        }
        tracing::debug!("Started {} session {}", kind, index);
        Ok(())
    }

    fn completion_endpoint(&self, client_index: usize) -> Result<CompletionEndpoint, RegistryError> {
        Ok(self.client(client_index)?.completions.subscribe())
    }

    async fn task_status(&self, client_index: usize, task: &TaskId) -> TaskStatus {
        self.client(client_index)
            .ok()
            .and_then(|session| session.tasks.get(task).map(|status| *status))
            .unwrap_or(TaskStatus::Unknown)
    }

    async fn execute(&self, command: RpcCommand) -> RpcResponse {
        self.executed.fetch_add(1, Ordering::SeqCst);

        match command.kind {
            CommandKind::AddClientSession => {
                let index = self.add_client();
                let mut response = RpcResponse::ok(&command);
                response.session = session_for_client(index);
                response
            }
            CommandKind::AddServerSession => {
                let index = self.servers.fetch_add(1, Ordering::SeqCst);
                let mut response = RpcResponse::ok(&command);
                response.session = session_for_server(index);
                response
            }
            CommandKind::ListClientSessions => {
                let sessions: Vec<i32> = (0..self.client_count()).map(session_for_client).collect();
                RpcResponse::ok(&command).with_payload(serde_json::json!({ "sessions": sessions }))
            }
            CommandKind::ListServerSessions => {
                let sessions: Vec<i32> = (0..self.server_count()).map(session_for_server).collect();
                RpcResponse::ok(&command).with_payload(serde_json::json!({ "sessions": sessions }))
            }
            CommandKind::CreateNym => {
                let count = command
                    .params
                    .get("count")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(1);
                let mut response = RpcResponse::ok(&command);
                response.identities = (0..count)
                    .map(|_| format!("nym-{}", self.next_nym.fetch_add(1, Ordering::SeqCst)))
                    .collect();
                response
            }
            CommandKind::SendPayment
            | CommandKind::MoveFunds
            | CommandKind::RegisterNym
            | CommandKind::IssueUnitDefinition => self.queue_task(&command),
            CommandKind::Error => RpcResponse::failed(&command),
            _ => RpcResponse::ok(&command).with_payload(command.params.clone()),
        }
    }
}
