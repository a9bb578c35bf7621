//! Pending task map
//!
//! Each tracked task lives in the map from the moment its queued response
//! is seen until it resolves. Two paths may resolve it: the worker's
//! status check right after registration, or a completion event from the
//! listener. Both take the entry out of the map by value before pushing,
//! so only the path that wins the removal sends a notification.

use dashmap::DashMap;
use tokio::sync::mpsc;

use tg_protocol::{CompletionEvent, ConnectionId, Multipart, PushNotification, TaskId};

/// Who is waiting for a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTask {
    /// Connection that issued the command
    pub connection: ConnectionId,
    /// Owner identity named by the command
    pub owner: String,
}

/// Tracks outstanding tasks and emits their completion pushes
#[derive(Debug)]
pub struct TaskCorrelator {
    pending: DashMap<TaskId, PendingTask>,
    pushes: mpsc::Sender<Multipart>,
}

impl TaskCorrelator {
    /// Create a correlator sending pushes to the gateway
    pub fn new(pushes: mpsc::Sender<Multipart>) -> Self {
        Self {
            pending: DashMap::new(),
            pushes,
        }
    }

    /// Start tracking a task
    pub fn register(&self, task: TaskId, connection: ConnectionId, owner: String) {
        tracing::debug!("Tracking task {} for connection {}", task, connection);
        if let Some(previous) = self.pending.insert(task.clone(), PendingTask { connection, owner }) {
            tracing::warn!(
                "Task {} was already pending for connection {}, replaced",
                task,
                previous.connection
            );
        }
    }

    /// Take a task out of the map
    pub fn take(&self, task: &TaskId) -> Option<PendingTask> {
        self.pending.remove(task).map(|(_, pending)| pending)
    }

    /// Look at a pending task without removing it
    pub fn get(&self, task: &TaskId) -> Option<PendingTask> {
        self.pending.get(task).map(|entry| entry.value().clone())
    }

    /// Whether a task is still pending
    pub fn contains(&self, task: &TaskId) -> bool {
        self.pending.contains_key(task)
    }

    /// Number of pending tasks
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Resolve a task, pushing its outcome to the caller.
    ///
    /// Returns `false` if the task was not pending, either because it was
    /// never tracked or because another path already resolved it.
    pub async fn complete(&self, task: &TaskId, result: bool) -> bool {
        let Some(pending) = self.take(task) else {
            return false;
        };

        let push = PushNotification::task_complete(pending.owner, task.clone(), result);
        let message = match push.into_message(&pending.connection) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("Failed to encode push for task {}: {}", task, e);
                return false;
            }
        };

        tracing::debug!(
            "Task {} finished (result: {}), notifying {}",
            task,
            result,
            pending.connection
        );
        if self.pushes.send(message).await.is_err() {
            tracing::warn!("Gateway closed, push for task {} lost", task);
            return false;
        }
        true
    }

    /// Handle a raw completion event from a session.
    ///
    /// Returns whether a push was sent.
    pub async fn handle_event(&self, message: &Multipart) -> bool {
        let event = match CompletionEvent::from_message(message) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping completion event: {}", e);
                return false;
            }
        };

        if self.complete(&event.task, event.result).await {
            return true;
        }

        tracing::debug!("Completion for untracked task {}", event.task);
        false
    }
}
