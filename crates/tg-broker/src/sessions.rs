//! Session count bookkeeping
//!
//! Counts only grow. Each increment happens under one mutex that is held
//! while the new counts are written to the settings store, so concurrent
//! session creations from different workers are persisted in order. The
//! write runs on the blocking pool, never on a runtime thread. A new
//! client session is then subscribed to the completion listener outside
//! the lock.

use std::sync::{Arc, Mutex};

use tg_core::{SessionCounts, SessionKind, SessionRegistry, SettingsStore};

use crate::error::BrokerError;
use crate::tasks::ListenerHandle;

/// Session counts shared by the workers
pub struct SessionCounter {
    counts: Arc<Mutex<SessionCounts>>,
    store: Arc<dyn SettingsStore>,
    registry: Arc<dyn SessionRegistry>,
    listener: ListenerHandle,
}

impl SessionCounter {
    /// Create a counter starting from `initial`
    pub fn new(
        initial: SessionCounts,
        store: Arc<dyn SettingsStore>,
        registry: Arc<dyn SessionRegistry>,
        listener: ListenerHandle,
    ) -> Self {
        Self {
            counts: Arc::new(Mutex::new(initial)),
            store,
            registry,
            listener,
        }
    }

    /// Current counts
    pub fn counts(&self) -> SessionCounts {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current number of client sessions
    pub fn client_count(&self) -> usize {
        self.counts().clients as usize
    }

    /// Record a new session, returning its index.
    ///
    /// A failed save is logged; the in-memory count still advances.
    pub async fn increment(&self, kind: SessionKind) -> Result<usize, BrokerError> {
        let counts = Arc::clone(&self.counts);
        let store = Arc::clone(&self.store);

        tokio::task::spawn_blocking(move || {
            let mut counts = counts.lock().unwrap_or_else(|e| e.into_inner());
            let index = counts.increment(kind);
            if let Err(e) = store.save(&counts) {
                tracing::error!("Failed to persist session counts: {}", e);
            }
            index
        })
        .await
        .map_err(|e| BrokerError::Task(format!("session count update failed: {}", e)))
    }

    /// Record a new session and, for client sessions, start listening to
    /// its completion events
    pub async fn add_session(&self, kind: SessionKind) -> Result<usize, BrokerError> {
        let index = self.increment(kind).await?;
        tracing::info!("Added {} session {}", kind, index);

        if kind == SessionKind::Client {
            self.subscribe(index);
        }
        Ok(index)
    }

    /// Subscribe the completion listener to a client session
    pub fn subscribe(&self, client_index: usize) {
        let endpoint = match self.registry.completion_endpoint(client_index) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(
                    "Failed to open completion endpoint of client session {}: {}",
                    client_index,
                    e
                );
                return;
            }
        };

        if let Err(e) = self.listener.subscribe(client_index, endpoint) {
            tracing::error!(
                "Failed to subscribe to client session {}: {}",
                client_index,
                e
            );
        }
    }
}
