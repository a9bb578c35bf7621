//! Shared broker state

use std::sync::Arc;

use dashmap::DashMap;

use tg_core::SessionRegistry;
use tg_protocol::ConnectionId;

use crate::sessions::SessionCounter;
use crate::tasks::TaskCorrelator;

/// Owner identity to connection associations.
///
/// The first connection seen for an owner keeps it; later connections
/// never overwrite the association.
#[derive(Debug, Default)]
pub struct NymIndex {
    owners: DashMap<String, ConnectionId>,
}

impl NymIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an owner with a connection unless it already has one.
    ///
    /// Returns whether the association was new.
    pub fn associate(&self, owner: &str, connection: &ConnectionId) -> bool {
        if owner.is_empty() {
            return false;
        }

        let mut inserted = false;
        self.owners.entry(owner.to_string()).or_insert_with(|| {
            inserted = true;
            connection.clone()
        });
        inserted
    }

    /// Connection associated with an owner
    pub fn connection(&self, owner: &str) -> Option<ConnectionId> {
        self.owners.get(owner).map(|entry| entry.value().clone())
    }

    /// Number of known owners
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no owner is known
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// State shared by the request workers
pub struct BrokerState {
    /// Session registry commands are executed against
    pub registry: Arc<dyn SessionRegistry>,
    /// Pending task map
    pub correlator: Arc<TaskCorrelator>,
    /// Owner associations
    pub nyms: NymIndex,
    /// Session counts
    pub sessions: SessionCounter,
}

impl BrokerState {
    /// Assemble the state
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        correlator: Arc<TaskCorrelator>,
        sessions: SessionCounter,
    ) -> Self {
        Self {
            registry,
            correlator,
            nyms: NymIndex::new(),
            sessions,
        }
    }
}
