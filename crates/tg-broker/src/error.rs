//! Broker error types

use thiserror::Error;

use tg_core::{ConfigError, RegistryError};
use tg_protocol::ProtocolError;

/// Errors raised by the broker and its client
#[derive(Error, Debug)]
pub enum BrokerError {
    /// A listening address could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// No local socket path configured
    #[error("Socket path is empty")]
    EmptySocketPath,

    /// Endpoint string could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Endpoint kind not available on this platform
    #[error("Unsupported endpoint: {0}")]
    UnsupportedEndpoint(String),

    /// A queued response named a session that is not a live client session
    #[error("Queued response names invalid client session {session}")]
    InvalidClientSession { session: i32 },

    /// Session registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Key material could not be used
    #[error("Key error: {0}")]
    Key(#[from] ConfigError),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The broker refused the handshake
    #[error("Connection rejected ({status}): {reason}")]
    Rejected { status: String, reason: String },

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer sent something we did not expect
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// An internal channel was closed
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// A broker task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
