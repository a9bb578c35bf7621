//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message carries more frames than the codec accepts
    #[error("Too many frames: {count} exceeds maximum of {max}")]
    TooManyFrames { count: usize, max: usize },

    /// A single frame exceeds the maximum size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Handshake message could not be understood
    #[error("Malformed handshake: {0}")]
    Handshake(String),

    /// Peer asked for a security mechanism we do not know
    #[error("Unknown mechanism: {0}")]
    UnknownMechanism(String),

    /// Completion event did not have the `[task, flag]` shape
    #[error("Malformed completion event: {0}")]
    MalformedCompletion(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
