//! Connection identities

use bytes::Bytes;
use std::fmt;

/// Opaque routing token assigned by the transport to each connected peer.
///
/// Lives as long as the connection. The broker never parses it; it is only
/// compared and used as the leading frame of outbound messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Bytes);

impl ConnectionId {
    /// Mint a fresh random identity
    pub fn generate() -> Self {
        Self(Bytes::copy_from_slice(uuid::Uuid::new_v4().as_bytes()))
    }

    /// Raw identity bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Identity as a frame
    pub fn to_frame(&self) -> Bytes {
        self.0.clone()
    }
}

impl From<Bytes> for ConnectionId {
    fn from(frame: Bytes) -> Self {
        Self(frame)
    }
}

impl From<&'static str> for ConnectionId {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}
