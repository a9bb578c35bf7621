//! Frontend gateway
//!
//! The transport half accepts connections, runs the handshake and moves
//! frames between sockets and channels. The router half is the single loop
//! that validates inbound requests, tags them with the caller identity and
//! routes replies and pushes back to their connection.

mod router;
mod transport;

pub use router::{tag_request, Gateway};
pub use transport::{bind, serve, BoundListener, ConnectionTable, Endpoint, TransportContext};
