//! tg-protocol: Wire protocol for the taskgate broker
//!
//! This crate defines the multipart framing used on every broker socket,
//! the connection handshake, the JSON RPC payloads the broker inspects,
//! completion events published by sessions and the push notifications
//! delivered back to callers.

pub mod codec;
pub mod completion;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod multipart;
pub mod push;
pub mod rpc;

pub use codec::{MultipartCodec, MAX_FRAMES, MAX_FRAME_SIZE};
pub use completion::{CompletionEvent, TaskId};
pub use error::ProtocolError;
pub use handshake::{Challenge, HandshakeReply, Hello, Mechanism, Proof, NONCE_LEN};
pub use identity::ConnectionId;
pub use multipart::Multipart;
pub use push::{PushNotification, PushType, TaskCompletion, PUSH_MARKER};
pub use rpc::{CommandKind, RpcCommand, RpcResponse, RpcStatus, RPC_VERSION};
