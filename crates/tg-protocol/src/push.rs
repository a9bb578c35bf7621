//! Push notifications
//!
//! Unsolicited messages sent to a caller outside the request/reply cycle.
//! On the wire a push is `[connection_id, "", "PUSH", payload]`; the
//! transport strips the identity before writing to the peer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::completion::TaskId;
use crate::error::ProtocolError;
use crate::identity::ConnectionId;
use crate::multipart::Multipart;

/// Marker frame identifying a push
pub const PUSH_MARKER: &[u8] = b"PUSH";

/// Current push payload version
pub const PUSH_VERSION: u32 = 1;

/// Kind of push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushType {
    /// An asynchronous task finished
    TaskComplete,
}

/// Outcome of a finished task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    /// Task identifier
    pub id: TaskId,
    /// Whether the task succeeded
    pub result: bool,
}

/// Push payload delivered to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    /// Payload version
    pub version: u32,
    /// Push kind
    #[serde(rename = "type")]
    pub push_type: PushType,
    /// Owner identity the task belongs to
    pub id: String,
    /// Task outcome
    pub task: TaskCompletion,
}

impl PushNotification {
    /// Build a task-complete push
    pub fn task_complete(owner: impl Into<String>, task: TaskId, result: bool) -> Self {
        Self {
            version: PUSH_VERSION,
            push_type: PushType::TaskComplete,
            id: owner.into(),
            task: TaskCompletion { id: task, result },
        }
    }

    /// Serialize the payload
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize a payload
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Address the push to a connection
    pub fn into_message(self, connection: &ConnectionId) -> Result<Multipart, ProtocolError> {
        let payload = self.encode()?;
        Ok(Multipart::new()
            .with(connection.to_frame())
            .with(Bytes::new())
            .with(Bytes::from_static(PUSH_MARKER))
            .with(payload))
    }

    /// Recognize a push as received by a peer (`["", "PUSH", payload]`)
    pub fn from_peer_message(message: &Multipart) -> Option<Result<Self, ProtocolError>> {
        match message.frames() {
            [delimiter, marker, payload]
                if delimiter.is_empty() && marker.as_ref() == PUSH_MARKER =>
            {
                Some(Self::decode(payload))
            }
            _ => None,
        }
    }
}
