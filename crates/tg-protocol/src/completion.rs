//! Task completion events
//!
//! Each running client session publishes `[task_id, result_flag]` when an
//! asynchronous task finishes. `result_flag` is exactly one raw byte
//! (zero = failed, anything else = succeeded).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;
use crate::multipart::Multipart;

/// Width of the raw result flag
pub const RESULT_FLAG_SIZE: usize = 1;

/// Identifier minted by a session for an asynchronous operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new task ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A task finished inside a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    /// Task that finished
    pub task: TaskId,
    /// Whether it succeeded
    pub result: bool,
}

impl CompletionEvent {
    /// Create a new completion event
    pub fn new(task: impl Into<TaskId>, result: bool) -> Self {
        Self {
            task: task.into(),
            result,
        }
    }

    /// Encode as `[task_id, flag]`
    pub fn to_message(&self) -> Multipart {
        Multipart::new()
            .with(self.task.0.clone())
            .with(Bytes::copy_from_slice(&[u8::from(self.result)]))
    }

    /// Decode from `[task_id, flag]`
    pub fn from_message(message: &Multipart) -> Result<Self, ProtocolError> {
        let [task, flag] = message.frames() else {
            return Err(ProtocolError::MalformedCompletion(format!(
                "expected 2 frames, got {}",
                message.len()
            )));
        };

        if flag.len() != RESULT_FLAG_SIZE {
            return Err(ProtocolError::MalformedCompletion(format!(
                "result flag is {} bytes, expected {}",
                flag.len(),
                RESULT_FLAG_SIZE
            )));
        }

        let task = std::str::from_utf8(task)
            .map_err(|_| ProtocolError::MalformedCompletion("task id is not UTF-8".to_string()))?;
        if task.is_empty() {
            return Err(ProtocolError::MalformedCompletion(
                "empty task id".to_string(),
            ));
        }

        Ok(Self {
            task: TaskId::new(task),
            result: flag[0] != 0,
        })
    }
}
