//! RPC payloads exchanged with session workers
//!
//! Commands and responses are JSON documents. The broker only looks at
//! three fields: the command `kind`, the target `session` and the response
//! `status`. Everything else rides along in `params` / `payload` and is
//! interpreted by the session registry alone.
//!
//! Sessions are numbered so that client sessions occupy even numbers and
//! server sessions odd numbers: client index `i` is session `2 * i`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Current RPC payload version
pub const RPC_VERSION: u32 = 1;

/// Command kinds understood by the session registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    AddClientSession,
    AddServerSession,
    ListClientSessions,
    ListServerSessions,
    ImportHdSeed,
    ListHdSeeds,
    GetHdSeed,
    CreateNym,
    ListNyms,
    GetNym,
    AddClaim,
    DeleteClaim,
    ImportServerContract,
    ListServerContracts,
    RegisterNym,
    CreateUnitDefinition,
    ListUnitDefinitions,
    IssueUnitDefinition,
    CreateAccount,
    ListAccounts,
    GetAccountBalance,
    GetAccountActivity,
    SendPayment,
    MoveFunds,
    AddContact,
    ListContacts,
    GetContact,
    AddContactClaim,
    DeleteContactClaim,
    VerifyClaim,
    AcceptVerification,
    SendContactMessage,
    GetContactActivity,
    /// Reply kind for commands that could not be parsed
    Error,
}

impl CommandKind {
    /// Whether the command starts a new client session
    pub fn creates_client_session(&self) -> bool {
        matches!(self, CommandKind::AddClientSession)
    }

    /// Whether the command starts a new server session
    pub fn creates_server_session(&self) -> bool {
        matches!(self, CommandKind::AddServerSession)
    }

    /// Whether a successful response lists newly created owner identities
    pub fn creates_identity(&self) -> bool {
        matches!(self, CommandKind::CreateNym)
    }
}

/// Outcome reported by the session registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcStatus {
    /// Completed synchronously
    Ok,
    /// Failed
    Failed,
    /// Accepted; completion will be signalled later under `task`
    Queued,
}

/// A command sent by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCommand {
    /// Payload version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Caller-chosen correlation cookie, echoed in the response
    #[serde(default)]
    pub cookie: String,
    /// Command kind
    pub kind: CommandKind,
    /// Target session (-1 when not session-specific)
    #[serde(default = "no_session")]
    pub session: i32,
    /// Owner identity issuing the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Command arguments, opaque to the broker
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

fn default_version() -> u32 {
    RPC_VERSION
}

fn no_session() -> i32 {
    -1
}

impl RpcCommand {
    /// Create a command targeting a session
    pub fn new(kind: CommandKind, session: i32) -> Self {
        Self {
            version: RPC_VERSION,
            cookie: String::new(),
            kind,
            session,
            owner: None,
            params: serde_json::Value::Null,
        }
    }

    /// Set the owner identity
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the correlation cookie
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = cookie.into();
        self
    }

    /// Set the arguments
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Serialize the command
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize a command
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// A response produced by the session registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Payload version
    pub version: u32,
    /// Cookie copied from the command
    #[serde(default)]
    pub cookie: String,
    /// Kind of the command this answers
    pub kind: CommandKind,
    /// Session the command targeted (or created)
    pub session: i32,
    /// Outcome
    pub status: RpcStatus,
    /// Task identifier when `status` is `Queued`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Owner identities created by the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
    /// Result data, opaque to the broker
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl RpcResponse {
    fn reply(command: &RpcCommand, status: RpcStatus) -> Self {
        Self {
            version: command.version,
            cookie: command.cookie.clone(),
            kind: command.kind,
            session: command.session,
            status,
            task: None,
            identities: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// Successful response to a command
    pub fn ok(command: &RpcCommand) -> Self {
        Self::reply(command, RpcStatus::Ok)
    }

    /// Failed response to a command
    pub fn failed(command: &RpcCommand) -> Self {
        Self::reply(command, RpcStatus::Failed)
    }

    /// Queued response carrying the task identifier
    pub fn queued(command: &RpcCommand, task: impl Into<String>) -> Self {
        let mut response = Self::reply(command, RpcStatus::Queued);
        response.task = Some(task.into());
        response
    }

    /// Response for a command that could not be parsed
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: RPC_VERSION,
            cookie: String::new(),
            kind: CommandKind::Error,
            session: no_session(),
            status: RpcStatus::Failed,
            task: None,
            identities: Vec::new(),
            payload: serde_json::json!({ "error": message.into() }),
        }
    }

    /// Attach result data
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether the response announces an asynchronous task
    pub fn is_queued(&self) -> bool {
        self.status == RpcStatus::Queued
    }

    /// Serialize the response
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Deserialize a response
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(raw)?)
    }
}
