//! Request worker
//!
//! A worker takes one tagged request at a time from the dispatch fabric,
//! executes it against the session registry and hands the reply back.
//! Around the call it records owner associations, counts new sessions and
//! starts tracking queued tasks.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use tg_core::types::client_index_for_session;
use tg_core::SessionKind;
use tg_protocol::{ConnectionId, Multipart, RpcCommand, RpcResponse, RpcStatus, TaskId};

use crate::dispatch::{WorkerEvent, WorkerId, WorkerLink};
use crate::error::BrokerError;
use crate::state::BrokerState;

/// One member of the worker pool
pub struct RequestWorker {
    id: WorkerId,
    state: Arc<BrokerState>,
    link: WorkerLink,
}

impl RequestWorker {
    /// Create a worker on its fabric link
    pub fn new(link: WorkerLink, state: Arc<BrokerState>) -> Self {
        Self {
            id: link.id,
            state,
            link,
        }
    }

    /// Serve requests until cancelled.
    ///
    /// A queued response naming something other than a live client session
    /// is fatal: the worker cancels `cancel` and returns the error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerError> {
        if self.link.events.send(WorkerEvent::Ready(self.id)).await.is_err() {
            return Ok(());
        }

        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = self.link.jobs.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let reply = match handle_request(&self.state, request).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("Worker {} hit a fatal error: {}", self.id, e);
                    cancel.cancel();
                    return Err(e);
                }
            };

            let done = WorkerEvent::Done {
                worker: self.id,
                reply,
            };
            if self.link.events.send(done).await.is_err() {
                break;
            }
        }

        tracing::debug!("Worker {} stopped", self.id);
        Ok(())
    }
}

/// Handle a tagged request `[envelope..., "", command, identity]`.
///
/// The reply is the envelope (everything up to and including the first
/// empty frame) followed by the response. Requests without that delimiter
/// get no reply.
pub async fn handle_request(
    state: &BrokerState,
    request: Multipart,
) -> Result<Option<Multipart>, BrokerError> {
    let frames = request.frames();
    let Some(delimiter) = frames.iter().position(|frame| frame.is_empty()) else {
        tracing::warn!("Dropping request without envelope delimiter");
        return Ok(None);
    };

    // A command frame must sit between the delimiter and the trailing
    // identity frame the gateway appended
    if delimiter + 2 >= frames.len() {
        tracing::warn!("Dropping request without command");
        return Ok(None);
    }
    let command = &frames[delimiter + 1];
    let identity = &frames[frames.len() - 1];

    let connection = ConnectionId::from(identity.clone());
    let response = process(state, command, &connection).await?;

    let mut reply = Multipart::from_frames(frames[..=delimiter].to_vec());
    reply.push(response);
    Ok(Some(reply))
}

/// Execute one raw command on behalf of `connection`, returning the raw response
pub async fn process(
    state: &BrokerState,
    raw: &[u8],
    connection: &ConnectionId,
) -> Result<Bytes, BrokerError> {
    let command = match RpcCommand::decode(raw) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!("Invalid command from {}: {}", connection, e);
            return Ok(RpcResponse::error(format!("Invalid command: {}", e)).encode()?);
        }
    };

    let kind = command.kind;
    let owner = command.owner.clone().unwrap_or_default();
    state.nyms.associate(&owner, connection);

    tracing::debug!("Executing {:?} on session {}", kind, command.session);
    let response = state.registry.execute(command).await;

    if response.status != RpcStatus::Failed {
        if kind.creates_client_session() {
            state.sessions.add_session(SessionKind::Client).await?;
        } else if kind.creates_server_session() {
            state.sessions.add_session(SessionKind::Server).await?;
        }
    }

    if kind.creates_identity() {
        for identity in &response.identities {
            state.nyms.associate(identity, connection);
        }
    }

    if response.is_queued() {
        track_task(state, &response, owner, connection).await?;
    }

    Ok(response.encode()?)
}

async fn track_task(
    state: &BrokerState,
    response: &RpcResponse,
    owner: String,
    connection: &ConnectionId,
) -> Result<(), BrokerError> {
    let Some(task) = response.task.as_deref().filter(|task| !task.is_empty()) else {
        tracing::warn!("Queued response without a task id, not tracking");
        return Ok(());
    };

    let client_index = client_index_for_session(response.session)
        .filter(|index| *index < state.sessions.client_count())
        .ok_or(BrokerError::InvalidClientSession {
            session: response.session,
        })?;

    let task = TaskId::new(task);
    state
        .correlator
        .register(task.clone(), connection.clone(), owner);

    // The task may have finished before it was registered, in which case
    // its completion event is already gone
    let status = state.registry.task_status(client_index, &task).await;
    if let Some(result) = status.outcome() {
        if state.correlator.complete(&task, result).await {
            tracing::debug!("Task {} resolved by status check", task);
        }
    }

    Ok(())
}
