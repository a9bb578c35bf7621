//! Completion listener
//!
//! One task drains the completion streams of every client session. New
//! sessions are added at runtime through a [`ListenerHandle`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;

use tg_core::CompletionEndpoint;
use tg_protocol::Multipart;

use super::correlator::TaskCorrelator;
use crate::error::BrokerError;

enum ListenerCommand {
    Subscribe {
        client_index: usize,
        endpoint: CompletionEndpoint,
    },
}

/// Adds subscriptions to a running [`CompletionListener`]
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    control: mpsc::UnboundedSender<ListenerCommand>,
}

impl ListenerHandle {
    /// Listen to a client session's completion events
    pub fn subscribe(
        &self,
        client_index: usize,
        endpoint: CompletionEndpoint,
    ) -> Result<(), BrokerError> {
        self.control
            .send(ListenerCommand::Subscribe {
                client_index,
                endpoint,
            })
            .map_err(|_| BrokerError::ChannelClosed("completion listener"))
    }
}

/// Multiplexes completion streams into the task correlator
pub struct CompletionListener {
    control: mpsc::UnboundedReceiver<ListenerCommand>,
    streams: StreamMap<usize, BroadcastStream<Multipart>>,
    correlator: Arc<TaskCorrelator>,
}

impl CompletionListener {
    /// Create a listener and the handle used to feed it subscriptions
    pub fn new(correlator: Arc<TaskCorrelator>) -> (Self, ListenerHandle) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let listener = Self {
            control: control_rx,
            streams: StreamMap::new(),
            correlator,
        };
        (listener, ListenerHandle { control: control_tx })
    }

    /// Run until cancelled
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), BrokerError> {
        tracing::debug!("Completion listener started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(command) = self.control.recv() => match command {
                    ListenerCommand::Subscribe { client_index, endpoint } => {
                        tracing::debug!("Listening for completions of client session {}", client_index);
                        self.streams.insert(client_index, BroadcastStream::new(endpoint));
                    }
                },

                Some((client_index, item)) = self.streams.next(), if !self.streams.is_empty() => match item {
                    Ok(message) => {
                        self.correlator.handle_event(&message).await;
                    }
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        tracing::warn!(
                            "Completion stream of client session {} lagged, {} events lost",
                            client_index,
                            missed
                        );
                    }
                },
            }
        }

        tracing::debug!("Completion listener stopped");
        Ok(())
    }
}
