//! Broker assembly
//!
//! [`Broker::start`] starts the initial sessions, binds every endpoint and
//! spawns the gateway, the dispatch fabric, the worker pool and the
//! completion listener. The returned [`BrokerHandle`] owns those tasks.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use tg_core::{SessionCounts, SessionKind, SessionRegistry};

use crate::auth::{Admission, AuthGate};
use crate::config::BrokerConfig;
use crate::dispatch::DispatchFabric;
use crate::error::BrokerError;
use crate::gateway::{self, ConnectionTable, Endpoint, Gateway, TransportContext};
use crate::sessions::SessionCounter;
use crate::state::BrokerState;
use crate::tasks::{CompletionListener, TaskCorrelator};
use crate::worker::RequestWorker;

/// Capacity of the internal message channels
const CHANNEL_CAPACITY: usize = 1024;

/// An unstarted broker
pub struct Broker {
    config: BrokerConfig,
    registry: Arc<dyn SessionRegistry>,
}

impl Broker {
    /// Create a broker over a session registry
    pub fn new(config: BrokerConfig, registry: Arc<dyn SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Start the broker
    pub async fn start(self) -> Result<BrokerHandle, BrokerError> {
        let Broker { config, registry } = self;

        if config.socket_path.as_os_str().is_empty() {
            return Err(BrokerError::EmptySocketPath);
        }

        let mut endpoints = vec![Endpoint::Ipc(config.socket_path.clone())];
        for endpoint in &config.endpoints {
            endpoints.push(Endpoint::parse(endpoint)?);
        }

        for index in 0..config.servers as usize {
            registry.start_session(SessionKind::Server, index).await?;
        }
        for index in 0..config.clients as usize {
            registry.start_session(SessionKind::Client, index).await?;
        }
        tracing::info!(
            "Started {} client and {} server sessions",
            config.clients,
            config.servers
        );

        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let correlator = Arc::new(TaskCorrelator::new(outbound_tx.clone()));
        let (listener, listener_handle) = CompletionListener::new(Arc::clone(&correlator));
        let sessions = SessionCounter::new(
            SessionCounts::new(config.clients, config.servers),
            Arc::clone(&config.settings),
            Arc::clone(&registry),
            listener_handle,
        );
        for index in 0..config.clients as usize {
            sessions.subscribe(index);
        }
        let state = Arc::new(BrokerState::new(
            Arc::clone(&registry),
            correlator,
            sessions,
        ));

        let mut bound = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            bound.push(gateway::bind(endpoint).await?);
        }
        let addresses: Vec<String> = bound.iter().map(|b| b.address().to_string()).collect();

        let shutdown = CancellationToken::new();
        let table = Arc::new(ConnectionTable::new());
        let admission = Admission::new(
            AuthGate::new(config.client_pubkey.clone()),
            config.unauthenticated,
        );
        let context = Arc::new(TransportContext::new(
            admission,
            Arc::clone(&table),
            inbound_tx,
        ));

        let mut tasks = JoinSet::new();
        for listener in bound {
            spawn_component(
                &mut tasks,
                &shutdown,
                gateway::serve(listener, Arc::clone(&context), shutdown.clone()),
            );
        }

        let gateway = Gateway::new(inbound_rx, outbound_rx, requests_tx, Arc::clone(&table));
        spawn_component(&mut tasks, &shutdown, gateway.run(shutdown.clone()));

        let worker_count = config.worker_count();
        let (fabric, links) = DispatchFabric::new(worker_count, requests_rx, outbound_tx);
        spawn_component(&mut tasks, &shutdown, fabric.run(shutdown.clone()));
        for link in links {
            let worker = RequestWorker::new(link, Arc::clone(&state));
            spawn_component(&mut tasks, &shutdown, worker.run(shutdown.clone()));
        }

        spawn_component(&mut tasks, &shutdown, listener.run(shutdown.clone()));

        tracing::info!(
            "Broker running on {} with {} workers",
            addresses.join(", "),
            worker_count
        );

        Ok(BrokerHandle {
            state,
            shutdown,
            tasks,
            addresses,
            table,
            socket_path: config.socket_path,
        })
    }

    /// Start the broker and run it until `cancel` fires or a component fails
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BrokerError> {
        let handle = self.start().await?;
        let stopped = handle.shutdown_token();

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Broker shutting down");
                handle.shutdown();
            }
            _ = stopped.cancelled() => {}
        }

        handle.wait().await
    }
}

/// Spawn a component; a failure stops the whole broker
fn spawn_component<F>(
    tasks: &mut JoinSet<Result<(), BrokerError>>,
    shutdown: &CancellationToken,
    component: F,
) where
    F: Future<Output = Result<(), BrokerError>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tasks.spawn(async move {
        let result = component.await;
        if result.is_err() {
            shutdown.cancel();
        }
        result
    });
}

/// A running broker
pub struct BrokerHandle {
    state: Arc<BrokerState>,
    shutdown: CancellationToken,
    tasks: JoinSet<Result<(), BrokerError>>,
    addresses: Vec<String>,
    table: Arc<ConnectionTable>,
    socket_path: PathBuf,
}

impl BrokerHandle {
    /// Shared broker state
    pub fn state(&self) -> &Arc<BrokerState> {
        &self.state
    }

    /// Bound addresses, local socket first
    pub fn local_addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Number of admitted connections
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    /// Token cancelled when the broker stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask every component to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every component to stop, returning the first failure
    pub async fn wait(mut self) -> Result<(), BrokerError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => BrokerError::Task(e.to_string()),
            };
            self.shutdown.cancel();
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        #[cfg(unix)]
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!("Could not remove socket {:?}: {}", self.socket_path, e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
