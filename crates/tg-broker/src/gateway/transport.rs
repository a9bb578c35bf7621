//! Socket transport
//!
//! Each accepted connection gets its own task. The task runs the handshake
//! (CURVE peers must sign a fresh nonce before admission is decided),
//! registers an outbound queue under a fresh [`ConnectionId`], prefixes every
//! inbound message with that identity and writes outbound messages (already
//! stripped of the identity) to the socket.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use tg_core::config::verify_signature;
use tg_protocol::{
    Challenge, ConnectionId, HandshakeReply, Hello, Mechanism, Multipart, MultipartCodec, Proof,
    NONCE_LEN,
};

use crate::auth::Admission;
use crate::error::BrokerError;

/// Outbound messages buffered per connection
const CONNECTION_BUFFER: usize = 256;

/// Status sent when the hello cannot be decoded or the key proof fails
const MALFORMED_HELLO_STATUS: &str = "400";

/// Reason sent when a CURVE peer fails to prove it holds its key
const INVALID_PROOF_REASON: &str = "Invalid key proof";

/// Address the gateway listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket
    Ipc(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl Endpoint {
    /// Parse `tcp://host:port` or `ipc://path`
    pub fn parse(endpoint: &str) -> Result<Self, BrokerError> {
        if let Some(address) = endpoint.strip_prefix("tcp://") {
            if address.is_empty() || !address.contains(':') {
                return Err(BrokerError::InvalidEndpoint(endpoint.to_string()));
            }
            return Ok(Endpoint::Tcp(address.to_string()));
        }

        if let Some(path) = endpoint.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(BrokerError::InvalidEndpoint(endpoint.to_string()));
            }
            return Ok(Endpoint::Ipc(PathBuf::from(path)));
        }

        Err(BrokerError::InvalidEndpoint(endpoint.to_string()))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Tcp(address) => write!(f, "tcp://{}", address),
        }
    }
}

/// Live connections by identity
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: DashMap<ConnectionId, mpsc::Sender<Multipart>>,
}

impl ConnectionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound queue of a connection
    pub fn register(&self, id: ConnectionId, outbound: mpsc::Sender<Multipart>) {
        self.connections.insert(id, outbound);
    }

    /// Forget a connection
    pub fn remove(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Route `[identity, frames...]` to its connection.
    ///
    /// Returns whether the message was queued. Unknown identities are
    /// dropped silently; this is the normal fate of replies to callers that
    /// already disconnected.
    pub fn deliver(&self, message: Multipart) -> bool {
        let Some((identity, rest)) = message.split_first() else {
            tracing::debug!("Dropping outbound message without identity");
            return false;
        };

        let id = ConnectionId::from(identity);
        let Some(outbound) = self.connections.get(&id).map(|entry| entry.value().clone()) else {
            tracing::debug!("No live connection {}, dropping message", id);
            return false;
        };

        match outbound.try_send(rest) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue of connection {} is full, dropping message", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Connection {} is closing, dropping message", id);
                false
            }
        }
    }
}

/// Shared state of every connection task
pub struct TransportContext {
    admission: Admission,
    table: Arc<ConnectionTable>,
    inbound: mpsc::Sender<Multipart>,
}

impl TransportContext {
    /// Create the context
    pub fn new(
        admission: Admission,
        table: Arc<ConnectionTable>,
        inbound: mpsc::Sender<Multipart>,
    ) -> Self {
        Self {
            admission,
            table,
            inbound,
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A bound, not yet serving, listener
pub struct BoundListener {
    listener: Listener,
    address: String,
}

impl BoundListener {
    /// Address actually bound (resolves `:0` ports)
    pub fn address(&self) -> &str {
        &self.address
    }
}

/// Bind an endpoint
pub async fn bind(endpoint: &Endpoint) -> Result<BoundListener, BrokerError> {
    match endpoint {
        Endpoint::Tcp(address) => {
            let listener = TcpListener::bind(address)
                .await
                .map_err(|source| BrokerError::Bind {
                    address: endpoint.to_string(),
                    source,
                })?;
            let local = listener.local_addr()?;
            Ok(BoundListener {
                listener: Listener::Tcp(listener),
                address: format!("tcp://{}", local),
            })
        }
        Endpoint::Ipc(path) => bind_unix(endpoint, path),
    }
}

#[cfg(unix)]
fn bind_unix(endpoint: &Endpoint, path: &std::path::Path) -> Result<BoundListener, BrokerError> {
    let bind_error = |source| BrokerError::Bind {
        address: endpoint.to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(bind_error)?;
    }

    // A socket file left by a previous run makes bind fail
    if path.exists() {
        tracing::debug!("Removing stale socket {:?}", path);
        std::fs::remove_file(path).map_err(bind_error)?;
    }

    let listener = UnixListener::bind(path).map_err(bind_error)?;
    Ok(BoundListener {
        listener: Listener::Unix(listener),
        address: endpoint.to_string(),
    })
}

#[cfg(not(unix))]
fn bind_unix(endpoint: &Endpoint, _path: &std::path::Path) -> Result<BoundListener, BrokerError> {
    Err(BrokerError::UnsupportedEndpoint(endpoint.to_string()))
}

/// Accept connections until cancelled
pub async fn serve(
    bound: BoundListener,
    context: Arc<TransportContext>,
    cancel: CancellationToken,
) -> Result<(), BrokerError> {
    tracing::info!("Gateway listening on {}", bound.address);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Listener on {} shutting down", bound.address);
                break;
            }

            accepted = accept(&bound.listener) => match accepted {
                Ok(stream) => {
                    let context = Arc::clone(&context);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = stream.handle(context, cancel).await {
                            tracing::warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection on {}: {}", bound.address, e);
                }
            }
        }
    }

    Ok(())
}

enum Accepted {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Accepted {
    async fn handle(
        self,
        context: Arc<TransportContext>,
        cancel: CancellationToken,
    ) -> Result<(), BrokerError> {
        match self {
            Accepted::Tcp(stream) => handle_connection(stream, context, cancel).await,
            #[cfg(unix)]
            Accepted::Unix(stream) => handle_connection(stream, context, cancel).await,
        }
    }
}

async fn accept(listener: &Listener) -> std::io::Result<Accepted> {
    match listener {
        Listener::Tcp(listener) => {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!("Accepted TCP connection from {}", peer);
            Ok(Accepted::Tcp(stream))
        }
        #[cfg(unix)]
        Listener::Unix(listener) => {
            let (stream, _) = listener.accept().await?;
            tracing::debug!("Accepted local connection");
            Ok(Accepted::Unix(stream))
        }
    }
}

async fn handle_connection<S>(
    stream: S,
    context: Arc<TransportContext>,
    cancel: CancellationToken,
) -> Result<(), BrokerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, MultipartCodec::new());

    let first = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        first = framed.next() => first,
    };
    let first = match first {
        Some(message) => message?,
        None => return Ok(()),
    };

    let hello = match Hello::from_message(&first) {
        Ok(hello) => hello,
        Err(e) => {
            tracing::warn!("Failed to decode handshake: {}", e);
            let reply = HandshakeReply::Rejected {
                status: MALFORMED_HELLO_STATUS.to_string(),
                reason: e.to_string(),
            };
            framed.send(reply.to_message()).await?;
            return Ok(());
        }
    };

    if hello.mechanism == Mechanism::Curve {
        let proven = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            proven = prove_key_ownership(&mut framed, &hello) => proven?,
        };
        if !proven {
            tracing::warn!("Peer failed to prove ownership of its public key");
            let reply = HandshakeReply::Rejected {
                status: MALFORMED_HELLO_STATUS.to_string(),
                reason: INVALID_PROOF_REASON.to_string(),
            };
            framed.send(reply.to_message()).await?;
            return Ok(());
        }
    }

    let decision = context.admission.decide(&hello);
    if !decision.is_allowed() {
        let reply = HandshakeReply::Rejected {
            status: decision.status.code().to_string(),
            reason: decision.reason,
        };
        framed.send(reply.to_message()).await?;
        return Ok(());
    }
    framed.send(HandshakeReply::Ready.to_message()).await?;

    let id = ConnectionId::generate();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(CONNECTION_BUFFER);
    context.table.register(id.clone(), outbound_tx);
    tracing::debug!("Connection {} admitted ({})", id, hello.mechanism.as_str());

    let (mut sink, mut source) = framed.split();
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),

            inbound = source.next() => match inbound {
                Some(Ok(mut message)) => {
                    message.push_front(id.to_frame());
                    if context.inbound.send(message).await.is_err() {
                        break Err(BrokerError::ChannelClosed("gateway inbound"));
                    }
                }
                Some(Err(e)) => break Err(e.into()),
                None => break Ok(()),
            },

            outbound = outbound_rx.recv() => match outbound {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        break Err(e.into());
                    }
                }
                None => break Ok(()),
            },
        }
    };

    context.table.remove(&id);
    tracing::debug!("Connection {} closed", id);
    result
}

/// Send a nonce and check the peer's signature over it against the key it claimed
async fn prove_key_ownership<S>(
    framed: &mut Framed<S, MultipartCodec>,
    hello: &Hello,
) -> Result<bool, BrokerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce: [u8; NONCE_LEN] = rand::random();
    let challenge = Challenge {
        nonce: bytes::Bytes::copy_from_slice(&nonce),
    };
    framed.send(challenge.to_message()).await?;

    let answer = match framed.next().await {
        Some(message) => message?,
        None => return Err(BrokerError::ConnectionClosed),
    };
    let proof = match Proof::from_message(&answer) {
        Ok(proof) => proof,
        Err(e) => {
            tracing::debug!("Malformed proof: {}", e);
            return Ok(false);
        }
    };

    let Ok(public) = std::str::from_utf8(&hello.credential) else {
        return Ok(false);
    };
    Ok(verify_signature(public, &nonce, &proof.signature))
}
