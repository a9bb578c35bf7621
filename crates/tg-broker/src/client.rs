//! Broker client
//!
//! A minimal caller: connects, performs the handshake (signing the broker's
//! nonce when authenticating with a key), sends commands and collects replies. Pushes that arrive while waiting for a reply are kept
//! and handed out by [`BrokerClient::next_push`].

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use tg_core::config::KeyPair;
use tg_protocol::{
    Challenge, HandshakeReply, Hello, Multipart, MultipartCodec, Proof, PushNotification,
    RpcCommand, RpcResponse,
};

use crate::error::BrokerError;

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// How a client authenticates
#[derive(Debug, Clone)]
pub enum Credentials {
    /// No authentication
    Null,
    /// Present the public half and sign the broker's nonce with the private half
    Curve(KeyPair),
}

impl Credentials {
    fn hello(&self) -> Hello {
        match self {
            Credentials::Null => Hello::null(),
            Credentials::Curve(pair) => Hello::curve(pair.public.clone()),
        }
    }
}

/// Something received from the broker
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// A reply (`["", response]` for well-formed requests)
    Reply(Multipart),
    /// A push notification
    Push(PushNotification),
}

/// Connection to a running broker
pub struct BrokerClient {
    framed: Framed<Box<dyn Connection>, MultipartCodec>,
    pushes: VecDeque<PushNotification>,
}

impl BrokerClient {
    /// Connect over the local socket
    #[cfg(unix)]
    pub async fn connect_unix(
        path: impl AsRef<std::path::Path>,
        credentials: Credentials,
    ) -> Result<Self, BrokerError> {
        let stream = tokio::net::UnixStream::connect(path.as_ref()).await?;
        Self::handshake(Box::new(stream), credentials).await
    }

    /// Connect over TCP (`host:port`, with or without a `tcp://` prefix)
    pub async fn connect_tcp(
        address: &str,
        credentials: Credentials,
    ) -> Result<Self, BrokerError> {
        let address = address.strip_prefix("tcp://").unwrap_or(address);
        let stream = tokio::net::TcpStream::connect(address).await?;
        Self::handshake(Box::new(stream), credentials).await
    }

    async fn handshake(
        stream: Box<dyn Connection>,
        credentials: Credentials,
    ) -> Result<Self, BrokerError> {
        let mut framed = Framed::new(stream, MultipartCodec::new());
        framed.send(credentials.hello().to_message()).await?;

        let mut reply = framed.next().await.ok_or(BrokerError::ConnectionClosed)??;
        if Challenge::is_challenge(&reply) {
            let Credentials::Curve(pair) = &credentials else {
                return Err(BrokerError::UnexpectedMessage(
                    "challenge for an unauthenticated hello".to_string(),
                ));
            };
            let challenge = Challenge::from_message(&reply)?;
            let signature = pair.sign(&challenge.nonce)?;
            framed.send(Proof::new(signature).to_message()).await?;
            reply = framed.next().await.ok_or(BrokerError::ConnectionClosed)??;
        }
        match HandshakeReply::from_message(&reply)? {
            HandshakeReply::Ready => Ok(Self {
                framed,
                pushes: VecDeque::new(),
            }),
            HandshakeReply::Rejected { status, reason } => {
                Err(BrokerError::Rejected { status, reason })
            }
        }
    }

    /// Send a raw message
    pub async fn send_raw(&mut self, message: Multipart) -> Result<(), BrokerError> {
        self.framed.send(message).await?;
        Ok(())
    }

    /// Receive the next message, push or reply
    pub async fn recv(&mut self) -> Result<Incoming, BrokerError> {
        let message = self
            .framed
            .next()
            .await
            .ok_or(BrokerError::ConnectionClosed)??;

        match PushNotification::from_peer_message(&message) {
            Some(push) => Ok(Incoming::Push(push?)),
            None => Ok(Incoming::Reply(message)),
        }
    }

    /// Send a command and wait for its response, keeping any pushes seen meanwhile
    pub async fn request(&mut self, command: &RpcCommand) -> Result<RpcResponse, BrokerError> {
        let message = Multipart::new().with(Bytes::new()).with(command.encode()?);
        self.send_raw(message).await?;

        loop {
            match self.recv().await? {
                Incoming::Push(push) => self.pushes.push_back(push),
                Incoming::Reply(reply) => {
                    let [delimiter, body] = reply.frames() else {
                        return Err(BrokerError::UnexpectedMessage(format!(
                            "reply with {} frames",
                            reply.len()
                        )));
                    };
                    if !delimiter.is_empty() {
                        return Err(BrokerError::UnexpectedMessage(
                            "reply without delimiter".to_string(),
                        ));
                    }
                    return Ok(RpcResponse::decode(body)?);
                }
            }
        }
    }

    /// Next push notification, waiting for one if none is buffered
    pub async fn next_push(&mut self) -> Result<PushNotification, BrokerError> {
        if let Some(push) = self.pushes.pop_front() {
            return Ok(push);
        }

        match self.recv().await? {
            Incoming::Push(push) => Ok(push),
            Incoming::Reply(reply) => Err(BrokerError::UnexpectedMessage(format!(
                "reply with {} frames while waiting for a push",
                reply.len()
            ))),
        }
    }

    /// Pushes received but not yet taken
    pub fn buffered_pushes(&self) -> usize {
        self.pushes.len()
    }
}
