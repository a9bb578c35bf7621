//! Connection handshake
//!
//! The first message a peer sends is `["HELLO", mechanism, credential]`.
//! A CURVE peer is then sent `["CHALLENGE", nonce]` and must answer
//! `["PROOF", signature]`, the nonce signed with the private half of the
//! key it presented. The broker answers `["READY"]` when the peer is
//! admitted, or `["ERROR", status, reason]` before closing the connection.

use bytes::Bytes;
use std::fmt;

use crate::error::ProtocolError;
use crate::multipart::Multipart;

/// Command frame opening a handshake
pub const HELLO: &[u8] = b"HELLO";

/// Command frame carrying the nonce a CURVE peer must sign
pub const CHALLENGE: &[u8] = b"CHALLENGE";

/// Command frame carrying the signed nonce
pub const PROOF: &[u8] = b"PROOF";

/// Length of a challenge nonce in bytes
pub const NONCE_LEN: usize = 32;

/// Command frame admitting a peer
pub const READY: &[u8] = b"READY";

/// Command frame rejecting a peer
pub const ERROR: &[u8] = b"ERROR";

/// Security mechanism negotiated by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// No authentication
    Null,
    /// Asymmetric-key authentication; the credential is the peer's encoded public key
    Curve,
}

impl Mechanism {
    /// Wire name of the mechanism
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Null => "NULL",
            Mechanism::Curve => "CURVE",
        }
    }

    /// Parse the wire name of a mechanism
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        match raw {
            b"NULL" => Ok(Mechanism::Null),
            b"CURVE" => Ok(Mechanism::Curve),
            other => Err(ProtocolError::UnknownMechanism(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opening message of a handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Requested mechanism
    pub mechanism: Mechanism,
    /// Mechanism-specific credential (encoded public key for CURVE)
    pub credential: Bytes,
}

impl Hello {
    /// Unauthenticated hello
    pub fn null() -> Self {
        Self {
            mechanism: Mechanism::Null,
            credential: Bytes::new(),
        }
    }

    /// Hello presenting a public key
    pub fn curve(public_key: impl Into<String>) -> Self {
        Self {
            mechanism: Mechanism::Curve,
            credential: Bytes::from(public_key.into()),
        }
    }

    /// Encode as a multipart message
    pub fn to_message(&self) -> Multipart {
        Multipart::new()
            .with(Bytes::from_static(HELLO))
            .with(self.mechanism.as_str())
            .with(self.credential.clone())
    }

    /// Decode from a multipart message
    pub fn from_message(message: &Multipart) -> Result<Self, ProtocolError> {
        match message.frames() {
            [command, mechanism, credential] if command.as_ref() == HELLO => Ok(Self {
                mechanism: Mechanism::parse(mechanism)?,
                credential: credential.clone(),
            }),
            [command, ..] if command.as_ref() == HELLO => Err(ProtocolError::Handshake(format!(
                "expected 3 frames, got {}",
                message.len()
            ))),
            _ => Err(ProtocolError::Handshake("expected HELLO".to_string())),
        }
    }
}

/// Nonce a CURVE peer must sign before it is admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub nonce: Bytes,
}

impl Challenge {
    /// Encode as a multipart message
    pub fn to_message(&self) -> Multipart {
        Multipart::new()
            .with(Bytes::from_static(CHALLENGE))
            .with(self.nonce.clone())
    }

    /// Decode from a multipart message
    pub fn from_message(message: &Multipart) -> Result<Self, ProtocolError> {
        match message.frames() {
            [command, nonce] if command.as_ref() == CHALLENGE => {
                if nonce.len() != NONCE_LEN {
                    return Err(ProtocolError::Handshake(format!(
                        "expected {}-byte nonce, got {}",
                        NONCE_LEN,
                        nonce.len()
                    )));
                }
                Ok(Self {
                    nonce: nonce.clone(),
                })
            }
            _ => Err(ProtocolError::Handshake("expected CHALLENGE".to_string())),
        }
    }

    /// Whether a message is a challenge rather than a final reply
    pub fn is_challenge(message: &Multipart) -> bool {
        message
            .get(0)
            .map(|command| command.as_ref() == CHALLENGE)
            .unwrap_or(false)
    }
}

/// Peer answer to a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// Signature over the nonce (armored SSH signature)
    pub signature: Bytes,
}

impl Proof {
    pub fn new(signature: impl Into<Bytes>) -> Self {
        Self {
            signature: signature.into(),
        }
    }

    /// Encode as a multipart message
    pub fn to_message(&self) -> Multipart {
        Multipart::new()
            .with(Bytes::from_static(PROOF))
            .with(self.signature.clone())
    }

    /// Decode from a multipart message
    pub fn from_message(message: &Multipart) -> Result<Self, ProtocolError> {
        match message.frames() {
            [command, signature] if command.as_ref() == PROOF => Ok(Self {
                signature: signature.clone(),
            }),
            _ => Err(ProtocolError::Handshake("expected PROOF".to_string())),
        }
    }
}

/// Broker answer to a hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// Peer admitted
    Ready,
    /// Peer rejected
    Rejected {
        /// Status code ("400" for authentication failures)
        status: String,
        /// Human-readable reason
        reason: String,
    },
}

impl HandshakeReply {
    /// Encode as a multipart message
    pub fn to_message(&self) -> Multipart {
        match self {
            HandshakeReply::Ready => Multipart::new().with(Bytes::from_static(READY)),
            HandshakeReply::Rejected { status, reason } => Multipart::new()
                .with(Bytes::from_static(ERROR))
                .with(status.clone())
                .with(reason.clone()),
        }
    }

    /// Decode from a multipart message
    pub fn from_message(message: &Multipart) -> Result<Self, ProtocolError> {
        match message.frames() {
            [command] if command.as_ref() == READY => Ok(HandshakeReply::Ready),
            [command, status, reason] if command.as_ref() == ERROR => {
                Ok(HandshakeReply::Rejected {
                    status: String::from_utf8_lossy(status).into_owned(),
                    reason: String::from_utf8_lossy(reason).into_owned(),
                })
            }
            _ => Err(ProtocolError::Handshake(
                "expected READY or ERROR".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_curve_message() {
        let hello = Hello::curve("ssh-ed25519 AAAA");
        let message = hello.to_message();
        assert_eq!(message.len(), 3);
        assert_eq!(Hello::from_message(&message).unwrap(), hello);
    }

    #[test]
    fn test_hello_unknown_mechanism() {
        let message = Multipart::new().with("HELLO").with("PLAIN").with("");
        assert!(matches!(
            Hello::from_message(&message),
            Err(ProtocolError::UnknownMechanism(m)) if m == "PLAIN"
        ));
    }

    #[test]
    fn test_hello_wrong_command() {
        let message = Multipart::new().with("").with("payload");
        assert!(matches!(
            Hello::from_message(&message),
            Err(ProtocolError::Handshake(_))
        ));
    }

    #[test]
    fn test_challenge_requires_full_nonce() {
        let challenge = Challenge {
            nonce: Bytes::from(vec![7u8; NONCE_LEN]),
        };
        let message = challenge.to_message();
        assert!(Challenge::is_challenge(&message));
        assert_eq!(Challenge::from_message(&message).unwrap(), challenge);

        let short = Multipart::new().with("CHALLENGE").with("abc");
        assert!(matches!(
            Challenge::from_message(&short),
            Err(ProtocolError::Handshake(_))
        ));
        assert!(!Challenge::is_challenge(&HandshakeReply::Ready.to_message()));
    }

    #[test]
    fn test_proof_rejects_other_commands() {
        let proof = Proof::new("sig");
        assert_eq!(Proof::from_message(&proof.to_message()).unwrap(), proof);
        assert!(Proof::from_message(&Hello::null().to_message()).is_err());
    }

    #[test]
    fn test_rejected_reply() {
        let reply = HandshakeReply::Rejected {
            status: "400".to_string(),
            reason: "Incorrect pubkey".to_string(),
        };
        let decoded = HandshakeReply::from_message(&reply.to_message()).unwrap();
        assert_eq!(decoded, reply);
    }
}
