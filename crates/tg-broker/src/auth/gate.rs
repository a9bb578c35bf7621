//! Credential check for handshaking peers

use bytes::Bytes;

use tg_protocol::{Hello, Mechanism};

/// Outcome code of an authentication request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Peer admitted
    Success,
    /// Peer denied
    AuthFailure,
}

impl AuthStatus {
    /// Status code sent to the peer
    pub fn code(&self) -> &'static str {
        match self {
            AuthStatus::Success => "200",
            AuthStatus::AuthFailure => "400",
        }
    }
}

/// What a handshaking peer claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Negotiated mechanism
    pub mechanism: Mechanism,
    /// Encoded public key (empty unless CURVE)
    pub public_key: Bytes,
}

impl From<&Hello> for AuthRequest {
    fn from(hello: &Hello) -> Self {
        Self {
            mechanism: hello.mechanism,
            public_key: hello.credential.clone(),
        }
    }
}

/// Gate decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    /// Outcome
    pub status: AuthStatus,
    /// Human-readable reason
    pub reason: String,
}

impl AuthReply {
    /// Admission reply
    pub fn success() -> Self {
        Self {
            status: AuthStatus::Success,
            reason: "OK".to_string(),
        }
    }

    /// Denial reply
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: AuthStatus::AuthFailure,
            reason: reason.into(),
        }
    }

    /// Whether the peer may connect
    pub fn is_allowed(&self) -> bool {
        self.status == AuthStatus::Success
    }
}

/// Admits CURVE peers presenting the expected client key
#[derive(Debug, Clone)]
pub struct AuthGate {
    expected: String,
}

impl AuthGate {
    /// Create a gate expecting `client_pubkey`
    pub fn new(client_pubkey: impl Into<String>) -> Self {
        Self {
            expected: client_pubkey.into(),
        }
    }

    /// Check a request
    pub fn check(&self, request: &AuthRequest) -> AuthReply {
        if request.mechanism != Mechanism::Curve {
            tracing::info!(
                "Denied {} peer: unsupported mechanism",
                request.mechanism.as_str()
            );
            return AuthReply::failure("Unsupported mechanism");
        }

        if request.public_key.as_ref() != self.expected.as_bytes() {
            tracing::info!("Denied CURVE peer: incorrect public key");
            return AuthReply::failure("Incorrect pubkey");
        }

        AuthReply::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(key: &str) -> AuthRequest {
        AuthRequest::from(&Hello::curve(key))
    }

    #[test]
    fn test_expected_key_admitted() {
        let reply = AuthGate::new("ssh-ed25519 AAAAgood").check(&curve("ssh-ed25519 AAAAgood"));
        assert_eq!(reply.status, AuthStatus::Success);
        assert_eq!(reply.reason, "OK");
        assert_eq!(reply.status.code(), "200");
    }

    #[test]
    fn test_wrong_key_denied() {
        let reply = AuthGate::new("ssh-ed25519 AAAAgood").check(&curve("ssh-ed25519 AAAAbad"));
        assert_eq!(reply.status, AuthStatus::AuthFailure);
        assert_eq!(reply.reason, "Incorrect pubkey");
        assert_eq!(reply.status.code(), "400");
    }

    #[test]
    fn test_empty_key_denied() {
        let reply = AuthGate::new("ssh-ed25519 AAAAgood").check(&curve(""));
        assert_eq!(reply.reason, "Incorrect pubkey");
    }

    #[test]
    fn test_null_mechanism_denied() {
        let reply = AuthGate::new("ssh-ed25519 AAAAgood").check(&AuthRequest::from(&Hello::null()));
        assert_eq!(reply.status, AuthStatus::AuthFailure);
        assert_eq!(reply.reason, "Unsupported mechanism");
    }
}
