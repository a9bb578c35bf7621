//! Connection authentication
//!
//! Every handshake passes through [`Admission`], which either admits the
//! peer directly (non-CURVE peers under the `admit` policy) or asks the
//! [`AuthGate`] for a decision.

mod gate;

pub use gate::{AuthGate, AuthReply, AuthRequest, AuthStatus};

use tg_core::config::UnauthenticatedPolicy;
use tg_protocol::{Hello, Mechanism};

/// Handshake admission policy
#[derive(Debug, Clone)]
pub struct Admission {
    gate: AuthGate,
    policy: UnauthenticatedPolicy,
}

impl Admission {
    /// Create an admission policy around a gate
    pub fn new(gate: AuthGate, policy: UnauthenticatedPolicy) -> Self {
        Self { gate, policy }
    }

    /// Decide whether a peer may connect
    pub fn decide(&self, hello: &Hello) -> AuthReply {
        if hello.mechanism != Mechanism::Curve && self.policy == UnauthenticatedPolicy::Admit {
            tracing::debug!("Admitting {} peer without authentication", hello.mechanism.as_str());
            return AuthReply::success();
        }

        self.gate.check(&AuthRequest::from(hello))
    }
}
