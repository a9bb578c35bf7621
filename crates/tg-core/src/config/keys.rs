//! Broker keypairs
//!
//! The broker holds two Ed25519 keypairs: its own server pair and the pair
//! a trusted caller uses to authenticate. Both are stored in OpenSSH
//! encoding in a JSON key file readable only by the owner. Missing pairs
//! are generated on first start.
//!
//! A caller proves it holds the client private key by signing the
//! handshake nonce with [`KeyPair::sign`]; the broker checks the signature
//! with [`verify_signature`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Namespace bound into every handshake signature
pub const SIGNATURE_NAMESPACE: &str = "taskgate-handshake";

/// An encoded keypair
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// OpenSSH-encoded private key
    pub private: String,
    /// OpenSSH-encoded public key
    pub public: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &fingerprint(&self.public))
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair
    pub fn generate() -> Result<Self, ConfigError> {
        let key = ssh_key::PrivateKey::random(&mut rand::rngs::OsRng, ssh_key::Algorithm::Ed25519)
            .map_err(|e| ConfigError::Key(format!("Failed to generate keypair: {}", e)))?;

        let public = key
            .public_key()
            .to_openssh()
            .map_err(|e| ConfigError::Key(format!("Failed to encode public key: {}", e)))?;
        let private = key
            .to_openssh(ssh_key::LineEnding::LF)
            .map_err(|e| ConfigError::Key(format!("Failed to encode private key: {}", e)))?;

        Self::checked(String::clone(&private), public)
    }

    /// Build a pair from freshly encoded halves, refusing empty output
    fn checked(private: String, public: String) -> Result<Self, ConfigError> {
        let pair = Self { private, public };
        if pair.is_empty() {
            return Err(ConfigError::Key("generated keypair is empty".to_string()));
        }
        Ok(pair)
    }

    /// Sign `message` with the private half, returning an armored SSH signature
    pub fn sign(&self, message: &[u8]) -> Result<String, ConfigError> {
        let key = ssh_key::PrivateKey::from_openssh(self.private.as_bytes())
            .map_err(|e| ConfigError::Key(format!("Failed to decode private key: {}", e)))?;
        let signature = key
            .sign(SIGNATURE_NAMESPACE, ssh_key::HashAlg::Sha512, message)
            .map_err(|e| ConfigError::Key(format!("Failed to sign: {}", e)))?;
        signature
            .to_pem(ssh_key::LineEnding::LF)
            .map_err(|e| ConfigError::Key(format!("Failed to encode signature: {}", e)))
    }

    /// Whether either half is missing
    pub fn is_empty(&self) -> bool {
        self.private.trim().is_empty() || self.public.trim().is_empty()
    }
}

/// Short SHA-256 fingerprint of an encoded key, safe to log
pub fn fingerprint(encoded: &str) -> String {
    let digest = Sha256::digest(encoded.trim().as_bytes());
    format!("SHA256:{}", hex::encode(&digest[..8]))
}

/// Whether `signature` is a valid signature of `message` by `public`.
///
/// Undecodable keys or signatures count as invalid.
pub fn verify_signature(public: &str, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = ssh_key::PublicKey::from_openssh(public.trim()) else {
        return false;
    };
    let Ok(signature) = ssh_key::SshSig::from_pem(signature) else {
        return false;
    };

    match key.verify(SIGNATURE_NAMESPACE, message, &signature) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Signature by {} rejected: {}", fingerprint(public), e);
            false
        }
    }
}

/// On-disk key file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_privkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_privkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_pubkey: Option<String>,
}

fn pair(private: &Option<String>, public: &Option<String>) -> Option<KeyPair> {
    match (private, public) {
        (Some(private), Some(public)) => {
            let pair = KeyPair {
                private: private.clone(),
                public: public.clone(),
            };
            (!pair.is_empty()).then_some(pair)
        }
        _ => None,
    }
}

impl KeyFile {
    /// Read a key file; a missing or unreadable file yields an empty one
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Key file {:?} is not valid JSON, ignoring: {}", path, e);
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read key file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Write the key file with owner-only permissions
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Invalid(format!("Failed to create key dir: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Key(format!("Failed to encode key file: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| ConfigError::Invalid(format!("Failed to write key file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| ConfigError::Invalid(format!("Failed to restrict key file: {}", e)))?;
        }

        Ok(())
    }

    /// Stored server pair, if complete
    pub fn server_pair(&self) -> Option<KeyPair> {
        pair(&self.server_privkey, &self.server_pubkey)
    }

    /// Stored client pair, if complete
    pub fn client_pair(&self) -> Option<KeyPair> {
        pair(&self.client_privkey, &self.client_pubkey)
    }
}

/// Keys the broker runs with
#[derive(Debug, Clone)]
pub struct BrokerKeys {
    pub server: KeyPair,
    pub client: KeyPair,
}

/// Load both keypairs, generating whichever is missing, and write the file back
pub fn load_or_generate_keys(path: &Path) -> Result<BrokerKeys, ConfigError> {
    let file = KeyFile::load(path);

    let server = match file.server_pair() {
        Some(pair) => pair,
        None => {
            tracing::info!("Generating new server keypair");
            KeyPair::generate()?
        }
    };

    let client = match file.client_pair() {
        Some(pair) => pair,
        None => {
            tracing::info!("Generating new client keypair");
            KeyPair::generate()?
        }
    };

    KeyFile {
        server_privkey: Some(server.private.clone()),
        server_pubkey: Some(server.public.clone()),
        client_privkey: Some(client.private.clone()),
        client_pubkey: Some(client.public.clone()),
    }
    .save(path)?;

    tracing::info!(
        "Server key {}, client key {}",
        fingerprint(&server.public),
        fingerprint(&client.public)
    );

    Ok(BrokerKeys { server, client })
}
