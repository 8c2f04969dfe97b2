//! Login secrets and their stored digests.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;

/// A plaintext login secret. Never printed, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Salted SHA-256 digest of a [`Secret`], hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretDigest {
    pub salt: String,
    pub hash: String,
}

impl SecretDigest {
    /// Digest `secret` under a fresh random salt.
    pub fn new(secret: &Secret) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let hash = hex::encode(digest(&salt, secret));
        Self { salt, hash }
    }

    /// Check a candidate secret against this digest in constant time.
    ///
    /// A stored hash that is not valid hex never verifies.
    pub fn verify(&self, candidate: &Secret) -> bool {
        let Ok(stored) = hex::decode(&self.hash) else {
            return false;
        };
        stored
            .as_slice()
            .ct_eq(digest(&self.salt, candidate).as_slice())
            .into()
    }
}

fn digest(salt: &str, secret: &Secret) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.expose().as_bytes());
    hasher.finalize().to_vec()
}
