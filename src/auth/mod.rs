//! Authentication module
//!
//! Bearer tokens and salted password hashes for the accounts that back
//! caller identity.

pub mod accounts;

use rand::Rng;
use sha2::{Digest, Sha256};

/// A fresh 256-bit token, hex encoded
pub fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    let mut hasher = Sha256::new();
    hasher.update(random_bytes);
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Salt and hash stored for a password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    pub salt: String,
    pub hash: String,
}

impl PasswordHash {
    /// Hash a password under a new random salt
    pub fn create(password: &str) -> Self {
        let salt_bytes: [u8; 16] = rand::rng().random();
        let salt = hex::encode(salt_bytes);
        let hash = digest(password, &salt);
        Self { salt, hash }
    }

    pub fn verify(&self, password: &str) -> bool {
        digest(password, &self.salt) == self.hash
    }
}

fn digest(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Pull the token out of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
