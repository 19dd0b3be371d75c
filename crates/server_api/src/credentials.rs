//! Operator credentials: PBKDF2-HMAC-SHA256 password hashes and the
//! immutable user directory built at startup.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

pub const HASH_SCHEME: &str = "pbkdf2-sha256";
pub const DEFAULT_ROUNDS: u32 = 100_000;
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("malformed password hash: {0}")]
    MalformedHash(&'static str),
    #[error("username must not be empty")]
    EmptyUsername,
}

/// `pbkdf2-sha256$<rounds>$<salt>$<key>`, salt and key in unpadded base64.
pub fn hash_password(password: &str) -> String {
    hash_password_with_rounds(password, DEFAULT_ROUNDS)
}

pub fn hash_password_with_rounds(password: &str, rounds: u32) -> String {
    let salt = Uuid::new_v4();
    let key = derive(password, salt.as_bytes(), rounds);
    format!(
        "{HASH_SCHEME}${rounds}${}${}",
        STANDARD_NO_PAD.encode(salt.as_bytes()),
        STANDARD_NO_PAD.encode(key)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    rounds: u32,
    salt: Vec<u8>,
    key: Vec<u8>,
}

impl PasswordHash {
    pub fn parse(encoded: &str) -> Result<Self, CredentialError> {
        let mut parts = encoded.trim().split('$');
        if parts.next() != Some(HASH_SCHEME) {
            return Err(CredentialError::MalformedHash("unknown scheme"));
        }
        let rounds = parts
            .next()
            .and_then(|rounds| rounds.parse::<u32>().ok())
            .filter(|rounds| *rounds > 0)
            .ok_or(CredentialError::MalformedHash("invalid rounds"))?;
        let salt = parts
            .next()
            .and_then(|salt| STANDARD_NO_PAD.decode(salt).ok())
            .filter(|salt| !salt.is_empty())
            .ok_or(CredentialError::MalformedHash("invalid salt"))?;
        let key = parts
            .next()
            .and_then(|key| STANDARD_NO_PAD.decode(key).ok())
            .filter(|key| key.len() == KEY_LEN)
            .ok_or(CredentialError::MalformedHash("invalid key"))?;
        if parts.next().is_some() {
            return Err(CredentialError::MalformedHash("trailing fields"));
        }
        Ok(Self { rounds, salt, key })
    }

    pub fn verify(&self, password: &str) -> bool {
        let candidate = derive(password, &self.salt, self.rounds);
        constant_time_eq(&candidate, &self.key)
    }
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds, &mut key);
    key
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, PasswordHash>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, encoded_hash: &str) -> Result<Self, CredentialError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(CredentialError::EmptyUsername);
        }
        let hash = PasswordHash::parse(encoded_hash)?;
        self.users.insert(username.to_string(), hash);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|hash| hash.verify(password))
    }
}

#[cfg(test)]
#[path = "tests/credentials_tests.rs"]
mod tests;
