// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Envelope Encryption
//!
//! AES-256-GCM encryption of structured payloads under two key scopes.
//!
//! ## Key hierarchy
//!
//! ```text
//! identity boundary ──► personal key (per user, issued raw over TLS)
//!                            │ unwraps
//!                            ▼
//!                      workspace key (per shared workspace, distributed
//!                                     as nonce || ciphertext || tag)
//! ```
//!
//! Only the personal key ever leaves the identity boundary unencrypted.
//! Both scopes are cached in memory for [`crate::config::KEY_CACHE_TTL`];
//! workspace entries are invalidated on every workspace switch.

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityError;

pub mod aead;
pub mod keys;

pub use aead::{unwrap_key, wrap_key, DataKey, Sealed};
pub use keys::KeyManager;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    #[error("failed to fetch key material: {0}")]
    KeyFetch(#[from] IdentityError),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("payload (de)serialization failed: {0}")]
    Serialization(String),

    #[error("encryption failed")]
    Encryption,

    /// Tag mismatch: the data was tampered with or the key is wrong.
    #[error("decryption failed: data may be corrupted or key invalid")]
    DecryptionFailed,

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("wrapped key blob is malformed ({0} bytes)")]
    MalformedWrappedKey(usize),

    #[error("key task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for CryptoError {
    fn from(e: tokio::task::JoinError) -> Self {
        CryptoError::Task(e.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::Serialization(e.to_string())
    }
}

/// Output of [`KeyManager::encrypt`]; each part travels as its own base64 field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
}

impl From<Sealed> for EncryptedPayload {
    fn from(sealed: Sealed) -> Self {
        Self {
            ciphertext: Base64::encode_string(&sealed.ciphertext),
            nonce: Base64::encode_string(&sealed.nonce),
            tag: Base64::encode_string(&sealed.tag),
        }
    }
}

pub(crate) fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    Base64::decode_vec(value).map_err(|e| CryptoError::Encoding(format!("{name}: {e}")))
}
