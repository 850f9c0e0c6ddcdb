// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AES-256-GCM primitives on top of `ring`.
//!
//! Nonces are 12 random bytes drawn per call; nothing here derives or
//! reuses them.

use std::fmt;
use std::sync::Arc;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::SecretSlice;

use super::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = ring::aead::NONCE_LEN;
pub const TAG_LEN: usize = 16;

/// Imported symmetric key, cheap to clone.
#[derive(Clone)]
pub struct DataKey(Arc<LessSafeKey>);

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// Result of one sealing operation.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl DataKey {
    /// Import raw AES-256 key bytes.
    pub fn import(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                raw.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, raw)
            .map_err(|_| CryptoError::InvalidKey("rejected by AES-256-GCM".into()))?;
        Ok(Self(Arc::new(LessSafeKey::new(unbound))))
    }

    /// Fresh random key; the raw bytes are returned for wrapping.
    pub fn generate(rng: &SystemRandom) -> Result<(Self, SecretSlice<u8>), CryptoError> {
        let mut raw = vec![0u8; KEY_LEN];
        rng.fill(&mut raw).map_err(|_| CryptoError::Encryption)?;
        let key = Self::import(&raw)?;
        Ok((key, SecretSlice::from(raw)))
    }

    pub fn seal(&self, rng: &dyn SecureRandom, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce).map_err(|_| CryptoError::Encryption)?;

        let mut ciphertext = plaintext.to_vec();
        let tag = self
            .0
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut ciphertext,
            )
            .map_err(|_| CryptoError::Encryption)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_ref());
        Ok(Sealed {
            nonce,
            ciphertext,
            tag: tag_bytes,
        })
    }

    /// Verify and decrypt. Any tag mismatch is [`CryptoError::DecryptionFailed`].
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if tag.len() != TAG_LEN {
            return Err(CryptoError::DecryptionFailed);
        }
        let nonce =
            Nonce::try_assume_unique_for_key(nonce).map_err(|_| CryptoError::DecryptionFailed)?;

        let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext_len = self
            .0
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::DecryptionFailed)?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }
}

/// Wrap raw key bytes under `wrapping`: `nonce || ciphertext || tag`.
pub fn wrap_key(wrapping: &DataKey, rng: &dyn SecureRandom, raw: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let sealed = wrapping.seal(rng, raw)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.ciphertext.len() + TAG_LEN);
    blob.extend_from_slice(&sealed.nonce);
    blob.extend_from_slice(&sealed.ciphertext);
    blob.extend_from_slice(&sealed.tag);
    Ok(blob)
}

/// Unwrap a `nonce || ciphertext || tag` blob and import the result.
pub fn unwrap_key(wrapping: &DataKey, blob: &[u8]) -> Result<DataKey, CryptoError> {
    if blob.len() <= NONCE_LEN + TAG_LEN {
        return Err(CryptoError::MalformedWrappedKey(blob.len()));
    }
    let (nonce, rest) = blob.split_at(NONCE_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

    let mut raw = wrapping.open(nonce, ciphertext, tag)?;
    let key = DataKey::import(&raw);
    raw.fill(0);
    key
}
