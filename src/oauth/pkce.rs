// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PKCE (RFC 7636) for the authorization-code flow.
//!
//! Only the S256 method exists here; `plain` gives no protection.

use base64ct::{Base64UrlUnpadded, Encoding};
use ring::rand::SecureRandom;
use sha2::{Digest, Sha256};

use super::OAuthError;

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    S256,
}

impl ChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
        }
    }
}

/// Code verifier and its S256 challenge.
#[derive(Clone)]
pub struct PkceChallenge {
    /// Kept client-side until the code exchange.
    pub verifier: String,
    /// Sent with the authorization request.
    pub challenge: String,
    pub method: ChallengeMethod,
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl PkceChallenge {
    /// 32 random bytes, base64url-encoded (43 characters).
    pub fn generate(rng: &dyn SecureRandom) -> Result<Self, OAuthError> {
        Ok(Self::from_verifier(random_token(rng)?))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
            method: ChallengeMethod::S256,
        }
    }
}

/// 32 random bytes as unpadded base64url; used for verifiers and `state`.
pub fn random_token(rng: &dyn SecureRandom) -> Result<String, OAuthError> {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| OAuthError::Transport("system randomness unavailable".into()))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// BASE64URL(SHA256(ASCII(code_verifier)))
fn compute_s256_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&hash)
}
