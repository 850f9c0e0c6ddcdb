// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory access credential.
//!
//! The bearer string is wrapped in a [`SecretString`] so it is redacted
//! from `Debug` output and zeroed on drop. It is never serialized.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Claims read from a JWT access credential.
///
/// Only used to derive the expiry instant; the signature is verified by
/// the services that accept the credential, not by this client.
#[derive(Debug, Clone, Deserialize)]
struct CredentialClaims {
    /// Subject (user ID)
    #[serde(default)]
    sub: Option<String>,
    /// Expiration timestamp
    #[serde(default)]
    exp: Option<i64>,
}

/// Short-lived bearer credential with its derived expiry.
#[derive(Debug, Clone)]
pub struct AccessCredential {
    token: Arc<SecretString>,
    expires_at: DateTime<Utc>,
    subject: Option<String>,
}

impl AccessCredential {
    /// Create a credential with an explicit expiry.
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: Arc::new(SecretString::from(token.into())),
            expires_at,
            subject: None,
        }
    }

    /// Create a credential, deriving its expiry.
    ///
    /// Resolution order: the JWT `exp` claim, then `expires_in` seconds
    /// from now, then `fallback_ttl` from now (opaque tokens).
    pub fn from_token(
        token: impl Into<String>,
        expires_in: Option<u64>,
        fallback_ttl: Duration,
    ) -> Self {
        let token = token.into();
        let now = Utc::now();
        let claims = decode_claims(&token);

        let from_claims = claims
            .as_ref()
            .and_then(|c| c.exp)
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0));
        // Out-of-range lifetimes fall through to the fallback.
        let from_lifetime = expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta));
        let expires_at = from_claims.or(from_lifetime).unwrap_or_else(|| {
            TimeDelta::from_std(fallback_ttl)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(now)
        });

        Self {
            token: Arc::new(SecretString::from(token)),
            expires_at,
            subject: claims.and_then(|c| c.sub),
        }
    }

    /// The bearer string. Keep the borrow short; never log it.
    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `sub` claim, when the credential is a JWT carrying one.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Time left before expiry at `now` (zero once expired).
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn remaining(&self) -> Duration {
        self.remaining_at(Utc::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Whether two handles carry the same bearer string.
    pub fn same_token(&self, other: &AccessCredential) -> bool {
        Arc::ptr_eq(&self.token, &other.token) || self.expose() == other.expose()
    }
}

/// Decode JWT claims without signature verification.
fn decode_claims(token: &str) -> Option<CredentialClaims> {
    if token.split('.').count() != 3 {
        return None;
    }
    jsonwebtoken::dangerous::insecure_decode::<CredentialClaims>(token)
        .ok()
        .map(|data| data.claims)
}
