// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Boundary
//!
//! Interfaces to the identity service endpoints this core consumes.
//!
//! ## Endpoint groups
//!
//! - [`SessionApi`]: the cookie-backed credential pair (store / load / clear)
//!   and access renewal. These calls never carry a bearer credential; the
//!   renewal source lives server-side in an HTTP-only cookie.
//! - [`KeyApi`]: personal key issuance and wrapped workspace keys.
//! - [`WorkspaceApi`]: workspace registry entries.
//!
//! Every call carries the session-scoped environment discriminator
//! (`env` query parameter). The traits are the seam the managers are
//! tested through; [`client`] holds the reqwest implementations.

use async_trait::async_trait;
use secrecy::SecretSlice;
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialError, RequestError};

pub mod client;

pub use client::{HttpIdentityClient, HttpSessionClient, IdentityEndpoints};

/// Errors raised by identity boundary calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("identity service rejected the credential")]
    Unauthorized,

    #[error("renewal source is absent or has been revoked")]
    RenewalRevoked,

    #[error("identity resource not found: {0}")]
    NotFound(String),

    #[error("identity service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("identity service unreachable: {0}")]
    Transport(String),

    #[error("identity service response was invalid: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl IdentityError {
    /// Network failures and 5xx answers are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            IdentityError::Transport(_) => true,
            IdentityError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<RequestError> for IdentityError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Credential(inner) => IdentityError::Credential(inner),
            other => IdentityError::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            IdentityError::InvalidResponse(e.to_string())
        } else {
            IdentityError::Transport(e.to_string())
        }
    }
}

/// Fresh access credential minted by the renewal endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewedAccess {
    pub access_token: String,
    /// Lifetime in seconds, when the service reports one.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// What the identity boundary knows about the current browser session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub renewal_available: bool,
    #[serde(default)]
    pub identity: Option<String>,
}

/// Workspace registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: String,
    pub name: String,
    /// Backend-specific container reference (e.g. shared drive folder).
    #[serde(default)]
    pub container: Option<String>,
}

/// Cookie-backed credential pair and renewal.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Hand the credential pair to the identity boundary for cookie storage.
    async fn store_pair(
        &self,
        access_token: &str,
        renewal_token: Option<&str>,
        expires_in: Option<u64>,
    ) -> Result<(), IdentityError>;

    /// Read back what the boundary holds (renewal presence only, never its value).
    async fn load_pair(&self) -> Result<StoredSession, IdentityError>;

    /// Drop the cookie-held pair.
    async fn clear_pair(&self) -> Result<(), IdentityError>;

    /// Mint a new access credential from the server-held renewal source.
    async fn renew_access(&self) -> Result<RenewedAccess, IdentityError>;
}

/// Key issuance.
#[async_trait]
pub trait KeyApi: Send + Sync {
    /// Raw personal key bytes for `identity`.
    async fn personal_key(&self, identity: &str) -> Result<SecretSlice<u8>, IdentityError>;

    /// Workspace key wrapped under the caller's personal key
    /// (`nonce || ciphertext || tag`).
    async fn wrapped_workspace_key(
        &self,
        workspace_id: &str,
        identity: &str,
    ) -> Result<Vec<u8>, IdentityError>;
}

/// Workspace registry lookups.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    async fn fetch_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceRecord>, IdentityError>;
}
