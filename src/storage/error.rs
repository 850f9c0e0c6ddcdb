// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage error type.

use std::io;

use super::types::StorageMode;
use crate::auth::RequestError;
use crate::crypto::CryptoError;
use crate::identity::IdentityError;
use crate::oauth::OAuthError;

/// Error type for storage routing and adapter operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error during file operations
    Io(io::Error),
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
    /// Entity not found
    NotFound(String),
    /// Orchestrator or adapter used before `initialize`
    NotInitialized,
    /// Identifier outside `[A-Za-z0-9_-]{1,128}`
    InvalidIdentifier(String),
    /// Unrecognized storage mode string
    UnknownMode(String),
    /// Requested mode conflicts with the deployment constraint
    ModeNotAllowed {
        requested: StorageMode,
        allowed: StorageMode,
    },
    /// Target workspace is not in the registry
    WorkspaceNotFound(String),
    /// Pending writes could not be flushed; the switch was aborted
    SyncBeforeSwitchFailed(String),
    /// Adapter is draining for a transition and takes no more writes
    WritesFrozen,
    /// No user identity bound to the adapter
    MissingIdentity,
    /// Payload encryption/decryption failure
    Crypto(CryptoError),
    /// Identity boundary failure (registry lookups)
    Identity(IdentityError),
    /// Backend rejected or failed the call
    Backend { status: Option<u16>, message: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::Json(e) => write!(f, "JSON error: {e}"),
            StorageError::NotFound(entity) => write!(f, "Not found: {entity}"),
            StorageError::NotInitialized => write!(f, "Storage not initialized"),
            StorageError::InvalidIdentifier(msg) => write!(f, "Invalid identifier: {msg}"),
            StorageError::UnknownMode(mode) => write!(f, "Unknown storage mode: {mode}"),
            StorageError::ModeNotAllowed { requested, allowed } => write!(
                f,
                "Storage mode {requested} not allowed, deployment requires {allowed}"
            ),
            StorageError::WorkspaceNotFound(id) => write!(f, "Workspace not found: {id}"),
            StorageError::SyncBeforeSwitchFailed(msg) => {
                write!(f, "Failed to sync pending changes before switching: {msg}")
            }
            StorageError::WritesFrozen => write!(f, "Storage is switching, write rejected"),
            StorageError::MissingIdentity => write!(f, "No user identity bound to storage"),
            StorageError::Crypto(e) => write!(f, "{e}"),
            StorageError::Identity(e) => write!(f, "{e}"),
            StorageError::Backend {
                status: Some(status),
                message,
            } => write!(f, "Backend error (HTTP {status}): {message}"),
            StorageError::Backend {
                status: None,
                message,
            } => write!(f, "Backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Json(e) => Some(e),
            StorageError::Crypto(e) => Some(e),
            StorageError::Identity(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e)
    }
}

impl From<CryptoError> for StorageError {
    fn from(e: CryptoError) -> Self {
        StorageError::Crypto(e)
    }
}

impl From<IdentityError> for StorageError {
    fn from(e: IdentityError) -> Self {
        StorageError::Identity(e)
    }
}

impl From<RequestError> for StorageError {
    fn from(e: RequestError) -> Self {
        StorageError::Backend {
            status: None,
            message: e.to_string(),
        }
    }
}

impl From<OAuthError> for StorageError {
    fn from(e: OAuthError) -> Self {
        StorageError::Backend {
            status: None,
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Backend {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
