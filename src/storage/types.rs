// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage configuration and record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StorageError, StorageResult};
use crate::crypto::EncryptedPayload;
use crate::identity::WorkspaceRecord;

/// Maximum identifier length for collections, records and workspaces.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Local API-backed vault.
    Local,
    /// Cloud shared-drive backend.
    Cloud,
    /// Local filesystem.
    Filesystem,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Local => "local",
            StorageMode::Cloud => "cloud",
            StorageMode::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageMode::Local),
            "cloud" => Ok(StorageMode::Cloud),
            "filesystem" => Ok(StorageMode::Filesystem),
            other => Err(StorageError::UnknownMode(other.to_string())),
        }
    }
}

/// Data scope the active backend is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkspaceContext {
    /// Virtual personal scope; no persisted identifier.
    #[default]
    Personal,
    Shared {
        id: String,
        name: String,
        /// Backend-specific folder/container reference.
        container: Option<String>,
    },
}

impl WorkspaceContext {
    pub fn id(&self) -> Option<&str> {
        match self {
            WorkspaceContext::Personal => None,
            WorkspaceContext::Shared { id, .. } => Some(id),
        }
    }

    pub fn container(&self) -> Option<&str> {
        match self {
            WorkspaceContext::Personal => None,
            WorkspaceContext::Shared { container, .. } => container.as_deref(),
        }
    }

    pub fn is_personal(&self) -> bool {
        matches!(self, WorkspaceContext::Personal)
    }
}

impl From<WorkspaceRecord> for WorkspaceContext {
    fn from(record: WorkspaceRecord) -> Self {
        WorkspaceContext::Shared {
            id: record.id,
            name: record.name,
            container: record.container,
        }
    }
}

/// Active storage configuration. Only the orchestrator mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub workspace: WorkspaceContext,
    /// Backend endpoint override (vault URL, drive URL or data directory).
    pub endpoint: Option<String>,
}

impl StorageConfig {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            mode,
            workspace: WorkspaceContext::Personal,
            endpoint: None,
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace.id()
    }
}

/// Envelope every adapter persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub payload: EncryptedPayload,
    pub updated_at: DateTime<Utc>,
}

/// Identifiers must match `[A-Za-z0-9_-]{1,128}`; they become path
/// segments and URL segments.
pub fn validate_identifier(kind: &str, value: &str) -> StorageResult<()> {
    let valid = !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(format!("{kind}: {value:?}")))
    }
}
