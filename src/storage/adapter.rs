// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Backend adapter seam.
//!
//! Every backend exposes the same surface; the orchestrator only ever
//! holds an `Arc<dyn StorageAdapter>`. Values cross this seam as plain
//! JSON and are sealed by a [`RecordSealer`] bound to the adapter's scope
//! before they reach the backend.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::cloud::CloudDriveAdapter;
use super::filesystem::FilesystemAdapter;
use super::local_api::LocalApiAdapter;
use super::paths::StoragePaths;
use super::types::{validate_identifier, StorageConfig, StorageMode, StoredRecord};
use super::{StorageError, StorageResult};
use crate::auth::RequestPipeline;
use crate::crypto::KeyManager;
use crate::oauth::AccessTokenSource;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// Bring the backend up. Safe to call again after [`close`](Self::close).
    async fn initialize(&self) -> StorageResult<()>;

    fn is_initialized(&self) -> bool;

    /// Identity whose keys seal this adapter's records.
    fn set_user_id(&self, user_id: &str);

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>>;

    async fn put(&self, collection: &str, id: &str, value: &Value) -> StorageResult<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool>;

    /// Record ids in a collection.
    async fn list(&self, collection: &str) -> StorageResult<Vec<String>>;

    /// Whether writes are buffered locally and not yet on the backend.
    fn has_unsynced_changes(&self) -> bool;

    /// Flush buffered writes.
    async fn sync(&self) -> StorageResult<()>;

    /// Stop or resume taking writes. While frozen, `put` and `delete` fail
    /// with [`StorageError::WritesFrozen`]; once this returns, every write
    /// already accepted is covered by the next `sync`. Write-through
    /// backends have nothing to drain and keep the default.
    fn freeze_writes(&self, _frozen: bool) {}

    /// Release resources. Buffered writes are not flushed here.
    async fn close(&self) -> StorageResult<()>;
}

/// Seals and opens records for one scope.
pub struct RecordSealer {
    keys: Arc<KeyManager>,
    workspace_id: Option<String>,
    user_id: RwLock<Option<String>>,
}

impl RecordSealer {
    pub fn new(keys: Arc<KeyManager>, workspace_id: Option<String>) -> Self {
        Self {
            keys,
            workspace_id,
            user_id: RwLock::new(None),
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn set_user_id(&self, user_id: &str) {
        *self.user_id.write().unwrap_or_else(PoisonError::into_inner) = Some(user_id.to_string());
    }

    fn identity(&self) -> StorageResult<String> {
        self.user_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StorageError::MissingIdentity)
    }

    pub async fn seal(&self, collection: &str, id: &str, value: &Value) -> StorageResult<StoredRecord> {
        validate_identifier("collection", collection)?;
        validate_identifier("id", id)?;
        let identity = self.identity()?;
        let payload = self
            .keys
            .encrypt(value, &identity, self.workspace_id())
            .await?;
        Ok(StoredRecord {
            id: id.to_string(),
            collection: collection.to_string(),
            workspace_id: self.workspace_id.clone(),
            payload,
            updated_at: Utc::now(),
        })
    }

    pub async fn open(&self, record: &StoredRecord) -> StorageResult<Value> {
        let identity = self.identity()?;
        Ok(self
            .keys
            .decrypt(&record.payload, &identity, self.workspace_id())
            .await?)
    }
}

/// Builds an adapter for a configuration.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &StorageConfig) -> StorageResult<Arc<dyn StorageAdapter>>;
}

/// Default endpoints for the three backends.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub vault_url: String,
    pub drive_url: String,
    pub data_dir: PathBuf,
    pub auto_sync_interval: Duration,
}

/// Production factory: one adapter type per mode.
pub struct BackendFactory {
    keys: Arc<KeyManager>,
    pipeline: RequestPipeline,
    settings: BackendSettings,
    drive_tokens: Option<Arc<dyn AccessTokenSource>>,
}

impl BackendFactory {
    pub fn new(keys: Arc<KeyManager>, pipeline: RequestPipeline, settings: BackendSettings) -> Self {
        Self {
            keys,
            pipeline,
            settings,
            drive_tokens: None,
        }
    }

    /// Access-token source for the cloud backend (the OAuth flow).
    pub fn with_drive_tokens(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.drive_tokens = Some(tokens);
        self
    }
}

impl AdapterFactory for BackendFactory {
    fn create(&self, config: &StorageConfig) -> StorageResult<Arc<dyn StorageAdapter>> {
        let workspace_id = config.workspace_id().map(str::to_string);
        if let Some(id) = &workspace_id {
            validate_identifier("workspace", id)?;
        }
        let sealer = RecordSealer::new(Arc::clone(&self.keys), workspace_id);

        let adapter: Arc<dyn StorageAdapter> = match config.mode {
            StorageMode::Local => Arc::new(LocalApiAdapter::new(
                config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| self.settings.vault_url.clone()),
                self.pipeline.clone(),
                sealer,
            )),
            StorageMode::Filesystem => {
                let root = config
                    .endpoint
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.settings.data_dir.clone());
                Arc::new(FilesystemAdapter::new(StoragePaths::new(root), sealer))
            }
            StorageMode::Cloud => {
                let tokens = self.drive_tokens.clone().ok_or_else(|| StorageError::Backend {
                    status: None,
                    message: "cloud storage requires OAuth configuration".to_string(),
                })?;
                Arc::new(CloudDriveAdapter::new(
                    config
                        .endpoint
                        .clone()
                        .unwrap_or_else(|| self.settings.drive_url.clone()),
                    config.workspace.container().map(str::to_string),
                    self.pipeline.http().clone(),
                    tokens,
                    sealer,
                    self.settings.auto_sync_interval,
                ))
            }
        };
        Ok(adapter)
    }
}
