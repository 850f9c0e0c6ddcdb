// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Filesystem backend.
//!
//! One JSON file per sealed record:
//!
//! ```text
//! {data_dir}/
//!   personal/{collection}/{id}.json
//!   workspaces/{workspace_id}/{collection}/{id}.json
//! ```
//!
//! Writes go to a temp file and are renamed into place, so a record file is
//! either the old or the new version, never a partial one. Each write gets
//! its own temp name; concurrent writers to one record only race on the
//! rename. Writes are immediate; this adapter never holds unsynced changes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use super::adapter::{RecordSealer, StorageAdapter};
use super::paths::StoragePaths;
use super::types::{validate_identifier, StorageMode, StoredRecord};
use super::{StorageError, StorageResult};

pub struct FilesystemAdapter {
    paths: StoragePaths,
    sealer: RecordSealer,
    initialized: AtomicBool,
}

impl FilesystemAdapter {
    pub fn new(paths: StoragePaths, sealer: RecordSealer) -> Self {
        Self {
            paths,
            sealer,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    fn record_path(&self, collection: &str, id: &str) -> StorageResult<PathBuf> {
        validate_identifier("collection", collection)?;
        validate_identifier("id", id)?;
        Ok(self.paths.record(self.sealer.workspace_id(), collection, id))
    }
}

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// `{dir}/.{file}.{pid}.{seq}.tmp`, unique per write in this process.
fn temp_path(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

async fn read_record(path: &Path) -> StorageResult<Option<StoredRecord>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

async fn write_record(path: &Path, record: &StoredRecord) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let body = serde_json::to_vec_pretty(record)?;

    // Write to temp file first, then rename for atomicity
    let temp_path = temp_path(path);
    let written = match fs::write(&temp_path, &body).await {
        Ok(()) => fs::rename(&temp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&temp_path).await {
            if cleanup.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove temp record file");
            }
        }
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl StorageAdapter for FilesystemAdapter {
    fn mode(&self) -> StorageMode {
        StorageMode::Filesystem
    }

    async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(self.paths.scope_dir(self.sealer.workspace_id())).await?;
        self.initialized.store(true, Ordering::SeqCst);
        debug!(
            root = %self.paths.root().display(),
            workspace_id = ?self.sealer.workspace_id(),
            "Filesystem storage initialized"
        );
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn set_user_id(&self, user_id: &str) {
        self.sealer.set_user_id(user_id);
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        self.ensure_initialized()?;
        let path = self.record_path(collection, id)?;
        match read_record(&path).await? {
            Some(record) => Ok(Some(self.sealer.open(&record).await?)),
            None => Ok(None),
        }
    }

    async fn put(&self, collection: &str, id: &str, value: &Value) -> StorageResult<()> {
        self.ensure_initialized()?;
        let path = self.record_path(collection, id)?;
        let record = self.sealer.seal(collection, id, value).await?;
        write_record(&path, &record).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        let path = self.record_path(collection, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;
        validate_identifier("collection", collection)?;
        let dir = self
            .paths
            .collection_dir(self.sealer.workspace_id(), collection);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Skips in-flight temp files too.
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn has_unsynced_changes(&self) -> bool {
        false
    }

    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyManager;
    use crate::testing::FakeKeys;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn adapter(dir: &TempDir, keys: Arc<FakeKeys>, workspace: Option<&str>) -> FilesystemAdapter {
        let sealer = RecordSealer::new(
            Arc::new(KeyManager::new(keys)),
            workspace.map(str::to_string),
        );
        let adapter = FilesystemAdapter::new(StoragePaths::new(dir.path()), sealer);
        adapter.set_user_id("user_1");
        adapter.initialize().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let adapter = adapter(&dir, Arc::new(FakeKeys::new()), None).await;

        adapter
            .put("conversations", "c1", &json!({"title": "hello"}))
            .await
            .unwrap();
        assert_eq!(
            adapter.get("conversations", "c1").await.unwrap(),
            Some(json!({"title": "hello"}))
        );
        assert_eq!(adapter.list("conversations").await.unwrap(), vec!["c1"]);

        assert!(adapter.delete("conversations", "c1").await.unwrap());
        assert!(!adapter.delete("conversations", "c1").await.unwrap());
        assert_eq!(adapter.get("conversations", "c1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn records_on_disk_are_sealed() {
        let dir = TempDir::new().unwrap();
        let adapter = adapter(&dir, Arc::new(FakeKeys::new()), None).await;
        adapter
            .put("notes", "n1", &json!({"secret": "plaintext-marker"}))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(adapter.paths().record(None, "notes", "n1")).unwrap();
        assert!(!raw.contains("plaintext-marker"));
        let record: StoredRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.collection, "notes");
    }

    #[tokio::test]
    async fn workspace_scope_is_separate_directory() {
        let dir = TempDir::new().unwrap();
        let keys = Arc::new(FakeKeys::new());
        keys.add_workspace("user_1", "ws_a");
        let personal = adapter(&dir, keys.clone(), None).await;
        let shared = adapter(&dir, keys, Some("ws_a")).await;

        shared.put("notes", "n1", &json!("team")).await.unwrap();
        assert_eq!(personal.get("notes", "n1").await.unwrap(), None);
        assert!(dir.path().join("workspaces/ws_a/notes/n1.json").exists());
    }

    #[tokio::test]
    async fn closed_adapter_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let adapter = adapter(&dir, Arc::new(FakeKeys::new()), None).await;
        adapter.close().await.unwrap();
        assert!(matches!(
            adapter.get("notes", "n1").await,
            Err(StorageError::NotInitialized)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_to_one_record_leave_one_whole_file() {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(adapter(&dir, Arc::new(FakeKeys::new()), None).await);

        let writes = (0..16u64).map(|rev| {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.put("notes", "n1", &json!({"rev": rev})).await })
        });
        for write in futures::future::join_all(writes).await {
            write.unwrap().unwrap();
        }

        let stored = adapter.get("notes", "n1").await.unwrap().unwrap();
        assert!(stored["rev"].as_u64().unwrap() < 16);
        assert_eq!(adapter.list("notes").await.unwrap(), vec!["n1"]);
        let files = std::fs::read_dir(dir.path().join("personal/notes")).unwrap().count();
        assert_eq!(files, 1);
    }
}
