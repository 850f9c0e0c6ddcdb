// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cloud Drive Backend
//!
//! Keeps the whole scope as one sealed snapshot object on the drive
//! gateway and works against an in-memory copy:
//!
//! ```text
//! GET/PUT {drive_url}/containers/{container}/objects/workspace-snapshot.json
//! ```
//!
//! `container` is the workspace's drive folder, its id when it has none,
//! or `personal`. Reads and writes hit memory; writes bump a revision and
//! are uploaded by [`sync`](StorageAdapter::sync) or the auto-sync task.
//! Only sealed records leave the process.
//!
//! ## Shutdown
//!
//! The auto-sync task stops on `close` or drop via a `CancellationToken`.
//! `close` does not flush; callers freeze writes and sync first. The
//! freeze flag is checked under the collections lock, so a write either
//! lands before the freeze (and is in the next upload) or is rejected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adapter::{RecordSealer, StorageAdapter};
use super::types::{validate_identifier, StorageMode, StoredRecord};
use super::{StorageError, StorageResult};
use crate::oauth::AccessTokenSource;

/// Object name of the scope snapshot.
pub const SNAPSHOT_OBJECT: &str = "workspace-snapshot.json";

const PERSONAL_CONTAINER: &str = "personal";

const SNAPSHOT_VERSION: u32 = 1;

type Collections = BTreeMap<String, BTreeMap<String, StoredRecord>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DriveSnapshot {
    version: u32,
    #[serde(default)]
    collections: Collections,
}

struct CloudInner {
    object_url: String,
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    collections: RwLock<Collections>,
    /// Bumped on every local write.
    revision: AtomicU64,
    /// Last revision known to be on the drive.
    synced_revision: AtomicU64,
    sync_lock: tokio::sync::Mutex<()>,
}

impl CloudInner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Collections> {
        self.collections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Collections> {
        self.collections.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn has_unsynced_changes(&self) -> bool {
        self.revision.load(Ordering::SeqCst) != self.synced_revision.load(Ordering::SeqCst)
    }

    async fn download(&self) -> StorageResult<Collections> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(&self.object_url)
            .bearer_auth(token)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(Collections::new()),
            status if status.is_success() => {
                let snapshot: DriveSnapshot = response.json().await?;
                Ok(snapshot.collections)
            }
            status => Err(StorageError::Backend {
                status: Some(status.as_u16()),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn sync(&self) -> StorageResult<()> {
        let _guard = self.sync_lock.lock().await;
        let revision = self.revision.load(Ordering::SeqCst);
        if revision == self.synced_revision.load(Ordering::SeqCst) {
            return Ok(());
        }

        let body = {
            let snapshot = DriveSnapshot {
                version: SNAPSHOT_VERSION,
                collections: self.read().clone(),
            };
            serde_json::to_vec(&snapshot)?
        };
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .put(&self.object_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StorageError::Backend {
                status: Some(response.status().as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }

        // Writes made during the upload stay pending.
        self.synced_revision.store(revision, Ordering::SeqCst);
        debug!(revision, "Drive snapshot uploaded");
        Ok(())
    }
}

pub struct CloudDriveAdapter {
    inner: Arc<CloudInner>,
    sealer: RecordSealer,
    auto_sync_interval: Duration,
    auto_sync: Mutex<Option<CancellationToken>>,
    initialized: AtomicBool,
    frozen: AtomicBool,
}

impl CloudDriveAdapter {
    pub fn new(
        base_url: impl Into<String>,
        container: Option<String>,
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenSource>,
        sealer: RecordSealer,
        auto_sync_interval: Duration,
    ) -> Self {
        let base_url = base_url.into();
        let container = container
            .or_else(|| sealer.workspace_id().map(str::to_string))
            .unwrap_or_else(|| PERSONAL_CONTAINER.to_string());
        let object_url = format!(
            "{}/containers/{}/objects/{}",
            base_url.trim_end_matches('/'),
            container,
            SNAPSHOT_OBJECT
        );

        Self {
            inner: Arc::new(CloudInner {
                object_url,
                http,
                tokens,
                collections: RwLock::new(Collections::new()),
                revision: AtomicU64::new(0),
                synced_revision: AtomicU64::new(0),
                sync_lock: tokio::sync::Mutex::new(()),
            }),
            sealer,
            auto_sync_interval,
            auto_sync: Mutex::new(None),
            initialized: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn object_url(&self) -> &str {
        &self.inner.object_url
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_initialized()?;
        if self.frozen.load(Ordering::SeqCst) {
            return Err(StorageError::WritesFrozen);
        }
        Ok(())
    }

    fn start_auto_sync(&self) {
        if self.auto_sync_interval.is_zero() {
            return;
        }
        let token = CancellationToken::new();
        if let Some(previous) = self
            .auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let inner = Arc::downgrade(&self.inner);
        let interval = self.auto_sync_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {},
                    _ = token.cancelled() => {
                        debug!("Drive auto-sync stopped");
                        return;
                    }
                }

                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if inner.has_unsynced_changes() {
                    if let Err(e) = inner.sync().await {
                        warn!(error = %e, "Drive auto-sync failed");
                    }
                }
            }
        });
    }

    fn stop_auto_sync(&self) {
        if let Some(token) = self
            .auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

impl Drop for CloudDriveAdapter {
    fn drop(&mut self) {
        self.stop_auto_sync();
    }
}

#[async_trait]
impl StorageAdapter for CloudDriveAdapter {
    fn mode(&self) -> StorageMode {
        StorageMode::Cloud
    }

    async fn initialize(&self) -> StorageResult<()> {
        let collections = self.inner.download().await?;
        let count: usize = collections.values().map(BTreeMap::len).sum();
        *self.inner.write() = collections;
        let revision = self.inner.revision.load(Ordering::SeqCst);
        self.inner.synced_revision.store(revision, Ordering::SeqCst);

        self.frozen.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        self.start_auto_sync();
        info!(
            object = %self.inner.object_url,
            records = count,
            "Cloud drive storage initialized"
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
        validate_identifier("collection", collection)?;
        validate_identifier("id", id)?;

        let record = self
            .inner
            .read()
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned();
        match record {
            Some(record) => Ok(Some(self.sealer.open(&record).await?)),
            None => Ok(None),
        }
    }

    async fn put(&self, collection: &str, id: &str, value: &Value) -> StorageResult<()> {
        self.ensure_writable()?;
        let record = self.sealer.seal(collection, id, value).await?;

        let mut collections = self.inner.write();
        // Sealing awaits; a freeze may have started meanwhile.
        self.ensure_writable()?;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record);
        self.inner.mark_dirty();
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        self.ensure_writable()?;
        validate_identifier("collection", collection)?;
        validate_identifier("id", id)?;

        let mut collections = self.inner.write();
        self.ensure_writable()?;
        let removed = collections
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .is_some();
        if removed {
            self.inner.mark_dirty();
        }
        Ok(removed)
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;
        validate_identifier("collection", collection)?;
        Ok(self
            .inner
            .read()
            .get(collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn has_unsynced_changes(&self) -> bool {
        self.inner.has_unsynced_changes()
    }

    async fn sync(&self) -> StorageResult<()> {
        self.ensure_initialized()?;
        self.inner.sync().await
    }

    fn freeze_writes(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
        // Wait out a write holding the lock so its revision bump is visible.
        drop(self.inner.write());
        debug!(object = %self.inner.object_url, frozen, "Drive write freeze toggled");
    }

    async fn close(&self) -> StorageResult<()> {
        self.stop_auto_sync();
        self.freeze_writes(true);
        self.initialized.store(false, Ordering::SeqCst);
        if self.has_unsynced_changes() {
            warn!(object = %self.inner.object_url, "Drive storage closed with unsynced changes");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyManager;
    use crate::oauth::OAuthError;
    use crate::testing::FakeKeys;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    struct StaticToken;

    #[async_trait]
    impl AccessTokenSource for StaticToken {
        async fn access_token(&self) -> Result<String, OAuthError> {
            Ok("drive-token".to_string())
        }
    }

    // In-memory drive object: PUT stores the body, GET returns it.
    #[derive(Clone, Default)]
    struct DriveObject(Arc<Mutex<Option<Vec<u8>>>>);

    impl Respond for DriveObject {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let mut stored = self.0.lock().unwrap();
            if request.method.as_str() == "PUT" {
                *stored = Some(request.body.clone());
                return ResponseTemplate::new(200);
            }
            match stored.as_ref() {
                Some(body) => ResponseTemplate::new(200).set_body_raw(body.clone(), "application/json"),
                None => ResponseTemplate::new(404),
            }
        }
    }

    const PERSONAL_OBJECT: &str = "/containers/personal/objects/workspace-snapshot.json";

    async fn mount_drive(server: &MockServer, object_path: &str) -> DriveObject {
        let object = DriveObject::default();
        Mock::given(path(object_path.to_string()))
            .and(header("authorization", "Bearer drive-token"))
            .respond_with(object.clone())
            .mount(server)
            .await;
        object
    }

    async fn adapter(
        server: &MockServer,
        keys: Arc<FakeKeys>,
        workspace: Option<&str>,
        container: Option<&str>,
        interval: Duration,
    ) -> CloudDriveAdapter {
        let sealer = RecordSealer::new(Arc::new(KeyManager::new(keys)), workspace.map(str::to_string));
        let adapter = CloudDriveAdapter::new(
            server.uri(),
            container.map(str::to_string),
            reqwest::Client::new(),
            Arc::new(StaticToken),
            sealer,
            interval,
        );
        adapter.set_user_id("user_1");
        adapter.initialize().await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn writes_stay_local_until_sync() {
        let server = MockServer::start().await;
        let object = mount_drive(&server, PERSONAL_OBJECT).await;
        let keys = Arc::new(FakeKeys::new());

        let adapter = adapter(&server, keys.clone(), None, None, Duration::ZERO).await;
        adapter.put("notes", "n1", &json!({"text": "draft"})).await.unwrap();
        assert!(adapter.has_unsynced_changes());
        assert!(object.0.lock().unwrap().is_none());
        assert_eq!(
            adapter.get("notes", "n1").await.unwrap(),
            Some(json!({"text": "draft"}))
        );

        adapter.sync().await.unwrap();
        assert!(!adapter.has_unsynced_changes());
        let uploaded = String::from_utf8(object.0.lock().unwrap().clone().unwrap()).unwrap();
        assert!(!uploaded.contains("draft"));

        // A fresh adapter sees the uploaded snapshot.
        let reopened = self::adapter(&server, keys, None, None, Duration::ZERO).await;
        assert_eq!(reopened.list("notes").await.unwrap(), vec!["n1"]);
        assert_eq!(
            reopened.get("notes", "n1").await.unwrap(),
            Some(json!({"text": "draft"}))
        );
    }

    #[tokio::test]
    async fn delete_marks_dirty_only_when_present() {
        let server = MockServer::start().await;
        mount_drive(&server, PERSONAL_OBJECT).await;
        let adapter = adapter(&server, Arc::new(FakeKeys::new()), None, None, Duration::ZERO).await;

        assert!(!adapter.delete("notes", "missing").await.unwrap());
        assert!(!adapter.has_unsynced_changes());

        adapter.put("notes", "n1", &json!(1)).await.unwrap();
        adapter.sync().await.unwrap();
        assert!(adapter.delete("notes", "n1").await.unwrap());
        assert!(adapter.has_unsynced_changes());
    }

    #[tokio::test]
    async fn workspace_uses_its_container() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/containers/folder-9/objects/workspace-snapshot.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let keys = Arc::new(FakeKeys::new());
        keys.add_workspace("user_1", "ws_a");
        let adapter = adapter(&server, keys, Some("ws_a"), Some("folder-9"), Duration::ZERO).await;
        assert!(adapter.object_url().ends_with("/containers/folder-9/objects/workspace-snapshot.json"));
    }

    #[tokio::test]
    async fn auto_sync_uploads_pending_writes() {
        let server = MockServer::start().await;
        let object = mount_drive(&server, PERSONAL_OBJECT).await;
        let adapter = adapter(
            &server,
            Arc::new(FakeKeys::new()),
            None,
            None,
            Duration::from_millis(30),
        )
        .await;

        adapter.put("notes", "n1", &json!("auto")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!adapter.has_unsynced_changes());
        assert!(object.0.lock().unwrap().is_some());
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_upload_keeps_changes_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PERSONAL_OBJECT))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(PERSONAL_OBJECT))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let adapter = adapter(&server, Arc::new(FakeKeys::new()), None, None, Duration::ZERO).await;

        adapter.put("notes", "n1", &json!(1)).await.unwrap();
        let err = adapter.sync().await.unwrap_err();
        assert!(matches!(err, StorageError::Backend { status: Some(503), .. }));
        assert!(adapter.has_unsynced_changes());
    }

    #[tokio::test]
    async fn frozen_adapter_rejects_writes_until_reopened() {
        let server = MockServer::start().await;
        mount_drive(&server, PERSONAL_OBJECT).await;
        let adapter = adapter(&server, Arc::new(FakeKeys::new()), None, None, Duration::ZERO).await;
        adapter.put("notes", "n1", &json!(1)).await.unwrap();

        adapter.freeze_writes(true);
        assert!(matches!(
            adapter.put("notes", "n2", &json!(2)).await,
            Err(StorageError::WritesFrozen)
        ));
        assert!(matches!(
            adapter.delete("notes", "n1").await,
            Err(StorageError::WritesFrozen)
        ));
        // Reads and the flush still work.
        assert_eq!(adapter.list("notes").await.unwrap(), vec!["n1"]);
        adapter.sync().await.unwrap();
        assert!(!adapter.has_unsynced_changes());

        adapter.close().await.unwrap();
        adapter.initialize().await.unwrap();
        adapter.put("notes", "n2", &json!(2)).await.unwrap();
        assert_eq!(adapter.list("notes").await.unwrap(), vec!["n1", "n2"]);
    }
}
