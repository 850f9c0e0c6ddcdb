// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory fakes of the identity boundary and the storage backends.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretSlice};
use serde_json::Value;

use crate::crypto::aead::{self, DataKey, KEY_LEN};
use crate::identity::{
    IdentityError, KeyApi, RenewedAccess, SessionApi, StoredSession, WorkspaceApi,
    WorkspaceRecord,
};
use crate::storage::adapter::{AdapterFactory, StorageAdapter};
use crate::storage::types::{StorageConfig, StorageMode};
use crate::storage::{StorageError, StorageResult};

// ========== Identity Boundary ==========

/// Session endpoints. Renewals answer `renewed-{n}` (n counts every call)
/// unless an outcome was queued.
#[derive(Default)]
pub(crate) struct FakeSession {
    delay: Duration,
    stored: Mutex<StoredSession>,
    outcomes: Mutex<VecDeque<Result<RenewedAccess, IdentityError>>>,
    pub(crate) renew_calls: AtomicUsize,
    clear_calls: AtomicUsize,
}

impl FakeSession {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn set_renewal_available(&self, available: bool) {
        self.stored.lock().unwrap().renewal_available = available;
    }

    pub(crate) fn set_identity(&self, identity: &str) {
        self.stored.lock().unwrap().identity = Some(identity.to_string());
    }

    pub(crate) fn push_outcome(&self, outcome: Result<RenewedAccess, IdentityError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub(crate) fn renew_count(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_count(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionApi for FakeSession {
    async fn store_pair(
        &self,
        access_token: &str,
        renewal_token: Option<&str>,
        _expires_in: Option<u64>,
    ) -> Result<(), IdentityError> {
        let mut stored = self.stored.lock().unwrap();
        stored.access_token = Some(access_token.to_string());
        stored.renewal_available = renewal_token.is_some();
        Ok(())
    }

    async fn load_pair(&self) -> Result<StoredSession, IdentityError> {
        Ok(self.stored.lock().unwrap().clone())
    }

    async fn clear_pair(&self) -> Result<(), IdentityError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock().unwrap() = StoredSession::default();
        Ok(())
    }

    async fn renew_access(&self) -> Result<RenewedAccess, IdentityError> {
        let call = self.renew_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let queued = self.outcomes.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(RenewedAccess {
                access_token: format!("renewed-{call}"),
                expires_in: Some(3600),
            })
        })
    }
}

/// Key issuance with real wrapped workspace keys.
pub(crate) struct FakeKeys {
    delay: Duration,
    rng: SystemRandom,
    personal: Mutex<HashMap<String, Vec<u8>>>,
    wrapped: Mutex<HashMap<(String, String), Vec<u8>>>,
    personal_fetches: AtomicUsize,
    wrapped_fetches: AtomicUsize,
}

impl FakeKeys {
    pub(crate) fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            rng: SystemRandom::new(),
            personal: Mutex::new(HashMap::new()),
            wrapped: Mutex::new(HashMap::new()),
            personal_fetches: AtomicUsize::new(0),
            wrapped_fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn personal_raw(&self, identity: &str) -> Vec<u8> {
        self.personal
            .lock()
            .unwrap()
            .entry(identity.to_string())
            .or_insert_with(|| {
                let mut raw = vec![0u8; KEY_LEN];
                self.rng.fill(&mut raw).unwrap();
                raw
            })
            .clone()
    }

    /// Create a workspace key and wrap it for `identity`.
    pub(crate) fn add_workspace(&self, identity: &str, workspace_id: &str) {
        let personal = DataKey::import(&self.personal_raw(identity)).unwrap();
        let (_, raw) = DataKey::generate(&self.rng).unwrap();
        let blob = aead::wrap_key(&personal, &self.rng, raw.expose_secret()).unwrap();
        self.wrapped
            .lock()
            .unwrap()
            .insert((workspace_id.to_string(), identity.to_string()), blob);
    }

    pub(crate) fn personal_fetches(&self) -> usize {
        self.personal_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn wrapped_fetches(&self) -> usize {
        self.wrapped_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyApi for FakeKeys {
    async fn personal_key(&self, identity: &str) -> Result<SecretSlice<u8>, IdentityError> {
        self.personal_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(SecretSlice::from(self.personal_raw(identity)))
    }

    async fn wrapped_workspace_key(
        &self,
        workspace_id: &str,
        identity: &str,
    ) -> Result<Vec<u8>, IdentityError> {
        self.wrapped_fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.wrapped
            .lock()
            .unwrap()
            .get(&(workspace_id.to_string(), identity.to_string()))
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(format!("workspace key {workspace_id}")))
    }
}

/// Workspace registry entries.
#[derive(Default)]
pub(crate) struct FakeWorkspaces {
    records: Mutex<HashMap<String, WorkspaceRecord>>,
    fetches: AtomicUsize,
}

impl FakeWorkspaces {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, record: WorkspaceRecord) {
        self.records.lock().unwrap().insert(record.id.clone(), record);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkspaceApi for FakeWorkspaces {
    async fn fetch_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceRecord>, IdentityError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().unwrap().get(workspace_id).cloned())
    }
}

// ========== Storage Backends ==========

/// Plain in-memory adapter with switchable failures.
pub(crate) struct FakeAdapter {
    pub(crate) config: StorageConfig,
    records: Mutex<HashMap<(String, String), Value>>,
    user_id: Mutex<Option<String>>,
    initialized: AtomicBool,
    unsynced: AtomicBool,
    fail_sync: AtomicBool,
    fail_init: AtomicBool,
    frozen: AtomicBool,
    syncs: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeAdapter {
    fn new(config: StorageConfig, fail_init: bool) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            user_id: Mutex::new(None),
            initialized: AtomicBool::new(false),
            unsynced: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
            fail_init: AtomicBool::new(fail_init),
            frozen: AtomicBool::new(false),
            syncs: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_unsynced(&self, unsynced: bool) {
        self.unsynced.store(unsynced, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub(crate) fn user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageAdapter for FakeAdapter {
    fn mode(&self) -> StorageMode {
        self.config.mode
    }

    async fn initialize(&self) -> StorageResult<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                status: Some(503),
                message: "backend unavailable".to_string(),
            });
        }
        self.frozen.store(false, Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn set_user_id(&self, user_id: &str) {
        *self.user_id.lock().unwrap() = Some(user_id.to_string());
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Value>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn put(&self, collection: &str, id: &str, value: &Value) -> StorageResult<()> {
        if self.is_frozen() {
            return Err(StorageError::WritesFrozen);
        }
        self.records
            .lock()
            .unwrap()
            .insert((collection.to_string(), id.to_string()), value.clone());
        self.set_unsynced(true);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .remove(&(collection.to_string(), id.to_string()))
            .is_some())
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn has_unsynced_changes(&self) -> bool {
        self.unsynced.load(Ordering::SeqCst)
    }

    async fn sync(&self) -> StorageResult<()> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                status: None,
                message: "upload failed".to_string(),
            });
        }
        self.set_unsynced(false);
        Ok(())
    }

    fn freeze_writes(&self, frozen: bool) {
        self.frozen.store(frozen, Ordering::SeqCst);
    }

    async fn close(&self) -> StorageResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds [`FakeAdapter`]s and remembers them.
#[derive(Default)]
pub(crate) struct FakeAdapterFactory {
    created: Mutex<Vec<Arc<FakeAdapter>>>,
    fail_next_init: AtomicBool,
}

impl FakeAdapterFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next adapter created fails to initialize.
    pub(crate) fn fail_next_init(&self) {
        self.fail_next_init.store(true, Ordering::SeqCst);
    }

    pub(crate) fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn last(&self) -> Arc<FakeAdapter> {
        self.created.lock().unwrap().last().cloned().unwrap()
    }

    pub(crate) fn nth(&self, index: usize) -> Arc<FakeAdapter> {
        self.created.lock().unwrap()[index].clone()
    }
}

impl AdapterFactory for FakeAdapterFactory {
    fn create(&self, config: &StorageConfig) -> StorageResult<Arc<dyn StorageAdapter>> {
        let fail = self.fail_next_init.swap(false, Ordering::SeqCst);
        let adapter = Arc::new(FakeAdapter::new(config.clone(), fail));
        self.created.lock().unwrap().push(adapter.clone());
        Ok(adapter)
    }
}

/// Thin-pointer identity of an adapter handle.
pub(crate) fn adapter_addr(adapter: &Arc<dyn StorageAdapter>) -> *const () {
    Arc::as_ptr(adapter) as *const ()
}

pub(crate) fn fake_addr(adapter: &Arc<FakeAdapter>) -> *const () {
    Arc::as_ptr(adapter) as *const ()
}
