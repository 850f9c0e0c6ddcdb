// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Mode Orchestrator
//!
//! Owns the active [`StorageConfig`] and the adapter built for it, and runs
//! the mode and workspace transitions.
//!
//! ## Mode resolution
//!
//! 1. Explicit `initialize` argument (must agree with a deployment constraint)
//! 2. Deployment constraint
//! 3. Persisted user preference
//! 4. Default mode
//!
//! ## Workspace switch
//!
//! ```text
//! resolve target -> clear keys (current + target) -> withdraw adapter
//!   -> freeze writes -> flush -> close -> reconfigure
//!   -> bring up new adapter -> publish active -> clear old key
//! ```
//!
//! Transitions are serialized. While one runs, [`get_adapter`] reports
//! not-initialized, and callers still holding the old adapter get
//! `WritesFrozen` instead of a write that would miss the final upload. A
//! failed flush re-publishes the old adapter untouched; a failed bring-up
//! re-opens it.
//!
//! [`get_adapter`]: StorageOrchestrator::get_adapter

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use super::adapter::{AdapterFactory, StorageAdapter};
use super::prefs::PreferenceStore;
use super::registry::WorkspaceRegistry;
use super::types::{StorageConfig, StorageMode};
use super::{StorageError, StorageResult};
use crate::crypto::KeyManager;

/// Upload rounds before a switch gives up on a backend that stays dirty.
const DRAIN_ATTEMPTS: usize = 3;

#[derive(Default)]
struct OrchestratorState {
    config: Option<StorageConfig>,
    adapter: Option<Arc<dyn StorageAdapter>>,
    ready: bool,
    user_id: Option<String>,
}

pub struct StorageOrchestrator {
    factory: Arc<dyn AdapterFactory>,
    keys: Arc<KeyManager>,
    registry: Arc<WorkspaceRegistry>,
    preferences: Option<Arc<PreferenceStore>>,
    constraint: Option<StorageMode>,
    default_mode: StorageMode,
    transition: tokio::sync::Mutex<()>,
    state: RwLock<OrchestratorState>,
}

impl StorageOrchestrator {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        keys: Arc<KeyManager>,
        registry: Arc<WorkspaceRegistry>,
    ) -> Self {
        Self {
            factory,
            keys,
            registry,
            preferences: None,
            constraint: None,
            default_mode: StorageMode::Local,
            transition: tokio::sync::Mutex::new(()),
            state: RwLock::new(OrchestratorState::default()),
        }
    }

    /// Durable store for the user's mode choice.
    pub fn with_preferences(mut self, preferences: Arc<PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Constrained deployment: the only mode allowed.
    pub fn with_constraint(mut self, constraint: Option<StorageMode>) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_default_mode(mut self, mode: StorageMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn registry(&self) -> &Arc<WorkspaceRegistry> {
        &self.registry
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, OrchestratorState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, OrchestratorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_initialized(&self) -> bool {
        self.read_state().ready
    }

    /// The active adapter; fails while uninitialized or mid-transition.
    pub fn get_adapter(&self) -> StorageResult<Arc<dyn StorageAdapter>> {
        let state = self.read_state();
        match (&state.adapter, state.ready) {
            (Some(adapter), true) => Ok(Arc::clone(adapter)),
            _ => Err(StorageError::NotInitialized),
        }
    }

    pub fn current_mode(&self) -> Option<StorageMode> {
        self.read_state().config.as_ref().map(|c| c.mode)
    }

    pub fn current_workspace_id(&self) -> Option<String> {
        self.read_state()
            .config
            .as_ref()
            .and_then(|c| c.workspace_id().map(str::to_string))
    }

    pub fn current_config(&self) -> Option<StorageConfig> {
        self.read_state().config.clone()
    }

    /// Bind the signed-in identity to the active adapter and future ones.
    pub fn set_user_id(&self, user_id: &str) {
        let mut state = self.write_state();
        state.user_id = Some(user_id.to_string());
        if let Some(adapter) = &state.adapter {
            adapter.set_user_id(user_id);
        }
    }

    fn resolve_mode(&self, preferred: Option<StorageMode>) -> StorageResult<StorageMode> {
        if let Some(requested) = preferred {
            self.check_allowed(requested)?;
            return Ok(requested);
        }
        if let Some(allowed) = self.constraint {
            return Ok(allowed);
        }
        if let Some(saved) = self.preferences.as_ref().and_then(|p| p.storage_mode()) {
            return Ok(saved);
        }
        Ok(self.default_mode)
    }

    fn check_allowed(&self, requested: StorageMode) -> StorageResult<()> {
        match self.constraint {
            Some(allowed) if allowed != requested => {
                Err(StorageError::ModeNotAllowed { requested, allowed })
            }
            _ => Ok(()),
        }
    }

    fn remember_mode(&self, mode: StorageMode) {
        if let Some(preferences) = &self.preferences {
            if let Err(e) = preferences.set_storage_mode(mode) {
                warn!(mode = %mode, error = %e, "Failed to persist storage mode preference");
            }
        }
    }

    /// Build and open an adapter for `config`.
    async fn bring_up(&self, config: &StorageConfig) -> StorageResult<Arc<dyn StorageAdapter>> {
        let adapter = self.factory.create(config)?;
        let user_id = self.read_state().user_id.clone();
        if let Some(user_id) = user_id {
            adapter.set_user_id(&user_id);
        }
        adapter.initialize().await?;
        Ok(adapter)
    }

    fn commit(&self, config: StorageConfig, adapter: Arc<dyn StorageAdapter>) {
        let mut state = self.write_state();
        state.config = Some(config);
        state.adapter = Some(adapter);
        state.ready = true;
    }

    fn set_ready(&self, ready: bool) {
        self.write_state().ready = ready;
    }

    fn active_parts(&self) -> StorageResult<(StorageConfig, Arc<dyn StorageAdapter>)> {
        let state = self.read_state();
        match (&state.config, &state.adapter, state.ready) {
            (Some(config), Some(adapter), true) => Ok((config.clone(), Arc::clone(adapter))),
            _ => Err(StorageError::NotInitialized),
        }
    }

    /// Freeze writes and upload until nothing is pending.
    async fn drain(adapter: &Arc<dyn StorageAdapter>) -> StorageResult<()> {
        adapter.freeze_writes(true);
        for _ in 0..DRAIN_ATTEMPTS {
            if !adapter.has_unsynced_changes() {
                return Ok(());
            }
            adapter
                .sync()
                .await
                .map_err(|e| StorageError::SyncBeforeSwitchFailed(e.to_string()))?;
        }
        if adapter.has_unsynced_changes() {
            return Err(StorageError::SyncBeforeSwitchFailed(
                "changes still pending after flush".to_string(),
            ));
        }
        Ok(())
    }

    /// Withdraw `adapter` from callers and drain it. On failure it is
    /// published again and takes writes as before.
    async fn withdraw(&self, adapter: &Arc<dyn StorageAdapter>) -> StorageResult<()> {
        self.set_ready(false);
        if let Err(e) = Self::drain(adapter).await {
            adapter.freeze_writes(false);
            self.set_ready(true);
            return Err(e);
        }
        Ok(())
    }

    /// Resolve the mode and open its adapter. A no-op when already
    /// initialized.
    pub async fn initialize(&self, preferred: Option<StorageMode>) -> StorageResult<()> {
        let _transition = self.transition.lock().await;
        if self.is_initialized() {
            debug!("Storage already initialized");
            return Ok(());
        }

        let mode = self.resolve_mode(preferred)?;
        let config = StorageConfig {
            mode,
            workspace: self.registry.active(),
            endpoint: None,
        };
        let adapter = self.bring_up(&config).await?;
        let workspace_id = config.workspace_id().map(str::to_string);
        self.commit(config, adapter);
        if preferred.is_some() {
            self.remember_mode(mode);
        }

        info!(mode = %mode, workspace_id = ?workspace_id, "Storage initialized");
        Ok(())
    }

    /// Move to another backend, keeping the workspace.
    pub async fn switch_mode(&self, mode: StorageMode) -> StorageResult<()> {
        let _transition = self.transition.lock().await;
        let (current, old) = self.active_parts()?;
        if current.mode == mode {
            return Ok(());
        }
        self.check_allowed(mode)?;

        self.withdraw(&old).await?;

        let next = StorageConfig {
            mode,
            workspace: current.workspace.clone(),
            endpoint: None,
        };
        let adapter = match self.bring_up(&next).await {
            Ok(adapter) => adapter,
            Err(e) => {
                old.freeze_writes(false);
                self.set_ready(true);
                warn!(from = %current.mode, to = %mode, error = %e, "Storage mode switch failed");
                return Err(e);
            }
        };

        if let Err(e) = old.close().await {
            warn!(mode = %current.mode, error = %e, "Failed to close previous storage adapter");
        }
        self.commit(next, adapter);
        self.remember_mode(mode);
        info!(from = %current.mode, to = %mode, "Storage mode switched");
        Ok(())
    }

    /// Rebind storage to a shared workspace, or to the personal scope with
    /// `None`.
    pub async fn switch_workspace(&self, workspace_id: Option<&str>) -> StorageResult<()> {
        let _transition = self.transition.lock().await;
        let (current, old) = self.active_parts()?;
        if current.workspace_id() == workspace_id {
            return Ok(());
        }

        let target = self.registry.resolve(workspace_id).await?;

        if let Some(previous) = current.workspace_id() {
            self.keys.clear_workspace_key_cache(previous);
        }
        if let Some(next) = workspace_id {
            self.keys.clear_workspace_key_cache(next);
        }

        self.withdraw(&old).await?;

        if let Err(e) = old.close().await {
            warn!(error = %e, "Failed to close storage adapter before workspace switch");
        }

        let next = StorageConfig {
            mode: current.mode,
            workspace: target.clone(),
            endpoint: current.endpoint.clone(),
        };
        let adapter = match self.bring_up(&next).await {
            Ok(adapter) => adapter,
            Err(e) => {
                self.restore(&current, old).await;
                return Err(e);
            }
        };
        self.commit(next, adapter);
        self.registry.set_active(target);

        if let Some(previous) = current.workspace_id() {
            self.keys.clear_workspace_key_cache(previous);
        }
        info!(
            from = ?current.workspace_id(),
            to = ?workspace_id,
            mode = %current.mode,
            "Workspace switched"
        );
        Ok(())
    }

    /// Re-open the adapter a failed switch closed.
    async fn restore(&self, config: &StorageConfig, adapter: Arc<dyn StorageAdapter>) {
        match adapter.initialize().await {
            Ok(()) => {
                self.commit(config.clone(), adapter);
                warn!(workspace_id = ?config.workspace_id(), "Workspace switch rolled back");
            }
            Err(e) => {
                error!(
                    workspace_id = ?config.workspace_id(),
                    error = %e,
                    "Failed to reopen storage after aborted workspace switch"
                );
            }
        }
    }

    /// Flush and close the active adapter.
    pub async fn shutdown(&self) -> StorageResult<()> {
        let _transition = self.transition.lock().await;
        let Ok((_, adapter)) = self.active_parts() else {
            return Ok(());
        };
        self.set_ready(false);
        let flushed = Self::drain(&adapter).await;
        adapter.close().await?;
        flushed
    }
}
