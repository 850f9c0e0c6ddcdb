// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encryption & Key Manager.
//!
//! Resolves the key for a scope (personal, or one shared workspace),
//! caches it with a TTL and performs payload encryption. Concurrent misses
//! for the same scope share one fetch. Every cache clear bumps a
//! generation counter: fetches that started before the clear neither
//! populate the cache nor get joined by callers that arrive after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ring::rand::SystemRandom;
use secrecy::{ExposeSecret, SecretSlice};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::aead::{self, DataKey};
use super::{decode_field, CryptoError, EncryptedPayload};
use crate::cache::TtlCache;
use crate::config::KEY_CACHE_TTL;
use crate::identity::KeyApi;
use crate::single_flight::SingleFlight;

/// Upper bound on cached keys per scope.
const KEY_CACHE_CAPACITY: usize = 64;

pub struct KeyManager {
    keys: Arc<dyn KeyApi>,
    personal: TtlCache<String, DataKey>,
    /// Keyed by `(identity, workspace_id)`: each member unwraps with their
    /// own personal key.
    workspace: TtlCache<(String, String), DataKey>,
    personal_flight: SingleFlight<String, DataKey, CryptoError>,
    workspace_flight: SingleFlight<(u64, String, String), DataKey, CryptoError>,
    generation: AtomicU64,
    rng: SystemRandom,
}

impl KeyManager {
    pub fn new(keys: Arc<dyn KeyApi>) -> Self {
        Self::with_ttl(keys, KEY_CACHE_TTL)
    }

    pub fn with_ttl(keys: Arc<dyn KeyApi>, ttl: Duration) -> Self {
        Self {
            keys,
            personal: TtlCache::new(KEY_CACHE_CAPACITY, ttl),
            workspace: TtlCache::new(KEY_CACHE_CAPACITY, ttl),
            personal_flight: SingleFlight::new(),
            workspace_flight: SingleFlight::new(),
            generation: AtomicU64::new(0),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt `payload` under the workspace key when `workspace` is given,
    /// else under the personal key of `identity`.
    pub async fn encrypt<T: Serialize + ?Sized>(
        self: &Arc<Self>,
        payload: &T,
        identity: &str,
        workspace: Option<&str>,
    ) -> Result<EncryptedPayload, CryptoError> {
        let key = self.resolve_key(identity, workspace).await?;
        let plaintext = serde_json::to_vec(payload)?;
        let sealed = key.seal(&self.rng, &plaintext)?;
        Ok(sealed.into())
    }

    pub async fn decrypt<T: DeserializeOwned>(
        self: &Arc<Self>,
        payload: &EncryptedPayload,
        identity: &str,
        workspace: Option<&str>,
    ) -> Result<T, CryptoError> {
        self.decrypt_parts(
            &payload.ciphertext,
            &payload.nonce,
            &payload.tag,
            identity,
            workspace,
        )
        .await
    }

    /// Decrypt from the three base64 fields.
    pub async fn decrypt_parts<T: DeserializeOwned>(
        self: &Arc<Self>,
        ciphertext: &str,
        nonce: &str,
        tag: &str,
        identity: &str,
        workspace: Option<&str>,
    ) -> Result<T, CryptoError> {
        let ciphertext = decode_field("ciphertext", ciphertext)?;
        let nonce = decode_field("nonce", nonce)?;
        let tag = decode_field("tag", tag)?;

        let key = self.resolve_key(identity, workspace).await?;
        let plaintext = key.open(&nonce, &ciphertext, &tag)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Workspace key, unwrapped with the caller's personal key.
    pub async fn get_workspace_key(
        self: &Arc<Self>,
        workspace_id: &str,
        identity: &str,
    ) -> Result<DataKey, CryptoError> {
        let cache_key = (identity.to_string(), workspace_id.to_string());
        if let Some(key) = self.workspace.get(&cache_key) {
            return Ok(key);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let manager = Arc::clone(self);
        let (identity, workspace_id) = cache_key.clone();
        self.workspace_flight
            .run(
                (generation, identity.clone(), workspace_id.clone()),
                move || async move {
                    let wrapped = manager
                        .keys
                        .wrapped_workspace_key(&workspace_id, &identity)
                        .await?;
                    let personal = manager.personal_key(&identity).await?;
                    let key = aead::unwrap_key(&personal, &wrapped)?;
                    if manager.generation.load(Ordering::SeqCst) == generation {
                        manager.workspace.insert(cache_key, key.clone());
                        info!(workspace_id = %workspace_id, "Workspace key unwrapped and cached");
                    }
                    Ok(key)
                },
            )
            .await
    }

    /// Personal key for `identity`.
    pub async fn personal_key(self: &Arc<Self>, identity: &str) -> Result<DataKey, CryptoError> {
        if let Some(key) = self.personal.get(identity) {
            return Ok(key);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let manager = Arc::clone(self);
        let identity = identity.to_string();
        self.personal_flight
            .run(format!("{generation}:{identity}"), move || async move {
                let raw = manager.keys.personal_key(&identity).await?;
                let key = DataKey::import(raw.expose_secret())?;
                if manager.generation.load(Ordering::SeqCst) == generation {
                    manager.personal.insert(identity.clone(), key.clone());
                    debug!("Personal key cached");
                }
                Ok(key)
            })
            .await
    }

    /// Generate a fresh workspace key and wrap it for `identity`.
    ///
    /// Returns the usable key and the wrapped blob to hand to the identity
    /// boundary for distribution.
    pub async fn provision_workspace_key(
        self: &Arc<Self>,
        identity: &str,
    ) -> Result<(DataKey, Vec<u8>), CryptoError> {
        let (key, raw) = DataKey::generate(&self.rng)?;
        let wrapped = self.wrap_for(identity, &raw).await?;
        Ok((key, wrapped))
    }

    /// Wrap raw workspace key bytes under `identity`'s personal key.
    pub async fn wrap_for(
        self: &Arc<Self>,
        identity: &str,
        raw: &SecretSlice<u8>,
    ) -> Result<Vec<u8>, CryptoError> {
        let personal = self.personal_key(identity).await?;
        aead::wrap_key(&personal, &self.rng, raw.expose_secret())
    }

    pub fn clear_workspace_key_cache(&self, workspace_id: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let evicted = self
            .workspace
            .invalidate_where(|(_, cached)| cached == workspace_id);
        if evicted > 0 {
            debug!(workspace_id, evicted, "Workspace key evicted");
        }
    }

    pub fn clear_all_key_caches(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.personal.clear();
        self.workspace.clear();
        debug!("All key caches cleared");
    }

    /// Number of cached workspace keys.
    pub fn cached_workspace_keys(&self) -> usize {
        self.workspace.len()
    }

    async fn resolve_key(
        self: &Arc<Self>,
        identity: &str,
        workspace: Option<&str>,
    ) -> Result<DataKey, CryptoError> {
        match workspace {
            Some(workspace_id) => self.get_workspace_key(workspace_id, identity).await,
            None => self.personal_key(identity).await,
        }
    }
}
