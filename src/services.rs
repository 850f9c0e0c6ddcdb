// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Core Services
//!
//! One context object per process wiring the token manager, the request
//! pipeline, the key manager, the storage orchestrator and (when
//! configured) the OAuth flow. Components reach each other only through
//! the handles held here.
//!
//! A background watcher clears every key cache when the session enters
//! `AuthenticationRequired`. It stops on [`CoreServices::shutdown`] or drop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AccessCredential, CredentialError, RequestPipeline, SessionPhase, TokenManager};
use crate::config::{ConfigError, CoreConfig};
use crate::crypto::KeyManager;
use crate::identity::{
    HttpIdentityClient, HttpSessionClient, IdentityEndpoints, IdentityError, SessionApi,
    WorkspaceApi,
};
use crate::oauth::{OAuthError, OAuthFlow, OAuthSettings};
use crate::storage::{
    AdapterFactory, BackendFactory, BackendSettings, PreferenceStore, StorageError,
    StorageOrchestrator, WorkspaceRegistry,
};

/// Default timeout for pipeline requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    OAuth(#[from] OAuthError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct CoreServices {
    session: Arc<dyn SessionApi>,
    tokens: Arc<TokenManager>,
    pipeline: RequestPipeline,
    keys: Arc<KeyManager>,
    storage: Arc<StorageOrchestrator>,
    oauth: Option<Arc<OAuthFlow>>,
    watcher: CancellationToken,
}

impl CoreServices {
    /// Build production services. Must run inside a Tokio runtime.
    pub fn from_config(config: &CoreConfig) -> Result<Self, ServiceError> {
        let endpoints = IdentityEndpoints::new(&config.identity_url, &config.environment);
        let session: Arc<dyn SessionApi> = Arc::new(HttpSessionClient::new(endpoints.clone())?);
        let preferences = Arc::new(PreferenceStore::in_dir(&config.data_dir));
        let tokens = Arc::new(TokenManager::new(Arc::clone(&session)).with_preferences(Arc::clone(&preferences)));

        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let pipeline = RequestPipeline::new(Arc::clone(&tokens), http.clone());
        let identity = Arc::new(HttpIdentityClient::new(endpoints, pipeline.clone()));
        let keys = Arc::new(KeyManager::new(identity.clone()));

        let oauth = match &config.oauth {
            Some(client) => {
                let mut settings = OAuthSettings::google(&client.client_id, &client.redirect_uri);
                if let Some(proxy) = &client.proxy_url {
                    settings = settings.with_proxy(proxy);
                }
                Some(OAuthFlow::new(settings, http.clone())?)
            }
            None => None,
        };

        let mut factory = BackendFactory::new(
            Arc::clone(&keys),
            pipeline.clone(),
            BackendSettings {
                vault_url: config.vault_url.clone(),
                drive_url: config.drive_url.clone(),
                data_dir: config.data_dir.clone(),
                auto_sync_interval: config.auto_sync_interval,
            },
        );
        if let Some(flow) = &oauth {
            factory = factory.with_drive_tokens(flow.clone());
        }

        let storage = StorageOrchestrator::new(
            Arc::new(factory),
            Arc::clone(&keys),
            Arc::new(WorkspaceRegistry::new(identity)),
        )
        .with_preferences(preferences)
        .with_constraint(config.deployment_mode)
        .with_default_mode(config.default_mode);

        info!(
            identity_url = %config.identity_url,
            environment = %config.environment,
            oauth = oauth.is_some(),
            "Core services configured"
        );
        Ok(Self::assemble(session, tokens, pipeline, keys, Arc::new(storage), oauth))
    }

    /// Wire pre-built components and start the phase watcher.
    pub fn assemble(
        session: Arc<dyn SessionApi>,
        tokens: Arc<TokenManager>,
        pipeline: RequestPipeline,
        keys: Arc<KeyManager>,
        storage: Arc<StorageOrchestrator>,
        oauth: Option<Arc<OAuthFlow>>,
    ) -> Self {
        let watcher = CancellationToken::new();
        spawn_phase_watcher(&tokens, Arc::clone(&keys), watcher.clone());
        Self {
            session,
            tokens,
            pipeline,
            keys,
            storage,
            oauth,
            watcher,
        }
    }

    /// Assemble with an arbitrary workspace API and adapter factory.
    pub fn with_backends(
        session: Arc<dyn SessionApi>,
        key_api: Arc<dyn crate::identity::KeyApi>,
        workspaces: Arc<dyn WorkspaceApi>,
        factory: Arc<dyn AdapterFactory>,
        http: reqwest::Client,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(Arc::clone(&session)));
        let pipeline = RequestPipeline::new(Arc::clone(&tokens), http);
        let keys = Arc::new(KeyManager::new(key_api));
        let storage = StorageOrchestrator::new(
            factory,
            Arc::clone(&keys),
            Arc::new(WorkspaceRegistry::new(workspaces)),
        );
        Self::assemble(session, tokens, pipeline, keys, Arc::new(storage), None)
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn storage(&self) -> &Arc<StorageOrchestrator> {
        &self.storage
    }

    pub fn oauth(&self) -> Option<&Arc<OAuthFlow>> {
        self.oauth.as_ref()
    }

    /// Adopt a fresh login: hand the pair to the identity boundary, keep
    /// the access credential in memory and bind the identity to storage.
    pub async fn sign_in(
        &self,
        access_token: &str,
        renewal_token: Option<&str>,
        expires_in: Option<u64>,
    ) -> Result<(), ServiceError> {
        self.session
            .store_pair(access_token, renewal_token, expires_in)
            .await?;
        let credential = AccessCredential::from_token(
            access_token,
            expires_in,
            self.tokens.policy().fallback_ttl,
        );
        self.tokens
            .set_credential(credential, renewal_token.is_some(), None);
        self.bind_identity();
        Ok(())
    }

    /// Resume a session held by the identity boundary. Returns whether one
    /// was found.
    pub async fn restore(&self) -> Result<bool, ServiceError> {
        let restored = self.tokens.restore_session().await?.is_some();
        if restored {
            self.bind_identity();
        }
        Ok(restored)
    }

    fn bind_identity(&self) {
        match self.tokens.identity() {
            Some(identity) => self.storage.set_user_id(&identity),
            None => warn!("Signed-in credential carries no identity"),
        }
    }

    /// End the session and drop every cached key.
    pub async fn logout(&self) {
        self.tokens.logout().await;
        self.keys.clear_all_key_caches();
    }

    /// Flush storage and stop background work.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        self.watcher.cancel();
        self.storage.shutdown().await?;
        Ok(())
    }
}

impl Drop for CoreServices {
    fn drop(&mut self) {
        self.watcher.cancel();
    }
}

fn spawn_phase_watcher(tokens: &Arc<TokenManager>, keys: Arc<KeyManager>, stop: CancellationToken) {
    let mut phases = tokens.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = phases.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = stop.cancelled() => return,
            }
            let phase = *phases.borrow_and_update();
            if phase == SessionPhase::AuthenticationRequired {
                keys.clear_all_key_caches();
                debug!("Key caches cleared after authentication loss");
            }
        }
    });
}
