// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local API vault backend.
//!
//! REST calls against the local vault service, every one routed through the
//! credential [`RequestPipeline`]:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | get | `GET /api/v1/{collection}/{id}` |
//! | put | `PUT /api/v1/{collection}/{id}` (sealed record body) |
//! | delete | `DELETE /api/v1/{collection}/{id}` |
//! | list | `GET /api/v1/{collection}` |
//!
//! Shared-workspace calls add `?workspace_id=`. Writes are immediate.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, info};

use super::adapter::{RecordSealer, StorageAdapter};
use super::types::{validate_identifier, StorageMode, StoredRecord};
use super::{StorageError, StorageResult};
use crate::auth::{AuthRequirement, RequestPipeline};

pub struct LocalApiAdapter {
    base_url: String,
    pipeline: RequestPipeline,
    sealer: RecordSealer,
    initialized: AtomicBool,
}

impl LocalApiAdapter {
    pub fn new(base_url: impl Into<String>, pipeline: RequestPipeline, sealer: RecordSealer) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pipeline,
            sealer,
            initialized: AtomicBool::new(false),
        }
    }

    fn url(&self, segments: &[&str]) -> StorageResult<Url> {
        let mut url = Url::parse(&format!("{}/api/v1/{}", self.base_url, segments.join("/")))
            .map_err(|e| StorageError::Backend {
                status: None,
                message: format!("invalid vault URL: {e}"),
            })?;
        if let Some(workspace_id) = self.sealer.workspace_id() {
            url.query_pairs_mut().append_pair("workspace_id", workspace_id);
        }
        Ok(url)
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StorageError::NotInitialized)
        }
    }

    async fn send(&self, builder: RequestBuilder, auth: AuthRequirement) -> StorageResult<Response> {
        let request = builder.build()?;
        Ok(self.pipeline.send(request, auth).await?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.pipeline.http().request(method, url)
    }
}

async fn backend_error(response: Response) -> StorageError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StorageError::Backend {
        status: Some(status),
        message,
    }
}

#[async_trait]
impl StorageAdapter for LocalApiAdapter {
    fn mode(&self) -> StorageMode {
        StorageMode::Local
    }

    async fn initialize(&self) -> StorageResult<()> {
        let url = self.url(&["health"])?;
        let response = self
            .send(self.request(Method::GET, url), AuthRequirement::Skip)
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!(base_url = %self.base_url, "Local vault storage initialized");
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

        let url = self.url(&[collection, id])?;
        let response = self
            .send(self.request(Method::GET, url), AuthRequirement::Required)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let record: StoredRecord = response.json().await?;
                Ok(Some(self.sealer.open(&record).await?))
            }
            _ => Err(backend_error(response).await),
        }
    }

    async fn put(&self, collection: &str, id: &str, value: &Value) -> StorageResult<()> {
        self.ensure_initialized()?;
        let record = self.sealer.seal(collection, id, value).await?;
        let url = self.url(&[collection, id])?;
        let response = self
            .send(
                self.request(Method::PUT, url).json(&record),
                AuthRequirement::Required,
            )
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        debug!(collection, "Record written to vault");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        validate_identifier("collection", collection)?;
        validate_identifier("id", id)?;

        let url = self.url(&[collection, id])?;
        let response = self
            .send(self.request(Method::DELETE, url), AuthRequirement::Required)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(backend_error(response).await),
        }
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;
        validate_identifier("collection", collection)?;

        let url = self.url(&[collection])?;
        let response = self
            .send(self.request(Method::GET, url), AuthRequirement::Required)
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response).await);
        }
        let records: Vec<StoredRecord> = response.json().await?;
        Ok(records.into_iter().map(|record| record.id).collect())
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
