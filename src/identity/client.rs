// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! reqwest clients for the identity boundary.
//!
//! [`HttpSessionClient`] talks to the cookie endpoints with a cookie-store
//! enabled client and never attaches a bearer credential.
//! [`HttpIdentityClient`] sends everything else through the
//! [`RequestPipeline`] so it picks up credential attachment and
//! renewal-and-retry.

use std::time::Duration;

use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Response, StatusCode, Url};
use secrecy::SecretSlice;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    IdentityError, KeyApi, RenewedAccess, SessionApi, StoredSession, WorkspaceApi,
    WorkspaceRecord,
};
use crate::auth::{AuthRequirement, RequestPipeline};

/// Network timeout for identity calls.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Base URL plus the session-scoped environment discriminator.
#[derive(Debug, Clone)]
pub struct IdentityEndpoints {
    base_url: String,
    environment: String,
}

impl IdentityEndpoints {
    pub fn new(base_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            environment: environment.into(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// `{base}/{path}?env={environment}`
    pub fn url(&self, path: &str) -> Result<Url, IdentityError> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            self.base_url,
            path.trim_start_matches('/')
        ))
        .map_err(|e| IdentityError::InvalidResponse(format!("invalid identity URL: {e}")))?;
        url.query_pairs_mut().append_pair("env", &self.environment);
        Ok(url)
    }
}

/// Map a non-success response onto the identity error taxonomy.
async fn check_status(response: Response) -> Result<Response, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(IdentityError::Unauthorized),
        StatusCode::NOT_FOUND => Err(IdentityError::NotFound(response.url().path().to_string())),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(IdentityError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

// ============================================================================
// Cookie-backed session endpoints
// ============================================================================

#[derive(Serialize)]
struct StorePairRequest<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct StoredPairResponse {
    #[serde(default, alias = "auth_token")]
    access_token: Option<String>,
    #[serde(default)]
    has_refresh_token: bool,
    #[serde(default)]
    user: Option<UserRef>,
}

#[derive(Deserialize)]
struct UserRef {
    id: String,
}

/// Client for `/api/auth/*` (cookie-held credential pair).
#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    endpoints: IdentityEndpoints,
    http: reqwest::Client,
}

impl HttpSessionClient {
    pub fn new(endpoints: IdentityEndpoints) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(IDENTITY_TIMEOUT)
            .build()?;
        Ok(Self { endpoints, http })
    }
}

#[async_trait]
impl SessionApi for HttpSessionClient {
    async fn store_pair(
        &self,
        access_token: &str,
        renewal_token: Option<&str>,
        expires_in: Option<u64>,
    ) -> Result<(), IdentityError> {
        let body = StorePairRequest {
            access_token,
            refresh_token: renewal_token,
            expires_in,
        };
        let response = self
            .http
            .post(self.endpoints.url("api/auth/set-token")?)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        debug!("Credential pair handed to identity boundary");
        Ok(())
    }

    async fn load_pair(&self) -> Result<StoredSession, IdentityError> {
        let response = self
            .http
            .get(self.endpoints.url("api/auth/get-tokens")?)
            .send()
            .await?;
        let response = match check_status(response).await {
            Ok(response) => response,
            Err(IdentityError::Unauthorized | IdentityError::NotFound(_)) => {
                return Ok(StoredSession::default())
            }
            Err(e) => return Err(e),
        };
        let stored: StoredPairResponse = response.json().await?;
        Ok(StoredSession {
            access_token: stored.access_token,
            renewal_available: stored.has_refresh_token,
            identity: stored.user.map(|u| u.id),
        })
    }

    async fn clear_pair(&self) -> Result<(), IdentityError> {
        let response = self
            .http
            .post(self.endpoints.url("api/auth/clear-tokens")?)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn renew_access(&self) -> Result<RenewedAccess, IdentityError> {
        let response = self
            .http
            .post(self.endpoints.url("api/auth/refresh")?)
            .send()
            .await?;
        match check_status(response).await {
            Ok(response) => Ok(response.json().await?),
            Err(IdentityError::Unauthorized | IdentityError::NotFound(_)) => {
                Err(IdentityError::RenewalRevoked)
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Authenticated key and workspace endpoints
// ============================================================================

#[derive(Deserialize)]
struct EncryptionKeyResponse {
    encryption_key: EncryptionKeyBody,
}

#[derive(Deserialize)]
struct EncryptionKeyBody {
    key: String,
}

#[derive(Deserialize)]
struct WrappedKeyResponse {
    wrapped_key: String,
}

/// Client for the authenticated identity endpoints.
#[derive(Clone)]
pub struct HttpIdentityClient {
    endpoints: IdentityEndpoints,
    pipeline: RequestPipeline,
}

impl HttpIdentityClient {
    pub fn new(endpoints: IdentityEndpoints, pipeline: RequestPipeline) -> Self {
        Self {
            endpoints,
            pipeline,
        }
    }

    async fn get(&self, path: &str) -> Result<Response, IdentityError> {
        let request = self
            .pipeline
            .http()
            .get(self.endpoints.url(path)?)
            .timeout(IDENTITY_TIMEOUT)
            .build()?;
        let response = self.pipeline.send(request, AuthRequirement::Required).await?;
        check_status(response).await
    }

    async fn create_personal_key(&self) -> Result<String, IdentityError> {
        let request = self
            .pipeline
            .http()
            .post(self.endpoints.url("encryption/key")?)
            .timeout(IDENTITY_TIMEOUT)
            .build()?;
        let response = self.pipeline.send(request, AuthRequirement::Required).await?;
        let body: EncryptionKeyResponse = check_status(response).await?.json().await?;
        Ok(body.encryption_key.key)
    }
}

fn decode_key_material(encoded: &str) -> Result<Vec<u8>, IdentityError> {
    Base64::decode_vec(encoded.trim())
        .map_err(|e| IdentityError::InvalidResponse(format!("key material is not base64: {e}")))
}

#[async_trait]
impl KeyApi for HttpIdentityClient {
    async fn personal_key(&self, identity: &str) -> Result<SecretSlice<u8>, IdentityError> {
        let encoded = match self.get("encryption/key").await {
            Ok(response) => response.json::<EncryptionKeyResponse>().await?.encryption_key.key,
            Err(IdentityError::NotFound(_)) => {
                info!(identity, "No personal key issued yet, creating one");
                self.create_personal_key().await?
            }
            Err(e) => return Err(e),
        };
        Ok(SecretSlice::from(decode_key_material(&encoded)?))
    }

    async fn wrapped_workspace_key(
        &self,
        workspace_id: &str,
        identity: &str,
    ) -> Result<Vec<u8>, IdentityError> {
        debug!(workspace_id, identity, "Fetching wrapped workspace key");
        let body: WrappedKeyResponse = self
            .get(&format!("workspaces/{workspace_id}/key"))
            .await?
            .json()
            .await?;
        decode_key_material(&body.wrapped_key)
    }
}

#[async_trait]
impl WorkspaceApi for HttpIdentityClient {
    async fn fetch_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Option<WorkspaceRecord>, IdentityError> {
        match self.get(&format!("workspaces/{workspace_id}")).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(IdentityError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
