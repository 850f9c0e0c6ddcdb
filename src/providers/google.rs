// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Google token endpoint client used by the exchange proxy.
//!
//! The client secret never leaves this process. Callers send a code (or a
//! refresh token) and get the provider's token response back verbatim.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ProxyConfig;

const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Google OAuth configuration missing: {0}")]
    MissingConfig(&'static str),

    #[error("Token request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("Token endpoint returned {status}")]
    Rejected { status: u16, body: Value },

    #[error("Token response was invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone)]
pub struct GoogleTokenClient {
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    http: Client,
}

impl GoogleTokenClient {
    pub fn is_configured(config: &ProxyConfig) -> bool {
        config.google_client_id.is_some() && config.google_client_secret.is_some()
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProviderError> {
        let client_id = config
            .google_client_id
            .clone()
            .ok_or(ProviderError::MissingConfig("GOOGLE_CLIENT_ID"))?;
        let client_secret = config
            .google_client_secret
            .clone()
            .ok_or(ProviderError::MissingConfig("GOOGLE_CLIENT_SECRET"))?;

        let http = Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            token_url: config.google_token_url.clone(),
            client_id,
            client_secret,
            http,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Value, ProviderError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier", verifier));
        }

        let tokens = self.post_form(&form).await?;
        info!(
            has_refresh_token = tokens.get("refresh_token").is_some(),
            "Authorization code exchanged"
        );
        Ok(tokens)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Value, ProviderError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        let tokens = self.post_form(&form).await?;
        info!("Access token refreshed");
        Ok(tokens)
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&body)
            .unwrap_or_else(|_| serde_json::json!({ "error": "invalid_response", "error_description": body }));

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint rejected request");
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: parsed,
            });
        }

        if parsed.get("access_token").and_then(Value::as_str).is_none() {
            return Err(ProviderError::InvalidResponse(
                "token response did not include access_token".to_string(),
            ));
        }
        Ok(parsed)
    }
}
