// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token exchange endpoints. The browser holds the code or refresh token,
//! this service holds the client secret.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;

use crate::{error::ApiError, providers::GoogleTokenClient, state::AppState};

const NOT_CONFIGURED: &str = "OAuth not configured on server";

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfigResponse {
    pub google_client_id: String,
    pub environment: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ExchangeCodeRequest {
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    /// PKCE verifier matching the challenge sent on the authorization request.
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeCodeResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/config",
    tag = "OAuth",
    responses(
        (status = 200, body = ClientConfigResponse),
        (status = 503, description = "Client id not configured")
    )
)]
pub async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<ClientConfigResponse>, ApiError> {
    let client_id = state
        .config
        .google_client_id
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("Google Client ID not configured"))?;
    Ok(Json(ClientConfigResponse {
        google_client_id: client_id,
        environment: state.config.environment.clone(),
    }))
}

#[utoipa::path(
    post,
    path = "/api/oauth/exchange-code",
    request_body = ExchangeCodeRequest,
    tag = "OAuth",
    responses(
        (status = 200, body = ExchangeCodeResponse),
        (status = 400, description = "Missing code or redirect_uri, or rejected by the provider"),
        (status = 502, description = "Provider unavailable"),
        (status = 503, description = "OAuth not configured")
    )
)]
pub async fn exchange_code(
    State(state): State<AppState>,
    Json(request): Json<ExchangeCodeRequest>,
) -> Result<Json<ExchangeCodeResponse>, ApiError> {
    let code = required(request.code.as_deref(), "Missing authorization code")?;
    let redirect_uri = required(request.redirect_uri.as_deref(), "Missing redirect_uri")?;
    let google = configured(&state)?;

    info!("Exchanging authorization code");
    let tokens = google
        .exchange_code(code, redirect_uri, request.code_verifier.as_deref())
        .await?;

    Ok(Json(ExchangeCodeResponse {
        access_token: string_field(&tokens, "access_token").unwrap_or_default(),
        refresh_token: string_field(&tokens, "refresh_token"),
        expires_in: tokens.get("expires_in").and_then(Value::as_u64),
        scope: string_field(&tokens, "scope"),
    }))
}

#[utoipa::path(
    post,
    path = "/api/oauth/refresh-token",
    request_body = RefreshTokenRequest,
    tag = "OAuth",
    responses(
        (status = 200, body = RefreshTokenResponse),
        (status = 400, description = "Missing refresh_token, or rejected by the provider"),
        (status = 502, description = "Provider unavailable"),
        (status = 503, description = "OAuth not configured")
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, ApiError> {
    let refresh_token = required(request.refresh_token.as_deref(), "Missing refresh_token")?;
    let google = configured(&state)?;

    info!("Refreshing access token");
    let tokens = google.refresh(refresh_token).await?;

    Ok(Json(RefreshTokenResponse {
        access_token: string_field(&tokens, "access_token").unwrap_or_default(),
        expires_in: tokens.get("expires_in").and_then(Value::as_u64),
    }))
}

fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, ApiError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::bad_request(message)),
    }
}

fn configured(state: &AppState) -> Result<&GoogleTokenClient, ApiError> {
    state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable(NOT_CONFIGURED))
}

fn string_field(value: &Value, name: &str) -> Option<String> {
    value.get(name).and_then(Value::as_str).map(str::to_string)
}
