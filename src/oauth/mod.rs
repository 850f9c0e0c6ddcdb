// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # OAuth Authorization Flow
//!
//! Authorization-code flow (with PKCE) against the third-party storage
//! provider, and ownership of that provider's access/refresh pair.
//!
//! ```text
//! Idle -> AuthorizationRequested -> CallbackReceived -> StateValidated
//!      -> TokensExchanged -> UserInfoFetched -> Authenticated
//!                         (any step) -> Failed
//! ```
//!
//! ## Security
//!
//! - `state` is 32 random bytes, compared in constant time, consumed only
//!   after a match; a mismatch never reaches the network
//! - A partial scope grant is a hard failure
//! - Provider endpoints must be HTTPS (loopback hosts excepted)
//! - Token refresh is single-flight; a failed refresh ends the session

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod flow;
pub mod pkce;

pub use flow::{CallbackParams, OAuthFlow, OAuthSettings, TokenEndpoint};
pub use pkce::{ChallengeMethod, PkceChallenge};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    #[error("insecure OAuth endpoint, HTTPS required: {0}")]
    InsecureEndpoint(String),

    #[error("OAuth state parameter missing or mismatched")]
    StateMismatch,

    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("authorization denied by provider: {error}")]
    ProviderDenied {
        error: String,
        description: Option<String>,
    },

    #[error("granted scope is missing: {}", missing.join(", "))]
    InsufficientScope { missing: Vec<String> },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("user info request failed: {0}")]
    UserInfo(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("no authenticated provider session")]
    NotAuthenticated,

    #[error("OAuth request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for OAuthError {
    fn from(e: reqwest::Error) -> Self {
        OAuthError::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for OAuthError {
    fn from(e: tokio::task::JoinError) -> Self {
        OAuthError::Transport(format!("refresh task aborted: {e}"))
    }
}

/// Observable flow phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    AuthorizationRequested,
    CallbackReceived,
    StateValidated,
    TokensExchanged,
    UserInfoFetched,
    Authenticated,
    Failed,
}

/// Token endpoint answer (direct or through the exchange proxy).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Provider account profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(alias = "id")]
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Supplies a bearer token for the provider's APIs.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, OAuthError>;
}
