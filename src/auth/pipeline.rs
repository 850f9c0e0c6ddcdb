// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound request pipeline.
//!
//! Every networked call in the core runs through three named stages:
//!
//! 1. [`RequestPipeline::before_send`] attaches `Authorization: Bearer`
//!    (unless the call is marked [`AuthRequirement::Skip`])
//! 2. [`RequestPipeline::on_success`] passes the response through
//! 3. [`RequestPipeline::on_error`] turns a first 401 into one
//!    renewal-and-retry; a second 401 on the same call is a hard
//!    authentication failure and ends the session
//!
//! [`RequestPipeline::send`] composes the stages for the common case.

use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, Response, StatusCode};
use tracing::{debug, warn};

use super::credential::AccessCredential;
use super::error::{AuthRequiredReason, CredentialError};
use super::manager::{EnsureOptions, TokenManager};

/// Whether a call carries the access credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequirement {
    Required,
    /// Public endpoints and the renewal endpoint itself.
    Skip,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request body cannot be replayed")]
    NotReplayable,
}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        RequestError::Transport(e.to_string())
    }
}

/// One logical call travelling through the pipeline.
#[derive(Debug)]
pub struct Call {
    request: Request,
    auth: AuthRequirement,
    retried: bool,
    presented: Option<AccessCredential>,
}

impl Call {
    pub fn new(request: Request, auth: AuthRequirement) -> Self {
        Self {
            request,
            auth,
            retried: false,
            presented: None,
        }
    }

    pub fn was_retried(&self) -> bool {
        self.retried
    }
}

/// Outcome of the error stage.
#[derive(Debug)]
pub enum Recovery {
    /// Send the call again (credential renewed).
    Retry,
    /// Hand this response to the caller.
    Respond(Response),
}

/// Credential-aware HTTP pipeline shared by every identity-boundary and
/// backend client.
#[derive(Clone)]
pub struct RequestPipeline {
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
}

impl RequestPipeline {
    pub fn new(tokens: Arc<TokenManager>, http: reqwest::Client) -> Self {
        Self { tokens, http }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Build the outgoing copy of the call, credential attached.
    pub async fn before_send(&self, call: &mut Call) -> Result<Request, RequestError> {
        let mut request = call.request.try_clone().ok_or(RequestError::NotReplayable)?;
        if call.auth == AuthRequirement::Skip {
            return Ok(request);
        }

        let credential = self.tokens.ensure_credential(EnsureOptions::default()).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
            .map_err(|_| RequestError::Transport("credential is not a valid header value".into()))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        call.presented = Some(credential);
        Ok(request)
    }

    pub fn on_success(&self, response: Response) -> Response {
        response
    }

    /// Classify a non-success response.
    pub async fn on_error(&self, call: &mut Call, response: Response) -> Result<Recovery, RequestError> {
        if response.status() != StatusCode::UNAUTHORIZED || call.auth == AuthRequirement::Skip {
            return Ok(Recovery::Respond(response));
        }

        if call.retried {
            warn!(url = %call.request.url().path(), "Request rejected again after renewal");
            let error = self
                .tokens
                .fail_authentication(AuthRequiredReason::RetryRejected)
                .await;
            return Err(error.into());
        }

        debug!(url = %call.request.url().path(), "Request rejected, renewing credential");
        call.retried = true;
        self.tokens
            .refresh_after_rejection(call.presented.as_ref())
            .await?;
        Ok(Recovery::Retry)
    }

    /// Run `request` through all three stages.
    pub async fn send(&self, request: Request, auth: AuthRequirement) -> Result<Response, RequestError> {
        let mut call = Call::new(request, auth);
        loop {
            let outgoing = self.before_send(&mut call).await?;
            let response = self.http.execute(outgoing).await?;
            if response.status().is_success() {
                return Ok(self.on_success(response));
            }
            match self.on_error(&mut call, response).await? {
                Recovery::Retry => continue,
                Recovery::Respond(response) => return Ok(response),
            }
        }
    }
}
