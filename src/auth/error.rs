// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential lifecycle errors.

use std::time::Duration;

use tokio::task::JoinError;

/// Why a session ended up requiring a fresh login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequiredReason {
    /// No renewal source exists for this session.
    NoRenewalSource,
    /// The renewal endpoint rejected the renewal source (revoked/expired).
    RenewalRejected,
    /// A request was rejected again after a renewal-and-retry.
    RetryRejected,
    /// The session already ended; waiting for a new login.
    SessionEnded,
}

impl AuthRequiredReason {
    /// Get the error code for this reason.
    pub fn code(&self) -> &'static str {
        match self {
            AuthRequiredReason::NoRenewalSource => "no_renewal_source",
            AuthRequiredReason::RenewalRejected => "renewal_rejected",
            AuthRequiredReason::RetryRejected => "retry_rejected",
            AuthRequiredReason::SessionEnded => "session_ended",
        }
    }
}

impl std::fmt::Display for AuthRequiredReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthRequiredReason::NoRenewalSource => write!(f, "no renewal source is available"),
            AuthRequiredReason::RenewalRejected => write!(f, "the renewal source was rejected"),
            AuthRequiredReason::RetryRejected => {
                write!(f, "the request was rejected again after renewal")
            }
            AuthRequiredReason::SessionEnded => write!(f, "the session has ended"),
        }
    }
}

/// Credential acquisition error.
///
/// `AuthenticationRequired` is terminal for the session (logout has been
/// triggered); `AcquisitionTimeout` is local to the waiting caller;
/// `RenewalTransport` means the retry budget was exhausted on transient
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("authentication required: {0}")]
    AuthenticationRequired(AuthRequiredReason),

    #[error("credential acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),

    #[error("credential renewal failed after {attempts} attempt(s): {message}")]
    RenewalTransport { attempts: u32, message: String },
}

impl CredentialError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            CredentialError::AuthenticationRequired(_) => "authentication_required",
            CredentialError::AcquisitionTimeout(_) => "acquisition_timeout",
            CredentialError::RenewalTransport { .. } => "renewal_transport_error",
        }
    }

    /// Whether the caller may retry later without a new login.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CredentialError::AuthenticationRequired(_))
    }
}

impl From<JoinError> for CredentialError {
    fn from(e: JoinError) -> Self {
        CredentialError::RenewalTransport {
            attempts: 0,
            message: format!("renewal task aborted: {e}"),
        }
    }
}
