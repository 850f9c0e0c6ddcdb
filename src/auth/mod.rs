// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Credential Lifecycle
//!
//! In-memory access credential management for every outbound call.
//!
//! ## Flow
//!
//! 1. A login (or [`TokenManager::restore_session`]) installs an
//!    [`AccessCredential`] and arms the proactive-renewal and liveness timers
//! 2. Outbound calls go through the [`RequestPipeline`], which attaches the
//!    credential and performs one renewal-and-retry on a 401
//! 3. Renewal uses the server-held renewal source (HTTP-only cookie); the
//!    client never reads it
//!
//! ## Security
//!
//! - The access credential is never written to durable storage
//! - Concurrent renewals collapse into one network call
//! - A definitive rejection ends the session exactly once

pub mod credential;
pub mod error;
pub mod legacy;
pub mod manager;
pub mod pipeline;

pub use credential::AccessCredential;
pub use error::{AuthRequiredReason, CredentialError};
pub use legacy::{purge_legacy_credentials, LEGACY_CREDENTIAL_KEYS};
pub use manager::{EnsureOptions, RenewalPolicy, SessionPhase, TokenManager};
pub use pipeline::{AuthRequirement, Call, Recovery, RequestError, RequestPipeline};
