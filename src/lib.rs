// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secure Workspace Core - Session, Envelope Encryption & Storage Routing
//!
//! Client-side core for the chat workspace. Holds the access credential in
//! memory, encrypts every record under a personal or workspace key and
//! routes storage to the local vault, the filesystem or a cloud drive.
//!
//! ## Modules
//!
//! - `auth` - Access credential lifecycle and the authenticated request pipeline
//! - `crypto` - AES-256-GCM envelope encryption and key caching
//! - `identity` - Identity service boundary (session cookies, key issuance, workspaces)
//! - `oauth` - Authorization-code flow with PKCE for the cloud drive
//! - `storage` - Storage adapters and the mode/workspace orchestrator
//! - `services` - Per-process wiring of the above
//! - `api` - OAuth token-exchange proxy (Axum)

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod oauth;
pub mod providers;
pub mod services;
pub mod single_flight;
pub mod state;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;
