// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-time cleanup of credentials persisted by earlier client versions.
//!
//! Current clients hold the access credential in memory only. Older ones
//! wrote credential material to the durable preference store; those keys
//! are removed whenever the in-memory credential is cleared. Safe to delete
//! once no installed client can still carry the old keys.

use tracing::{info, warn};

use crate::storage::PreferenceStore;

/// Preference keys that once held credential material.
pub const LEGACY_CREDENTIAL_KEYS: &[&str] = &[
    "auth_token",
    "refresh_token",
    "token_expires_at",
    "oauth_access_token",
    "oauth_refresh_token",
];

/// Remove legacy credential keys. Failures are logged, never raised.
pub fn purge_legacy_credentials(store: &PreferenceStore) -> usize {
    match store.remove_keys(LEGACY_CREDENTIAL_KEYS) {
        Ok(0) => 0,
        Ok(removed) => {
            info!(removed, "Purged legacy credential entries");
            removed
        }
        Err(e) => {
            warn!(error = %e, "Failed to purge legacy credential entries");
            0
        }
    }
}
