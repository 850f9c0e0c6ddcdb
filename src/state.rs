// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tracing::warn;

use crate::config::ProxyConfig;
use crate::providers::GoogleTokenClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    /// `None` until both client id and secret are configured.
    pub google: Option<GoogleTokenClient>,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        let google = if GoogleTokenClient::is_configured(&config) {
            match GoogleTokenClient::from_config(&config) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "Google token client unavailable");
                    None
                }
            }
        } else {
            warn!("GOOGLE_CLIENT_ID or GOOGLE_CLIENT_SECRET not set, token exchange disabled");
            None
        };

        Self {
            config: Arc::new(config),
            google,
        }
    }
}
