// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Timing constants for the credential and key lifecycles, and the
//! environment-driven settings for the core and the exchange proxy.
//!
//! ## Core Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `IDENTITY_SERVICE_URL` | Identity boundary base URL | `http://localhost:9877` |
//! | `APP_ENVIRONMENT` | Session environment discriminator | `dev` |
//! | `VAULT_API_URL` | Local vault API base URL | `http://127.0.0.1:4000` |
//! | `DRIVE_API_URL` | Cloud drive gateway base URL | `http://127.0.0.1:4100` |
//! | `DATA_DIR` | Filesystem mode root and preference file | `./data` |
//! | `DEPLOYMENT_STORAGE_MODE` | Only storage mode this deployment allows | unset |
//! | `DEFAULT_STORAGE_MODE` | Fallback storage mode | `local` |
//! | `AUTO_SYNC_SECS` | Cloud auto-sync interval, `0` disables | `30` |
//! | `OAUTH_CLIENT_ID` | OAuth client; flow disabled when unset | unset |
//! | `OAUTH_REDIRECT_URI` | OAuth redirect | `http://localhost:5173/oauth/callback` |
//! | `OAUTH_PROXY_URL` | Token exchange proxy | unset (direct exchange) |
//!
//! ## Proxy Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Bind address | `0.0.0.0` |
//! | `PORT` | Bind port | `8000` |
//! | `ENVIRONMENT` | Reported by `/api/config` | `development` |
//! | `GOOGLE_CLIENT_ID` | OAuth client id | unset |
//! | `GOOGLE_CLIENT_SECRET` | OAuth client secret | unset |
//! | `GOOGLE_TOKEN_URL` | Provider token endpoint | `https://oauth2.googleapis.com/token` |
//! | `LOG_FORMAT` | `json` or `pretty` | `pretty` |
//! | `RUST_LOG` | Log filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::storage::paths::DATA_ROOT;
use crate::storage::{StorageError, StorageMode};

// ========== Lifecycle Timing ==========

/// Lifetime of cached personal and workspace keys.
pub const KEY_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Proactive renewal fires this long before the access credential expires.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(10 * 60);

/// Interval of the background session liveness check.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long a caller waits for a credential by default.
pub const ACQUISITION_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_RENEWAL_ATTEMPTS: u32 = 3;

/// Attempt `n` backs off `n` units.
pub const RETRY_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// A failed proactive renewal is re-armed after this delay.
pub const FAILURE_RESCHEDULE: Duration = Duration::from_secs(60);

/// Assumed lifetime for opaque credentials reported without `expires_in`.
pub const FALLBACK_CREDENTIAL_TTL: Duration = Duration::from_secs(60 * 60);

/// Cloud adapter auto-sync interval.
pub const AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(30);

// ========== Defaults ==========

const DEFAULT_IDENTITY_URL: &str = "http://localhost:9877";
const DEFAULT_APP_ENVIRONMENT: &str = "dev";
const DEFAULT_VAULT_URL: &str = "http://127.0.0.1:4000";
const DEFAULT_DRIVE_URL: &str = "http://127.0.0.1:4100";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:5173/oauth/callback";
const DEFAULT_GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

/// OAuth client settings for the provider flow.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub proxy_url: Option<String>,
}

/// Settings for [`crate::services::CoreServices`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub identity_url: String,
    pub environment: String,
    pub vault_url: String,
    pub drive_url: String,
    pub data_dir: PathBuf,
    pub deployment_mode: Option<StorageMode>,
    pub default_mode: StorageMode,
    pub auto_sync_interval: Duration,
    pub oauth: Option<OAuthClientConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            environment: DEFAULT_APP_ENVIRONMENT.to_string(),
            vault_url: DEFAULT_VAULT_URL.to_string(),
            drive_url: DEFAULT_DRIVE_URL.to_string(),
            data_dir: PathBuf::from(DATA_ROOT),
            deployment_mode: None,
            default_mode: StorageMode::Local,
            auto_sync_interval: AUTO_SYNC_INTERVAL,
            oauth: None,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let deployment_mode = env_optional("DEPLOYMENT_STORAGE_MODE")
            .map(|v| parse_mode("DEPLOYMENT_STORAGE_MODE", &v))
            .transpose()?;
        let default_mode = env_optional("DEFAULT_STORAGE_MODE")
            .map(|v| parse_mode("DEFAULT_STORAGE_MODE", &v))
            .transpose()?
            .unwrap_or(StorageMode::Local);
        let auto_sync_interval = match env_optional("AUTO_SYNC_SECS") {
            Some(v) => Duration::from_secs(v.parse().map_err(|_| ConfigError::Invalid {
                name: "AUTO_SYNC_SECS",
                message: format!("not a number of seconds: {v}"),
            })?),
            None => AUTO_SYNC_INTERVAL,
        };
        let oauth = env_optional("OAUTH_CLIENT_ID").map(|client_id| OAuthClientConfig {
            client_id,
            redirect_uri: env_or_default("OAUTH_REDIRECT_URI", DEFAULT_REDIRECT_URI),
            proxy_url: env_optional("OAUTH_PROXY_URL"),
        });

        Ok(Self {
            identity_url: env_or_default("IDENTITY_SERVICE_URL", DEFAULT_IDENTITY_URL),
            environment: env_or_default("APP_ENVIRONMENT", DEFAULT_APP_ENVIRONMENT),
            vault_url: env_or_default("VAULT_API_URL", DEFAULT_VAULT_URL),
            drive_url: env_or_default("DRIVE_API_URL", DEFAULT_DRIVE_URL),
            data_dir: PathBuf::from(env_or_default("DATA_DIR", DATA_ROOT)),
            deployment_mode,
            default_mode,
            auto_sync_interval,
            oauth,
        })
    }
}

/// Settings for the token-exchange proxy binary.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub google_token_url: String,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env_optional("PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                message: format!("not a port number: {v}"),
            })?,
            None => 8000,
        };

        Ok(Self {
            host: env_or_default("HOST", "0.0.0.0"),
            port,
            environment: env_or_default("ENVIRONMENT", "development"),
            google_client_id: env_optional("GOOGLE_CLIENT_ID"),
            google_client_secret: env_optional("GOOGLE_CLIENT_SECRET").map(SecretString::from),
            google_token_url: env_or_default("GOOGLE_TOKEN_URL", DEFAULT_GOOGLE_TOKEN_URL),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_mode(name: &'static str, value: &str) -> Result<StorageMode, ConfigError> {
    StorageMode::from_str(value).map_err(|e: StorageError| ConfigError::Invalid {
        name,
        message: e.to_string(),
    })
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CoreConfig::default();
        assert_eq!(config.identity_url, "http://localhost:9877");
        assert_eq!(config.default_mode, StorageMode::Local);
        assert_eq!(config.auto_sync_interval, Duration::from_secs(30));
        assert!(config.deployment_mode.is_none());
        assert!(config.oauth.is_none());
    }

    #[test]
    fn mode_values_are_parsed() {
        assert_eq!(parse_mode("X", "Cloud").unwrap(), StorageMode::Cloud);
        let err = parse_mode("DEFAULT_STORAGE_MODE", "tape").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for DEFAULT_STORAGE_MODE: Unknown storage mode: tape"
        );
    }

    #[test]
    fn lifecycle_constants() {
        assert_eq!(KEY_CACHE_TTL, Duration::from_secs(600));
        assert_eq!(RENEWAL_MARGIN, Duration::from_secs(600));
        assert_eq!(MAX_RENEWAL_ATTEMPTS, 3);
    }
}
