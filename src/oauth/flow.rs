// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization-code flow driver.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use ring::rand::SystemRandom;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{random_token, PkceChallenge};
use super::{AccessTokenSource, FlowPhase, OAuthError, ProviderTokens, UserInfo};
use crate::auth::AccessCredential;
use crate::single_flight::SingleFlight;

pub const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Scope needed to read and write the app's own files on the drive.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Token exchange and refresh timeout.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider tokens this close to expiry are refreshed before use.
const REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Provider access tokens without `expires_in` are assumed to last this long.
const DEFAULT_PROVIDER_TTL: Duration = Duration::from_secs(3600);

/// Where authorization codes are exchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEndpoint {
    /// Provider token endpoint, form-encoded, public client with PKCE.
    Direct(String),
    /// Exchange proxy holding the client secret (`/api/oauth/exchange-code`,
    /// `/api/oauth/refresh-token`).
    Proxy(String),
}

impl TokenEndpoint {
    fn url(&self) -> &str {
        match self {
            TokenEndpoint::Direct(url) | TokenEndpoint::Proxy(url) => url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_endpoint: TokenEndpoint,
    pub revoke_url: String,
    pub userinfo_url: String,
    /// Scopes requested at authorization.
    pub scopes: Vec<String>,
    /// Scopes that must all be granted; a partial grant fails the flow.
    pub required_scopes: Vec<String>,
}

impl OAuthSettings {
    /// Google endpoints with drive file access.
    pub fn google(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            authorize_url: GOOGLE_AUTHORIZE_URL.to_string(),
            token_endpoint: TokenEndpoint::Direct(GOOGLE_TOKEN_URL.to_string()),
            revoke_url: GOOGLE_REVOKE_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
                DRIVE_FILE_SCOPE.to_string(),
            ],
            required_scopes: vec![DRIVE_FILE_SCOPE.to_string()],
        }
    }

    /// Route code exchange and refresh through the exchange proxy.
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        let proxy = proxy_url.into().trim_end_matches('/').to_string();
        self.token_endpoint = TokenEndpoint::Proxy(proxy);
        self
    }

    /// Every provider endpoint must be HTTPS.
    pub fn validate(&self) -> Result<(), OAuthError> {
        if self.client_id.is_empty() {
            return Err(OAuthError::MissingParameter("client_id"));
        }
        for endpoint in [
            self.authorize_url.as_str(),
            self.token_endpoint.url(),
            self.revoke_url.as_str(),
            self.userinfo_url.as_str(),
        ] {
            validate_endpoint(endpoint)?;
        }
        Ok(())
    }
}

/// HTTPS only, no embedded credentials. Loopback hosts may use plain HTTP.
pub fn validate_endpoint(endpoint: &str) -> Result<(), OAuthError> {
    let url = Url::parse(endpoint).map_err(|_| OAuthError::InsecureEndpoint(endpoint.to_string()))?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(OAuthError::InsecureEndpoint(endpoint.to_string()));
    }
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        _ => Err(OAuthError::InsecureEndpoint(endpoint.to_string())),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

struct PendingAuthorization {
    state: String,
    pkce: PkceChallenge,
}

#[derive(Clone)]
struct ProviderSession {
    access: AccessCredential,
    refresh: Option<Arc<SecretString>>,
    granted_scopes: Vec<String>,
    user: Option<UserInfo>,
}

#[derive(Serialize)]
struct ProxyExchangeBody<'a> {
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct ProxyRefreshBody<'a> {
    refresh_token: &'a str,
}

/// Drives one provider authorization and owns the resulting tokens.
pub struct OAuthFlow {
    me: Weak<OAuthFlow>,
    settings: OAuthSettings,
    http: reqwest::Client,
    rng: SystemRandom,
    pending: Mutex<Option<PendingAuthorization>>,
    session: RwLock<Option<ProviderSession>>,
    phase: watch::Sender<FlowPhase>,
    refreshes: SingleFlight<&'static str, AccessCredential, OAuthError>,
}

impl OAuthFlow {
    pub fn new(settings: OAuthSettings, http: reqwest::Client) -> Result<Arc<Self>, OAuthError> {
        settings.validate()?;
        let (phase, _) = watch::channel(FlowPhase::Idle);
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            http,
            rng: SystemRandom::new(),
            pending: Mutex::new(None),
            session: RwLock::new(None),
            phase,
            refreshes: SingleFlight::new(),
        }))
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn phase(&self) -> FlowPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowPhase> {
        self.phase.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_session().is_some()
    }

    /// Profile of the signed-in provider account.
    pub fn user(&self) -> Option<UserInfo> {
        self.read_session().and_then(|s| s.user)
    }

    pub fn granted_scopes(&self) -> Vec<String> {
        self.read_session()
            .map(|s| s.granted_scopes)
            .unwrap_or_default()
    }

    fn read_session(&self) -> Option<ProviderSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_phase(&self, phase: FlowPhase) {
        self.phase.send_replace(phase);
    }

    /// Start an authorization: returns the URL to send the user to.
    ///
    /// A new call replaces any pending authorization.
    pub fn begin_authorization(&self) -> Result<Url, OAuthError> {
        let state = random_token(&self.rng)?;
        let pkce = PkceChallenge::generate(&self.rng)?;

        let mut url = Url::parse(&self.settings.authorize_url)
            .map_err(|_| OAuthError::InsecureEndpoint(self.settings.authorize_url.clone()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", pkce.method.as_str())
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(PendingAuthorization { state, pkce });
        self.set_phase(FlowPhase::AuthorizationRequested);
        debug!("OAuth authorization requested");
        Ok(url)
    }

    /// Complete an authorization from the redirect's query parameters.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<UserInfo, OAuthError> {
        self.set_phase(FlowPhase::CallbackReceived);
        let result = self.complete_callback(params).await;
        match &result {
            Ok(user) => {
                self.set_phase(FlowPhase::Authenticated);
                info!(user_id = %user.sub, "OAuth sign-in complete");
            }
            Err(e) => {
                self.set_phase(FlowPhase::Failed);
                warn!(error = %e, "OAuth callback rejected");
            }
        }
        result
    }

    async fn complete_callback(&self, params: CallbackParams) -> Result<UserInfo, OAuthError> {
        if let Some(error) = params.error {
            self.take_pending();
            return Err(OAuthError::ProviderDenied {
                error,
                description: params.error_description,
            });
        }

        let received = params.state.ok_or(OAuthError::StateMismatch)?;
        let pending = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(p) if constant_time_compare(&p.state, &received) => pending.take(),
                _ => None,
            }
        };
        let pending = pending.ok_or(OAuthError::StateMismatch)?;
        self.set_phase(FlowPhase::StateValidated);

        let code = params.code.ok_or(OAuthError::MissingParameter("code"))?;
        let tokens = self.exchange_code(&code, &pending.pkce.verifier).await?;

        let granted: Vec<String> = tokens
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let missing = missing_scopes(&self.settings.required_scopes, &granted);
        if !missing.is_empty() {
            return Err(OAuthError::InsufficientScope { missing });
        }
        self.set_phase(FlowPhase::TokensExchanged);

        let user = self.fetch_userinfo(&tokens.access_token).await?;
        self.set_phase(FlowPhase::UserInfoFetched);

        let session = ProviderSession {
            access: AccessCredential::from_token(
                tokens.access_token,
                tokens.expires_in,
                DEFAULT_PROVIDER_TTL,
            ),
            refresh: tokens
                .refresh_token
                .map(|t| Arc::new(SecretString::from(t))),
            granted_scopes: granted,
            user: Some(user.clone()),
        };
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(user)
    }

    fn take_pending(&self) -> Option<PendingAuthorization> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<ProviderTokens, OAuthError> {
        let request = match &self.settings.token_endpoint {
            TokenEndpoint::Direct(url) => self.http.post(url).form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("client_id", self.settings.client_id.as_str()),
                ("code_verifier", verifier),
            ]),
            TokenEndpoint::Proxy(base) => self
                .http
                .post(format!("{base}/api/oauth/exchange-code"))
                .json(&ProxyExchangeBody {
                    code,
                    redirect_uri: &self.settings.redirect_uri,
                    code_verifier: verifier,
                }),
        };

        let response = request
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::TokenExchange(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let response = self
            .http
            .get(&self.settings.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::UserInfo(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))
    }

    /// A usable provider access token, refreshing it first when close to
    /// expiry. Concurrent callers share one refresh.
    pub async fn valid_access_token(&self) -> Result<AccessCredential, OAuthError> {
        let session = self.read_session().ok_or(OAuthError::NotAuthenticated)?;
        if session.access.remaining() > REFRESH_SKEW {
            return Ok(session.access);
        }

        let me = self.me.upgrade().ok_or(OAuthError::NotAuthenticated)?;
        self.refreshes
            .run("refresh", move || async move { me.refresh().await })
            .await
    }

    async fn refresh(&self) -> Result<AccessCredential, OAuthError> {
        let Some(session) = self.read_session() else {
            return Err(OAuthError::NotAuthenticated);
        };
        // Another refresh may have landed while this one was queued.
        if session.access.remaining() > REFRESH_SKEW {
            return Ok(session.access);
        }
        let Some(refresh_token) = session.refresh.clone() else {
            self.end_session("no refresh token");
            return Err(OAuthError::NotAuthenticated);
        };

        match self.request_refresh(refresh_token.expose_secret()).await {
            Ok(tokens) => {
                let access = AccessCredential::from_token(
                    tokens.access_token,
                    tokens.expires_in,
                    DEFAULT_PROVIDER_TTL,
                );
                let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
                if let Some(current) = guard.as_mut() {
                    current.access = access.clone();
                    if let Some(rotated) = tokens.refresh_token {
                        current.refresh = Some(Arc::new(SecretString::from(rotated)));
                    }
                    if let Some(scope) = tokens.scope {
                        current.granted_scopes =
                            scope.split_whitespace().map(str::to_string).collect();
                    }
                }
                debug!("Provider access token refreshed");
                Ok(access)
            }
            Err(e) => {
                self.end_session(&e.to_string());
                Err(e)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<ProviderTokens, OAuthError> {
        let request = match &self.settings.token_endpoint {
            TokenEndpoint::Direct(url) => self.http.post(url).form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.settings.client_id.as_str()),
            ]),
            TokenEndpoint::Proxy(base) => self
                .http
                .post(format!("{base}/api/oauth/refresh-token"))
                .json(&ProxyRefreshBody { refresh_token }),
        };

        let response = request
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OAuthError::RefreshFailed(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OAuthError::RefreshFailed(e.to_string()))
    }

    fn end_session(&self, reason: &str) {
        let had_session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if had_session {
            warn!(reason, "Provider session invalidated");
        }
        self.set_phase(FlowPhase::Idle);
    }

    /// Revoke the provider grant (best effort) and forget local tokens.
    pub async fn sign_out(&self) {
        self.take_pending();
        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_phase(FlowPhase::Idle);

        let Some(session) = session else {
            return;
        };
        let token = session
            .refresh
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .unwrap_or_else(|| session.access.expose().to_string());
        let revoked = self
            .http
            .post(&self.settings.revoke_url)
            .form(&[("token", token.as_str())])
            .send()
            .await;
        match revoked {
            Ok(response) if response.status().is_success() => {
                info!("Provider grant revoked");
            }
            Ok(response) => {
                warn!(status = response.status().as_u16(), "Provider revocation refused");
            }
            Err(e) => {
                warn!(error = %e, "Provider revocation failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl AccessTokenSource for OAuthFlow {
    async fn access_token(&self) -> Result<String, OAuthError> {
        Ok(self.valid_access_token().await?.expose().to_string())
    }
}

fn missing_scopes(required: &[String], granted: &[String]) -> Vec<String> {
    let granted: HashSet<&str> = granted.iter().map(String::as_str).collect();
    required
        .iter()
        .filter(|scope| !granted.contains(scope.as_str()))
        .cloned()
        .collect()
}

/// Comparison time does not depend on where the inputs differ.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> OAuthSettings {
        OAuthSettings {
            client_id: "client-123".to_string(),
            redirect_uri: "http://localhost:5173/oauth/callback".to_string(),
            authorize_url: format!("{}/authorize", server.uri()),
            token_endpoint: TokenEndpoint::Direct(format!("{}/token", server.uri())),
            revoke_url: format!("{}/revoke", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
            scopes: vec!["openid".to_string(), DRIVE_FILE_SCOPE.to_string()],
            required_scopes: vec![DRIVE_FILE_SCOPE.to_string()],
        }
    }

    fn flow(server: &MockServer) -> Arc<OAuthFlow> {
        OAuthFlow::new(settings(server), reqwest::Client::new()).unwrap()
    }

    fn state_of(url: &Url) -> String {
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn mount_token(server: &MockServer, scope: &str, expires_in: u64) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "provider-access",
                "refresh_token": "provider-refresh",
                "expires_in": expires_in,
                "scope": scope,
            })))
            .mount(server)
            .await;
    }

    async fn mount_userinfo(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "google-1",
                "email": "a@example.com",
            })))
            .mount(server)
            .await;
    }

    async fn signed_in(server: &MockServer, expires_in: u64) -> Arc<OAuthFlow> {
        mount_token(server, &format!("openid {DRIVE_FILE_SCOPE}"), expires_in).await;
        mount_userinfo(server).await;
        let flow = flow(server);
        let url = flow.begin_authorization().unwrap();
        flow.handle_callback(CallbackParams {
            code: Some("auth-code".into()),
            state: Some(state_of(&url)),
            ..Default::default()
        })
        .await
        .unwrap();
        flow
    }

    #[test]
    fn endpoints_must_be_https() {
        assert!(validate_endpoint("https://oauth2.googleapis.com/token").is_ok());
        assert!(validate_endpoint("http://127.0.0.1:8080/token").is_ok());
        assert!(validate_endpoint("http://localhost/token").is_ok());
        assert!(matches!(
            validate_endpoint("http://example.com/token"),
            Err(OAuthError::InsecureEndpoint(_))
        ));
        assert!(validate_endpoint("https://user:pw@example.com/token").is_err());
        assert!(validate_endpoint("not a url").is_err());
    }

    #[test]
    fn google_settings_validate() {
        let settings = OAuthSettings::google("client", "https://app.example.com/cb");
        assert!(settings.validate().is_ok());
        assert!(settings
            .with_proxy("http://evil.example.com")
            .validate()
            .is_err());
    }

    #[test]
    fn constant_time_compare_works() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[tokio::test]
    async fn authorization_url_carries_pkce_and_state() {
        let server = MockServer::start().await;
        let flow = flow(&server);
        let url = flow.begin_authorization().unwrap();

        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-123");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["state"].len(), 43);
        assert!(query["scope"].contains(DRIVE_FILE_SCOPE));
        assert_eq!(flow.phase(), FlowPhase::AuthorizationRequested);
    }

    #[tokio::test]
    async fn state_mismatch_never_reaches_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let flow = flow(&server);
        flow.begin_authorization().unwrap();

        let err = flow
            .handle_callback(CallbackParams {
                code: Some("auth-code".into()),
                state: Some("forged".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, OAuthError::StateMismatch);
        assert_eq!(flow.phase(), FlowPhase::Failed);

        let err = flow
            .handle_callback(CallbackParams {
                code: Some("auth-code".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, OAuthError::StateMismatch);
        assert!(!flow.is_authenticated());
    }

    #[tokio::test]
    async fn mismatch_keeps_pending_state_for_genuine_callback() {
        let server = MockServer::start().await;
        mount_token(&server, DRIVE_FILE_SCOPE, 3600).await;
        mount_userinfo(&server).await;

        let flow = flow(&server);
        let url = flow.begin_authorization().unwrap();
        let forged = flow
            .handle_callback(CallbackParams {
                code: Some("x".into()),
                state: Some("forged".into()),
                ..Default::default()
            })
            .await;
        assert!(forged.is_err());

        let user = flow
            .handle_callback(CallbackParams {
                code: Some("auth-code".into()),
                state: Some(state_of(&url)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(user.sub, "google-1");
        assert_eq!(flow.phase(), FlowPhase::Authenticated);

        // State is single use.
        let replay = flow
            .handle_callback(CallbackParams {
                code: Some("auth-code".into()),
                state: Some(state_of(&url)),
                ..Default::default()
            })
            .await;
        assert_eq!(replay.unwrap_err(), OAuthError::StateMismatch);
    }

    #[tokio::test]
    async fn partial_scope_grant_fails() {
        let server = MockServer::start().await;
        mount_token(&server, "openid email", 3600).await;
        Mock::given(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let flow = flow(&server);
        let url = flow.begin_authorization().unwrap();
        let err = flow
            .handle_callback(CallbackParams {
                code: Some("auth-code".into()),
                state: Some(state_of(&url)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            OAuthError::InsufficientScope {
                missing: vec![DRIVE_FILE_SCOPE.to_string()]
            }
        );
        assert!(!flow.is_authenticated());
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let server = MockServer::start().await;
        let flow = flow(&server);
        flow.begin_authorization().unwrap();
        let err = flow
            .handle_callback(CallbackParams {
                error: Some("access_denied".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::ProviderDenied { ref error, .. } if error == "access_denied"));
    }

    #[tokio::test]
    async fn fresh_token_is_served_without_refresh() {
        let server = MockServer::start().await;
        let flow = signed_in(&server, 3600).await;
        assert_eq!(flow.access_token().await.unwrap(), "provider-access");
        assert_eq!(flow.user().unwrap().email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "refreshed", "expires_in": 3600}))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let flow = signed_in(&server, 0).await;

        let calls = (0..8).map(|_| {
            let flow = Arc::clone(&flow);
            tokio::spawn(async move { flow.access_token().await })
        });
        for call in futures::future::join_all(calls).await {
            assert_eq!(call.unwrap().unwrap(), "refreshed");
        }
        assert_eq!(flow.granted_scopes().len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_ends_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        let flow = signed_in(&server, 0).await;

        assert!(matches!(
            flow.access_token().await,
            Err(OAuthError::RefreshFailed(_))
        ));
        assert!(!flow.is_authenticated());
        assert_eq!(flow.access_token().await, Err(OAuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn proxy_exchange_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/oauth/exchange-code"))
            .and(header("content-type", "application/json"))
            .and(body_string_contains("\"code\":\"auth-code\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "proxied",
                "expires_in": 3600,
                "scope": DRIVE_FILE_SCOPE,
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_userinfo(&server).await;

        let flow = OAuthFlow::new(
            settings(&server).with_proxy(server.uri()),
            reqwest::Client::new(),
        )
        .unwrap();
        let url = flow.begin_authorization().unwrap();
        flow.handle_callback(CallbackParams {
            code: Some("auth-code".into()),
            state: Some(state_of(&url)),
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(flow.access_token().await.unwrap(), "proxied");
    }

    #[tokio::test]
    async fn sign_out_revokes_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/revoke"))
            .and(body_string_contains("token=provider-refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let flow = signed_in(&server, 3600).await;

        flow.sign_out().await;
        assert!(!flow.is_authenticated());
        assert_eq!(flow.phase(), FlowPhase::Idle);
    }
}
