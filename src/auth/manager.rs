// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Token Lifecycle Manager
//!
//! Owns the in-memory [`AccessCredential`] and keeps it usable.
//!
//! ## State machine
//!
//! ```text
//! Unauthenticated -> Authenticated -> Renewing -> Authenticated
//!                                              -> AuthenticationRequired (terminal until set_credential)
//! ```
//!
//! - Renewals are coalesced through a [`SingleFlight`]: concurrent callers
//!   await one shared task and observe one outcome.
//! - A caller's acquisition timeout only abandons its own wait.
//! - Entering `AuthenticationRequired` runs the logout side effect once,
//!   guarded by a single-shot flag.
//! - Two background timers (proactive renewal, liveness check) hang off a
//!   per-session [`CancellationToken`] and are torn down by
//!   [`TokenManager::clear_credential`]. Timer tasks hold a `Weak` handle so
//!   they never keep the manager alive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::credential::AccessCredential;
use super::error::{AuthRequiredReason, CredentialError};
use super::legacy::purge_legacy_credentials;
use crate::config::{
    ACQUISITION_TIMEOUT, FAILURE_RESCHEDULE, FALLBACK_CREDENTIAL_TTL, LIVENESS_INTERVAL,
    MAX_RENEWAL_ATTEMPTS, RENEWAL_MARGIN, RETRY_BACKOFF_UNIT,
};
use crate::identity::{IdentityError, SessionApi};
use crate::single_flight::{SharedResult, SingleFlight};
use crate::storage::PreferenceStore;

const RENEWAL_KEY: &str = "access";

/// Observable phase of the credential state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticated,
    Renewing,
    AuthenticationRequired,
}

/// Timing policy for renewal and background checks.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// Renew this long before expiry.
    pub margin: Duration,
    /// Backoff unit; attempt `n` waits `n * retry_unit`.
    pub retry_unit: Duration,
    /// Delay before re-arming a proactive renewal that failed.
    pub failure_retry: Duration,
    pub liveness_interval: Duration,
    /// Lifetime assumed for opaque credentials without `expires_in`.
    pub fallback_ttl: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            margin: RENEWAL_MARGIN,
            retry_unit: RETRY_BACKOFF_UNIT,
            failure_retry: FAILURE_RESCHEDULE,
            liveness_interval: LIVENESS_INTERVAL,
            fallback_ttl: FALLBACK_CREDENTIAL_TTL,
        }
    }
}

/// Options for [`TokenManager::ensure_credential`].
#[derive(Debug, Clone, Copy)]
pub struct EnsureOptions {
    /// Ignore the cached credential and renew.
    pub force_refresh: bool,
    /// How long this caller waits for the shared renewal.
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            timeout: ACQUISITION_TIMEOUT,
            max_attempts: MAX_RENEWAL_ATTEMPTS,
        }
    }
}

impl EnsureOptions {
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct CredentialState {
    credential: Option<AccessCredential>,
    renewal_available: bool,
    identity: Option<String>,
}

#[derive(Default)]
struct Timers {
    session: Option<CancellationToken>,
    renewal: Option<CancellationToken>,
}

/// Process-wide owner of the access credential.
pub struct TokenManager {
    session: Arc<dyn SessionApi>,
    policy: RenewalPolicy,
    state: RwLock<CredentialState>,
    phase: watch::Sender<SessionPhase>,
    renewals: SingleFlight<&'static str, AccessCredential, CredentialError>,
    logout_started: AtomicBool,
    // Bumped on every install/clear; a renewal that started under an older
    // epoch must not resurrect a cleared session.
    epoch: AtomicU64,
    timers: Mutex<Timers>,
    preferences: Option<Arc<PreferenceStore>>,
}

impl TokenManager {
    pub fn new(session: Arc<dyn SessionApi>) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Unauthenticated);
        Self {
            session,
            policy: RenewalPolicy::default(),
            state: RwLock::new(CredentialState::default()),
            phase,
            renewals: SingleFlight::new(),
            logout_started: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            timers: Mutex::new(Timers::default()),
            preferences: None,
        }
    }

    pub fn with_policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable the legacy credential purge against this preference store.
    pub fn with_preferences(mut self, preferences: Arc<PreferenceStore>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    /// Watch the session phase.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Unexpired cached credential, if any.
    pub fn current_credential(&self) -> Option<AccessCredential> {
        self.read_state()
            .credential
            .as_ref()
            .filter(|c| !c.is_expired())
            .cloned()
    }

    pub fn identity(&self) -> Option<String> {
        self.read_state().identity.clone()
    }

    pub fn renewal_available(&self) -> bool {
        self.read_state().renewal_available
    }

    /// Install a credential from a login and (re)arm both timers.
    pub fn set_credential(
        self: &Arc<Self>,
        access: AccessCredential,
        renewal_present: bool,
        identity: Option<String>,
    ) {
        self.logout_started.store(false, Ordering::SeqCst);
        {
            let mut state = self.write_state();
            state.renewal_available = renewal_present;
            state.identity = identity.or_else(|| access.subject().map(str::to_string));
        }
        self.restart_session_timers();
        self.install(access);
        info!(renewal_present, "Access credential set");
    }

    /// Return a usable credential, renewing through the shared task when needed.
    pub async fn ensure_credential(
        self: &Arc<Self>,
        options: EnsureOptions,
    ) -> Result<AccessCredential, CredentialError> {
        if !options.force_refresh {
            if let Some(credential) = self.current_credential() {
                return Ok(credential);
            }
        }
        if self.phase() == SessionPhase::AuthenticationRequired {
            return Err(CredentialError::AuthenticationRequired(
                AuthRequiredReason::SessionEnded,
            ));
        }

        let renewal = self.start_renewal(options.max_attempts);
        match tokio::time::timeout(options.timeout, renewal).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Gave up waiting for credential renewal"
                );
                Err(CredentialError::AcquisitionTimeout(options.timeout))
            }
        }
    }

    /// Renew after a request was rejected with `rejected`.
    ///
    /// If a renewal already replaced that credential, the replacement is
    /// returned without another round-trip.
    pub async fn refresh_after_rejection(
        self: &Arc<Self>,
        rejected: Option<&AccessCredential>,
    ) -> Result<AccessCredential, CredentialError> {
        if let (Some(current), Some(rejected)) = (self.current_credential(), rejected) {
            if !current.same_token(rejected) {
                debug!("Credential already renewed by another caller");
                return Ok(current);
            }
        }
        self.ensure_credential(EnsureOptions::forced()).await
    }

    /// Discard the in-memory credential and stop both timers. Idempotent.
    pub fn clear_credential(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let had_credential = self.write_state().credential.take().is_some();
        self.cancel_timers();
        if let Some(preferences) = &self.preferences {
            purge_legacy_credentials(preferences);
        }
        self.set_phase(SessionPhase::Unauthenticated);
        if had_credential {
            debug!("Access credential cleared");
        }
    }

    /// Enter `AuthenticationRequired`. The logout side effect runs once no
    /// matter how many callers discover the failure.
    pub async fn fail_authentication(&self, reason: AuthRequiredReason) -> CredentialError {
        let error = CredentialError::AuthenticationRequired(reason);
        if self.logout_started.swap(true, Ordering::SeqCst) {
            return error;
        }

        warn!(reason = reason.code(), "Authentication required, ending session");
        self.clear_credential();
        {
            let mut state = self.write_state();
            state.renewal_available = false;
        }
        if let Err(e) = self.session.clear_pair().await {
            warn!(error = %e, "Failed to clear stored credential pair");
        }
        self.set_phase(SessionPhase::AuthenticationRequired);
        error
    }

    /// Resume a session from the identity boundary's cookie-held pair.
    ///
    /// Returns `Ok(None)` when there is nothing to resume.
    pub async fn restore_session(
        self: &Arc<Self>,
    ) -> Result<Option<AccessCredential>, CredentialError> {
        let stored = self
            .session
            .load_pair()
            .await
            .map_err(|e| CredentialError::RenewalTransport {
                attempts: 1,
                message: e.to_string(),
            })?;

        if let Some(token) = stored.access_token {
            let credential = AccessCredential::from_token(token, None, self.policy.fallback_ttl);
            if !credential.is_expired() {
                self.set_credential(
                    credential.clone(),
                    stored.renewal_available,
                    stored.identity,
                );
                return Ok(Some(credential));
            }
        }

        if !stored.renewal_available {
            debug!("No stored session to restore");
            return Ok(None);
        }

        self.logout_started.store(false, Ordering::SeqCst);
        {
            let mut state = self.write_state();
            state.renewal_available = true;
            state.identity = stored.identity;
        }
        self.set_phase(SessionPhase::Unauthenticated);
        let credential = self.ensure_credential(EnsureOptions::forced()).await?;
        info!("Session restored from renewal source");
        Ok(Some(credential))
    }

    /// User-initiated logout: drop the credential and the server-held pair.
    pub async fn logout(&self) {
        self.clear_credential();
        {
            let mut state = self.write_state();
            state.renewal_available = false;
            state.identity = None;
        }
        if let Err(e) = self.session.clear_pair().await {
            warn!(error = %e, "Failed to clear stored credential pair on logout");
        }
        info!("Logged out");
    }

    fn start_renewal(self: &Arc<Self>, max_attempts: u32) -> SharedResult<AccessCredential, CredentialError> {
        let manager = Arc::clone(self);
        self.renewals.run(RENEWAL_KEY, move || async move {
            manager.renew_with_retry(max_attempts).await
        })
    }

    async fn renew_with_retry(
        self: Arc<Self>,
        max_attempts: u32,
    ) -> Result<AccessCredential, CredentialError> {
        if !self.renewal_available() {
            return Err(self
                .fail_authentication(AuthRequiredReason::NoRenewalSource)
                .await);
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let max_attempts = max_attempts.max(1);
        self.set_phase(SessionPhase::Renewing);

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.session.renew_access().await {
                Ok(renewed) => {
                    let credential = AccessCredential::from_token(
                        renewed.access_token,
                        renewed.expires_in,
                        self.policy.fallback_ttl,
                    );
                    if self.epoch.load(Ordering::SeqCst) == epoch {
                        self.install(credential.clone());
                        info!(attempt, "Access credential renewed");
                    } else {
                        debug!("Session changed during renewal, result not cached");
                    }
                    return Ok(credential);
                }
                Err(IdentityError::Unauthorized | IdentityError::RenewalRevoked) => {
                    warn!(attempt, "Renewal source rejected, abandoning retries");
                    return Err(self
                        .fail_authentication(AuthRequiredReason::RenewalRejected)
                        .await);
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, max_attempts, error = %e, "Credential renewal attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_unit * attempt).await;
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Credential renewal failed permanently");
                    self.settle_phase();
                    return Err(CredentialError::RenewalTransport {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }

        self.settle_phase();
        Err(CredentialError::RenewalTransport {
            attempts: max_attempts,
            message: last_error,
        })
    }

    fn install(self: &Arc<Self>, credential: AccessCredential) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let delay = credential.remaining().saturating_sub(self.policy.margin);
        self.write_state().credential = Some(credential);
        self.set_phase(SessionPhase::Authenticated);
        self.ensure_session_timers();
        self.schedule_renewal(delay);
    }

    // Back to the phase the cached state implies after a failed renewal.
    fn settle_phase(&self) {
        if self.phase() != SessionPhase::Renewing {
            return;
        }
        let phase = if self.current_credential().is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        };
        self.set_phase(phase);
    }

    fn set_phase(&self, next: SessionPhase) {
        self.phase.send_if_modified(|phase| {
            if *phase == next {
                false
            } else {
                debug!(from = ?*phase, to = ?next, "Session phase changed");
                *phase = next;
                true
            }
        });
    }

    fn restart_session_timers(self: &Arc<Self>) {
        self.cancel_timers();
        self.ensure_session_timers();
    }

    fn cancel_timers(&self) {
        let mut timers = self.lock_timers();
        if let Some(renewal) = timers.renewal.take() {
            renewal.cancel();
        }
        if let Some(session) = timers.session.take() {
            session.cancel();
        }
    }

    fn ensure_session_timers(self: &Arc<Self>) {
        let mut timers = self.lock_timers();
        if timers.session.is_some() {
            return;
        }
        let session = CancellationToken::new();
        timers.session = Some(session.clone());
        drop(timers);

        tokio::spawn(liveness_loop(
            Arc::downgrade(self),
            self.policy.liveness_interval,
            session,
        ));
    }

    fn schedule_renewal(self: &Arc<Self>, delay: Duration) {
        let mut timers = self.lock_timers();
        let Some(session) = timers.session.as_ref() else {
            return;
        };
        let token = session.child_token();
        if let Some(previous) = timers.renewal.replace(token.clone()) {
            previous.cancel();
        }
        drop(timers);

        if delay.is_zero() {
            debug!("Credential inside renewal margin, renewing now");
        } else {
            debug!(delay_secs = delay.as_secs(), "Proactive renewal scheduled");
        }

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(manager) = manager.upgrade() {
                        manager.proactive_renew().await;
                    }
                }
            }
        });
    }

    async fn proactive_renew(self: Arc<Self>) {
        match self.ensure_credential(EnsureOptions::forced()).await {
            Ok(_) => {}
            Err(CredentialError::AuthenticationRequired(_)) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    retry_secs = self.policy.failure_retry.as_secs(),
                    "Proactive renewal failed, rescheduling"
                );
                self.schedule_renewal(self.policy.failure_retry);
            }
        }
    }

    async fn check_liveness(self: Arc<Self>) {
        if self.current_credential().is_some() {
            debug!("Liveness check passed");
            return;
        }
        match self.ensure_credential(EnsureOptions::default()).await {
            Ok(_) => debug!("Liveness check renewed credential"),
            Err(e) => warn!(error = %e, "Liveness check failed"),
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CredentialState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CredentialState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timers(&self) -> std::sync::MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

async fn liveness_loop(manager: Weak<TokenManager>, interval: Duration, session: CancellationToken) {
    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let Some(manager) = manager.upgrade() else { break };
                manager.check_liveness().await;
            }
        }
    }
    debug!("Liveness checker stopped");
}
