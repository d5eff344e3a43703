use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// How long an issued one-time code stays valid.
pub const CODE_TTL_SECS: i64 = 120;

/// Fixed authentication window, measured from the moment the code was
/// confirmed. Requests do not extend it.
pub const AUTH_WINDOW_SECS: i64 = 300;

/// How long a session whose code expired unconfirmed is kept around so the
/// user can still ask for a resend.
pub const PENDING_RETENTION_SECS: i64 = 600;

/// Wrong codes accepted against one issued code before it is withdrawn.
pub const MAX_CODE_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Anonymous,
    CodePending,
    Authenticated,
}

/// Per-client authentication state, held server-side and keyed by the
/// session cookie.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub pending_code: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub account_id: Option<Uuid>,
    pub authenticated: bool,
    pub login_at: Option<DateTime<Utc>>,
    pub failed_attempts: u32,
}

/// What a protected handler learns about its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub account_id: Uuid,
    pub session_remaining_secs: i64,
}

impl SessionState {
    pub fn stage(&self) -> AuthStage {
        if self.authenticated && self.login_at.is_some() {
            AuthStage::Authenticated
        } else if self.pending_code.is_some() {
            AuthStage::CodePending
        } else {
            AuthStage::Anonymous
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == SessionState::default()
    }

    /// Credentials checked out: park a fresh code for `account_id`.
    /// Any earlier authentication is dropped.
    pub fn begin_challenge(&mut self, account_id: Uuid, code: String, now: DateTime<Utc>) {
        *self = SessionState {
            pending_code: Some(code),
            code_expires_at: Some(now + TimeDelta::seconds(CODE_TTL_SECS)),
            account_id: Some(account_id),
            authenticated: false,
            login_at: None,
            failed_attempts: 0,
        };
    }

    /// Replace the pending code, keeping the account. Returns the account
    /// the new code belongs to.
    pub fn reissue_code(&mut self, code: String, now: DateTime<Utc>) -> Result<Uuid, ApiError> {
        let account_id = self.account_id.ok_or(ApiError::NotPending)?;
        self.pending_code = Some(code);
        self.code_expires_at = Some(now + TimeDelta::seconds(CODE_TTL_SECS));
        self.failed_attempts = 0;
        Ok(account_id)
    }

    /// Check a submitted code. Expiry is checked before the value; a session
    /// with no code on record counts as expired.
    ///
    /// After [`MAX_CODE_ATTEMPTS`] wrong codes the pending code is withdrawn;
    /// the account stays attached so a resend can issue a new one.
    pub fn confirm_code(&mut self, code: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        match self.code_expires_at {
            Some(expires_at) if now <= expires_at => {}
            _ => return Err(ApiError::CodeExpired),
        }

        let Some(pending) = self.pending_code.as_deref() else {
            return Err(ApiError::CodeExpired);
        };

        if pending != code {
            self.failed_attempts += 1;
            if self.failed_attempts >= MAX_CODE_ATTEMPTS {
                warn!("Code withdrawn after {} wrong attempts", self.failed_attempts);
                self.pending_code = None;
            }
            return Err(ApiError::CodeMismatch);
        }

        self.authenticated = true;
        self.login_at = Some(now);
        self.pending_code = None;
        self.code_expires_at = None;
        self.failed_attempts = 0;
        Ok(())
    }

    /// Gate for protected routes. An elapsed window wipes the session.
    pub fn check_authenticated(&mut self, now: DateTime<Utc>) -> Result<AuthContext, ApiError> {
        let (Some(login_at), Some(account_id)) = (self.login_at, self.account_id) else {
            return Err(ApiError::Unauthenticated);
        };
        if !self.authenticated {
            return Err(ApiError::Unauthenticated);
        }

        let elapsed_ms = (now - login_at).num_milliseconds();
        if elapsed_ms > AUTH_WINDOW_SECS * 1000 {
            self.clear();
            return Err(ApiError::SessionExpired);
        }

        Ok(AuthContext {
            account_id,
            session_remaining_secs: (AUTH_WINDOW_SECS * 1000 - elapsed_ms) / 1000,
        })
    }

    pub fn clear(&mut self) {
        *self = SessionState::default();
    }

    /// True once nothing in this session can be used any more.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        if self.is_empty() {
            return true;
        }
        if let Some(login_at) = self.login_at {
            return now - login_at > TimeDelta::seconds(AUTH_WINDOW_SECS);
        }
        match self.code_expires_at {
            Some(expires_at) => now - expires_at > TimeDelta::seconds(PENDING_RETENTION_SECS),
            None => false,
        }
    }
}

/// In-memory session store: session id -> state.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `id`, or a fresh anonymous state if none is stored.
    pub async fn load(&self, id: &str) -> SessionState {
        self.inner.read().await.get(id).cloned().unwrap_or_default()
    }

    /// Store `state` under `id`, replacing whatever was there. Empty states
    /// are dropped instead.
    pub async fn insert(&self, id: &str, state: SessionState) {
        let mut sessions = self.inner.write().await;
        if state.is_empty() {
            sessions.remove(id);
        } else {
            sessions.insert(id.to_string(), state);
        }
    }

    /// Run `f` against the state for `id` while holding the write lock, so
    /// no other request can interleave between reading and writing it back.
    /// A state left empty is removed.
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.inner.write().await;
        let state = sessions.entry(id.to_string()).or_default();
        let out = f(state);
        if state.is_empty() {
            sessions.remove(id);
        }
        out
    }

    /// Move the state stored under `old` to `new`. Returns false when `old`
    /// held nothing.
    pub async fn rename(&self, old: &str, new: &str) -> bool {
        let mut sessions = self.inner.write().await;
        match sessions.remove(old) {
            Some(state) => {
                sessions.insert(new.to_string(), state);
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Remove stale sessions. Returns how many were dropped.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        sessions.retain(|_, state| !state.is_stale(now));
        before - sessions.len()
    }
}

/// Background task that drops stale sessions on an interval.
pub async fn run_session_sweep_loop(store: SessionStore, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let pruned = store.prune(Utc::now()).await;
        if pruned > 0 {
            info!("Session sweep: pruned {} stale sessions", pruned);
        } else {
            debug!("Session sweep: nothing to prune");
        }
    }
}
