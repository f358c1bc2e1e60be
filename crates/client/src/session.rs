//! Session context.
//!
//! Holds the auth record for the running session and is passed explicitly
//! to the REST client and everything built on it. Token changes bump an
//! epoch so the REST client can tell whether a refresh already happened
//! while it was waiting.

use std::sync::Arc;

use chrono::Utc;
use shared::jwt::Claims;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::auth::{AuthRecord, TokenStore};
use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    Active,
    /// Refresh failed; every view must return to the login state.
    Expired,
}

/// Access token together with the epoch it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub access: Option<String>,
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    record: AuthRecord,
    epoch: u64,
}

pub struct SessionContext {
    store: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    refresh_gate: Mutex<()>,
    status_tx: watch::Sender<SessionStatus>,
    leeway_secs: i64,
}

impl SessionContext {
    pub fn new(store: Arc<dyn TokenStore>, leeway_secs: i64) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::LoggedOut);
        Self {
            store,
            state: RwLock::new(SessionState::default()),
            refresh_gate: Mutex::new(()),
            status_tx,
            leeway_secs,
        }
    }

    /// Loads the persisted record. A stored session counts as active when it
    /// still has a refresh token, even if the access token has expired.
    pub async fn init(&self) -> Result<SessionStatus, ClientError> {
        let record = self.store.load().await?.unwrap_or_default();
        let status = if record.access.is_some() || record.refresh.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::LoggedOut
        };

        info!(
            status = ?status,
            user_id = ?record.user.as_ref().and_then(|u| u.user_id),
            "Session initialized"
        );

        let mut state = self.state.write().await;
        state.record = record;
        state.epoch += 1;
        drop(state);

        self.status_tx.send_replace(status);
        Ok(status)
    }

    /// Flushes the current record. Leaves a logged-out or expired session
    /// cleared.
    pub async fn teardown(&self) -> Result<(), ClientError> {
        match self.status() {
            SessionStatus::Active => {
                let record = self.state.read().await.record.clone();
                self.store.save(&record).await
            }
            SessionStatus::LoggedOut | SessionStatus::Expired => self.store.clear().await,
        }
    }

    pub async fn snapshot(&self) -> TokenSnapshot {
        let state = self.state.read().await;
        TokenSnapshot {
            access: state.record.access.clone(),
            epoch: state.epoch,
        }
    }

    pub async fn get_token(&self) -> Option<String> {
        self.state.read().await.record.access.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state.read().await.record.refresh.clone()
    }

    pub async fn current_user(&self) -> Option<Claims> {
        self.state.read().await.record.user.clone()
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    /// Access token present and unexpired.
    pub async fn is_valid(&self) -> bool {
        self.state
            .read()
            .await
            .record
            .is_valid_at(Utc::now(), self.leeway_secs)
    }

    /// Replaces the access token, keeping the refresh token.
    pub async fn set_token(&self, access: impl Into<String>) -> Result<(), ClientError> {
        let refresh = self.refresh_token().await;
        self.set_tokens(access, refresh).await
    }

    /// Stores a new token pair. A missing refresh token keeps the old one.
    pub async fn set_tokens(
        &self,
        access: impl Into<String>,
        refresh: Option<String>,
    ) -> Result<(), ClientError> {
        let record = {
            let mut state = self.state.write().await;
            let refresh = refresh.or_else(|| state.record.refresh.take());
            state.record = AuthRecord::from_tokens(access, refresh);
            state.epoch += 1;
            state.record.clone()
        };
        self.status_tx.send_replace(SessionStatus::Active);
        self.store.save(&record).await
    }

    /// Logout: drops the record from memory and storage.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.reset_state().await;
        self.status_tx.send_replace(SessionStatus::LoggedOut);
        info!("Session cleared");
        self.store.clear().await
    }

    /// Marks the session expired after a failed refresh and clears storage.
    pub async fn expire(&self) {
        self.reset_state().await;
        self.status_tx.send_replace(SessionStatus::Expired);
        warn!("Session expired, login required");
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear persisted auth record");
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    pub fn is_expired(&self) -> bool {
        self.status() == SessionStatus::Expired
    }

    /// Watch channel carrying every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Serializes refresh attempts; held for the whole refresh exchange.
    pub(crate) async fn refresh_guard(&self) -> MutexGuard<'_, ()> {
        self.refresh_gate.lock().await
    }

    async fn reset_state(&self) {
        let mut state = self.state.write().await;
        state.record = AuthRecord::default();
        state.epoch += 1;
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("status", &self.status())
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}
