//! Session lifecycle: sign-in, sign-out, and startup restore.
//!
//! `SessionManager` is the only owner of the in-memory session and the only
//! reader/writer of the two persisted entries. Other components observe the
//! session through [`SessionManager::subscribe`] or [`SessionManager::snapshot`].

use reqwest::header::HeaderMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use super::authorize::{AuthorizationRequest, Authorizer};
use super::error::SessionError;
use super::storage::{SessionStore, TOKEN_KEY, USER_KEY};
use crate::api::{ApiError, TwitchClient, TwitchUser};
use crate::config::SessionConfig;

/// Observable session state.
///
/// `user` and `token` are always updated together.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub user: Option<TwitchUser>,
    #[serde(skip)]
    pub token: Option<String>,
    pub is_logging_in: bool,
    pub is_logging_out: bool,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.token.is_some()
    }
}

/// Result of the startup restore attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// Nothing was persisted
    NoSession,
    /// Token validated and belongs to the persisted user
    Restored(TwitchUser),
    /// Token is valid but for a different account; persisted entries kept
    Mismatch,
    /// Validation failed; persisted entries deleted
    Invalidated,
}

#[derive(Debug, Clone, Copy)]
enum Activity {
    LoggingIn,
    LoggingOut,
}

impl Activity {
    fn set(self, state: &mut SessionState, value: bool) {
        match self {
            Activity::LoggingIn => state.is_logging_in = value,
            Activity::LoggingOut => state.is_logging_out = value,
        }
    }
}

/// Holds an in-flight flag for its lifetime; the flag drops back to false on
/// every exit path, including errors and cancelled futures.
struct ActivityGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    activity: Activity,
}

impl<'a> ActivityGuard<'a> {
    fn begin(state: &'a watch::Sender<SessionState>, activity: Activity) -> Self {
        state.send_modify(|s| activity.set(s, true));
        Self { state, activity }
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        let activity = self.activity;
        self.state.send_modify(|s| activity.set(s, false));
    }
}

pub struct SessionManager {
    config: SessionConfig,
    client: TwitchClient,
    store: Arc<dyn SessionStore>,
    authorizer: Arc<dyn Authorizer>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    /// Create a manager with an empty session. Call [`restore`](Self::restore)
    /// to pick up a persisted one, or use [`start`](Self::start).
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let client = TwitchClient::new(&config);
        let (state, _) = watch::channel(SessionState::default());
        Self {
            config,
            client,
            store,
            authorizer,
            state,
        }
    }

    /// Create a manager and run the startup restore once.
    pub async fn start(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> (Self, RestoreOutcome) {
        let manager = Self::new(config, store, authorizer);
        let outcome = manager.restore().await;
        (manager, outcome)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client(&self) -> &TwitchClient {
        &self.client
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<TwitchUser> {
        self.state.borrow().user.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_logging_in(&self) -> bool {
        self.state.borrow().is_logging_in
    }

    pub fn is_logging_out(&self) -> bool {
        self.state.borrow().is_logging_out
    }

    /// Headers for an outgoing Helix request, built from the current session.
    ///
    /// `Client-Id` is always set; `Authorization` only while signed in.
    pub fn request_headers(&self) -> Result<HeaderMap, ApiError> {
        let token = self.token();
        self.client.request_headers(token.as_deref())
    }

    /// Run the interactive sign-in and commit the resulting session.
    pub async fn sign_in(&self) -> Result<TwitchUser, SessionError> {
        let _guard = ActivityGuard::begin(&self.state, Activity::LoggingIn);

        let request = AuthorizationRequest::new(&self.config);
        tracing::info!("Starting Twitch sign-in");

        let outcome = self
            .authorizer
            .authorize(&request)
            .await
            .map_err(|e| SessionError::AccessDenied(format!("{:#}", e)))?;

        if !outcome.is_success() {
            tracing::info!("Sign-in not completed: {}", outcome.reason());
            return Err(SessionError::AccessDenied(outcome.reason()));
        }

        if self.config.verify_state && outcome.param("state") != Some(request.state.as_str()) {
            tracing::warn!("Sign-in redirect carried an unexpected state value");
            return Err(SessionError::StateMismatch);
        }

        let token = outcome
            .param("access_token")
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SessionError::AccessDenied("no access token returned".to_string()))?;

        let user = self
            .client
            .get_users(&token)
            .await
            .and_then(|users| {
                users
                    .into_iter()
                    .next()
                    .ok_or_else(|| ApiError::InvalidResponse("no user returned".to_string()))
            })
            .map_err(|e| {
                tracing::warn!("Failed to fetch user profile: {}", e);
                SessionError::ProfileFetch(e)
            })?;

        self.persist(&token, &user)?;

        self.state.send_modify(|s| {
            s.user = Some(user.clone());
            s.token = Some(token);
        });

        tracing::info!("Signed in as {} ({})", user.display_name, user.id);
        Ok(user)
    }

    /// Revoke the token (best effort) and tear the session down.
    ///
    /// Without an in-memory session the persisted token, if any, is revoked.
    ///
    /// Local teardown always happens; only storage failures are returned.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let _guard = ActivityGuard::begin(&self.state, Activity::LoggingOut);

        // A token left persisted by an unrestored session is still live
        let token = self.token().or_else(|| self.persisted_token());
        if let Some(token) = token {
            match self.client.revoke_token(&token).await {
                Ok(()) => tracing::debug!("Token revoked"),
                Err(e) => tracing::warn!("Failed to revoke token: {}", e),
            }
        }

        self.state.send_modify(|s| {
            s.user = None;
            s.token = None;
        });

        let result = self.clear_persisted();
        tracing::info!("Signed out");
        result
    }

    /// Restore and validate a persisted session.
    ///
    /// Failures are not surfaced: an invalid session is cleared and reported
    /// through the returned outcome.
    pub async fn restore(&self) -> RestoreOutcome {
        let token = match self.store.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                tracing::debug!("No persisted session");
                return RestoreOutcome::NoSession;
            }
            Err(e) => {
                tracing::warn!("Failed to read persisted session: {:#}", e);
                return RestoreOutcome::NoSession;
            }
        };

        let _guard = ActivityGuard::begin(&self.state, Activity::LoggingIn);

        match self.validate_persisted(&token).await {
            Ok(Some(user)) => {
                tracing::info!("Restored session for {}", user.display_name);
                self.state.send_modify(|s| {
                    s.user = Some(user.clone());
                    s.token = Some(token);
                });
                RestoreOutcome::Restored(user)
            }
            Ok(None) => {
                tracing::warn!("Persisted token belongs to a different account, not restoring");
                RestoreOutcome::Mismatch
            }
            Err(e) => {
                tracing::warn!("{}, clearing persisted session", e);
                self.state.send_modify(|s| {
                    s.user = None;
                    s.token = None;
                });
                if let Err(e) = self.clear_persisted() {
                    tracing::warn!("{}", e);
                }
                RestoreOutcome::Invalidated
            }
        }
    }

    /// `Ok(Some(user))` when the token validates for the persisted user,
    /// `Ok(None)` when it validates for someone else.
    async fn validate_persisted(&self, token: &str) -> Result<Option<TwitchUser>, SessionError> {
        let raw_user = self
            .store
            .get(USER_KEY)
            .map_err(SessionError::storage)?
            .ok_or_else(|| SessionError::ValidationFailure("no persisted user".to_string()))?;
        let user: TwitchUser = serde_json::from_str(&raw_user)
            .map_err(|e| SessionError::ValidationFailure(format!("corrupt user record: {}", e)))?;

        let validation = self
            .client
            .validate_token(token)
            .await
            .map_err(|e| SessionError::ValidationFailure(e.to_string()))?;
        tracing::debug!(
            "Token valid for '{}', expires in {}s",
            validation.login,
            validation.expires_in
        );

        if user.matches_login(&validation.login) {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    fn persist(&self, token: &str, user: &TwitchUser) -> Result<(), SessionError> {
        let user_json = serde_json::to_string(user)
            .map_err(|e| SessionError::Storage(format!("Failed to serialize user: {}", e)))?;

        let written = self
            .store
            .set(TOKEN_KEY, token)
            .and_then(|_| self.store.set(USER_KEY, &user_json));

        if let Err(e) = written {
            // Never leave half a session behind
            if let Err(cleanup) = self.clear_persisted() {
                tracing::warn!("{}", cleanup);
            }
            return Err(SessionError::storage(e));
        }
        Ok(())
    }

    fn persisted_token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                tracing::debug!("Failed to read persisted token: {:#}", e);
                None
            }
        }
    }

    /// Delete both persisted entries, attempting each even if one fails.
    fn clear_persisted(&self) -> Result<(), SessionError> {
        let token_result = self.store.delete(TOKEN_KEY);
        let user_result = self.store.delete(USER_KEY);
        token_result.and(user_result).map_err(SessionError::storage)
    }
}
