#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;
use wiremock::MockServer;

use twitch_session_core::auth::{
    AuthorizationOutcome, AuthorizationRequest, Authorizer, MemoryStore, SessionManager,
    SessionState, SessionStore,
};
use twitch_session_core::{SessionConfig, TwitchUser};

pub const CLIENT_ID: &str = "client-123";
pub const TOKEN: &str = "tok-abc";

pub fn config(server: &MockServer) -> SessionConfig {
    SessionConfig::new(CLIENT_ID)
        .with_authorize_url(format!("{}/oauth2/authorize", server.uri()))
        .with_revoke_url(format!("{}/oauth2/revoke", server.uri()))
        .with_validate_url(format!("{}/oauth2/validate", server.uri()))
        .with_users_url(format!("{}/helix/users", server.uri()))
}

pub fn user() -> TwitchUser {
    TwitchUser {
        id: "141981764".to_string(),
        login: "twitchdev".to_string(),
        display_name: "TwitchDev".to_string(),
        email: Some("dev@example.com".to_string()),
        profile_image_url: "https://static-cdn.jtvnw.net/profile.png".to_string(),
    }
}

pub fn users_body() -> serde_json::Value {
    json!({
        "data": [{
            "id": "141981764",
            "login": "twitchdev",
            "display_name": "TwitchDev",
            "type": "",
            "broadcaster_type": "partner",
            "email": "dev@example.com",
            "profile_image_url": "https://static-cdn.jtvnw.net/profile.png",
            "created_at": "2016-12-14T20:32:28Z"
        }]
    })
}

pub fn validation_body(login: &str) -> serde_json::Value {
    json!({
        "client_id": CLIENT_ID,
        "login": login,
        "scopes": ["openid", "user:read:email", "user:read:follows"],
        "user_id": "141981764",
        "expires_in": 5520838
    })
}

/// What the scripted authorizer answers with
pub enum Script {
    /// Success carrying `token` and echoing the request's state
    Token(String),
    /// Success carrying `token` and a fixed state value
    TokenWithState(String, String),
    Outcome(AuthorizationOutcome),
    Fail(String),
}

/// Authorizer that replays a script and records what it saw.
pub struct ScriptedAuthorizer {
    script: Script,
    observer: OnceLock<watch::Receiver<SessionState>>,
    pub requests: Mutex<Vec<AuthorizationRequest>>,
    pub logging_in_seen: Mutex<Vec<bool>>,
}

impl ScriptedAuthorizer {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            observer: OnceLock::new(),
            requests: Mutex::new(Vec::new()),
            logging_in_seen: Mutex::new(Vec::new()),
        })
    }

    pub fn observe(&self, rx: watch::Receiver<SessionState>) {
        let _ = self.observer.set(rx);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Authorizer for ScriptedAuthorizer {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<AuthorizationOutcome> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(rx) = self.observer.get() {
            self.logging_in_seen
                .lock()
                .unwrap()
                .push(rx.borrow().is_logging_in);
        }

        match &self.script {
            Script::Token(token) => Ok(success(token, &request.state)),
            Script::TokenWithState(token, state) => Ok(success(token, state)),
            Script::Outcome(outcome) => Ok(outcome.clone()),
            Script::Fail(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }
}

fn success(token: &str, state: &str) -> AuthorizationOutcome {
    let mut params = HashMap::new();
    params.insert("access_token".to_string(), token.to_string());
    params.insert("state".to_string(), state.to_string());
    params.insert("token_type".to_string(), "bearer".to_string());
    params.insert(
        "scope".to_string(),
        "openid user:read:email user:read:follows".to_string(),
    );
    AuthorizationOutcome::Success { params }
}

/// Memory store that records the session flags whenever it is touched.
#[derive(Default)]
pub struct ObservingStore {
    inner: MemoryStore,
    observer: OnceLock<watch::Receiver<SessionState>>,
    pub flags_seen: Mutex<Vec<(bool, bool)>>,
    pub fail_writes: bool,
}

impl ObservingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_writes() -> Arc<Self> {
        Arc::new(Self {
            fail_writes: true,
            ..Self::default()
        })
    }

    pub fn observe(&self, rx: watch::Receiver<SessionState>) {
        let _ = self.observer.set(rx);
    }

    fn record(&self) {
        if let Some(rx) = self.observer.get() {
            let state = rx.borrow();
            self.flags_seen
                .lock()
                .unwrap()
                .push((state.is_logging_in, state.is_logging_out));
        }
    }
}

impl SessionStore for ObservingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.record();
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.record();
        if self.fail_writes && key == twitch_session_core::auth::USER_KEY {
            return Err(anyhow::anyhow!("disk full"));
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.record();
        self.inner.delete(key)
    }

    fn describe(&self) -> String {
        "Observing in-memory storage".to_string()
    }
}

pub fn manager(
    config: SessionConfig,
    store: Arc<ObservingStore>,
    authorizer: Arc<ScriptedAuthorizer>,
) -> SessionManager {
    let manager = SessionManager::new(config, store.clone(), authorizer.clone());
    store.observe(manager.subscribe());
    authorizer.observe(manager.subscribe());
    manager
}
