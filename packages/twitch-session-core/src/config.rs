//! Session configuration.
//!
//! Each field is resolved with priority:
//! 1. Environment variables (`TWITCH_CLIENT_ID`, `TWITCH_REDIRECT_URI`)
//! 2. Config file (`~/.config/twitch-session/config.toml`, `[twitch]` section)
//! 3. `TWITCH_CLIENT_ID` captured at build time
//! 4. Default values

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Directory name under the user config dir
pub(crate) const APP_DIR: &str = "twitch-session";

/// Config file name
const CONFIG_FILE: &str = "config.toml";

/// Environment variable name for the application client id
const ENV_CLIENT_ID: &str = "TWITCH_CLIENT_ID";

/// Environment variable name for the redirect URI override
const ENV_REDIRECT_URI: &str = "TWITCH_REDIRECT_URI";

/// Client id baked in when the binary was built, if any
const BUILD_CLIENT_ID: Option<&str> = option_env!("TWITCH_CLIENT_ID");

pub const DEFAULT_AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";
pub const DEFAULT_REVOKE_URL: &str = "https://id.twitch.tv/oauth2/revoke";
pub const DEFAULT_VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";
pub const DEFAULT_USERS_URL: &str = "https://api.twitch.tv/helix/users";

/// Redirect URI registered for the application (served by the loopback listener)
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/callback";

/// Scopes requested on every sign-in
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "user:read:email", "user:read:follows"];

/// How long the loopback listener waits for the browser redirect
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    twitch: Option<TwitchSection>,
}

#[derive(Debug, Deserialize, Default)]
struct TwitchSection {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    force_verify: Option<bool>,
    verify_state: Option<bool>,
    callback_timeout_secs: Option<u64>,
    authorize_url: Option<String>,
    revoke_url: Option<String>,
    validate_url: Option<String>,
    users_url: Option<String>,
}

/// Twitch endpoints used by the session flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    /// Hosted authorization page (browser redirect based)
    pub authorize_url: String,
    /// Token revocation (POST form)
    pub revoke_url: String,
    /// Token validation (GET, `Authorization: OAuth <token>`)
    pub validate_url: String,
    /// Helix users endpoint (GET, `Client-Id` + bearer token)
    pub users_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            revoke_url: DEFAULT_REVOKE_URL.to_string(),
            validate_url: DEFAULT_VALIDATE_URL.to_string(),
            users_url: DEFAULT_USERS_URL.to_string(),
        }
    }
}

/// Where the client id came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigSource {
    /// Set in code through `SessionConfig::new`
    Programmatic,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
    /// Captured from the build environment
    BuildTime,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Programmatic => write!(f, "programmatic"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
            ConfigSource::BuildTime => write!(f, "build-time environment"),
        }
    }
}

/// Runtime session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Ask Twitch to show the consent page even if already authorized
    pub force_verify: bool,
    /// Compare the returned `state` with the generated one
    pub verify_state: bool,
    pub callback_timeout_secs: u64,
    pub endpoints: Endpoints,
    pub source: ConfigSource,
}

impl SessionConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            force_verify: true,
            verify_state: false,
            callback_timeout_secs: DEFAULT_CALLBACK_TIMEOUT_SECS,
            endpoints: Endpoints::default(),
            source: ConfigSource::Programmatic,
        }
    }

    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_force_verify(mut self, force_verify: bool) -> Self {
        self.force_verify = force_verify;
        self
    }

    pub fn with_verify_state(mut self, verify_state: bool) -> Self {
        self.verify_state = verify_state;
        self
    }

    pub fn with_callback_timeout_secs(mut self, secs: u64) -> Self {
        self.callback_timeout_secs = secs;
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.authorize_url = url.into();
        self
    }

    pub fn with_revoke_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.revoke_url = url.into();
        self
    }

    pub fn with_validate_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.validate_url = url.into();
        self
    }

    pub fn with_users_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.users_url = url.into();
        self
    }

    /// Space-separated scope list as sent in the `scope` parameter
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Get the twitch-session config directory
pub(crate) fn app_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .context("Failed to find config directory")?;
    Ok(config_dir.join(APP_DIR))
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    app_config_dir().ok().map(|p| p.join(CONFIG_FILE))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load the session configuration from the environment and config file.
pub fn load_session_config() -> Result<SessionConfig> {
    let section = load_config_file().and_then(|f| f.twitch);
    resolve_config(section, |key| std::env::var(key).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn trim_url(value: Option<String>) -> Option<String> {
    non_empty(value).map(|u| u.trim_end_matches('/').to_string())
}

fn resolve_config(
    section: Option<TwitchSection>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SessionConfig> {
    let section = section.unwrap_or_default();

    let (client_id, source) = if let Some(id) = non_empty(env(ENV_CLIENT_ID)) {
        tracing::debug!("Using client id from environment variable");
        (id, ConfigSource::Environment)
    } else if let Some(id) = non_empty(section.client_id) {
        tracing::debug!("Using client id from config file");
        (id, ConfigSource::ConfigFile)
    } else if let Some(id) = non_empty(BUILD_CLIENT_ID.map(str::to_string)) {
        tracing::debug!("Using client id captured at build time");
        (id, ConfigSource::BuildTime)
    } else {
        return Err(anyhow::anyhow!(
            "No Twitch client id configured. Set {} or add client_id to {}",
            ENV_CLIENT_ID,
            get_config_file_path_string()
        ));
    };

    let mut config = SessionConfig::new(client_id);
    config.source = source;

    if let Some(uri) = non_empty(env(ENV_REDIRECT_URI)).or_else(|| non_empty(section.redirect_uri)) {
        config.redirect_uri = uri;
    }
    if let Some(force_verify) = section.force_verify {
        config.force_verify = force_verify;
    }
    if let Some(verify_state) = section.verify_state {
        config.verify_state = verify_state;
    }
    if let Some(secs) = section.callback_timeout_secs {
        config.callback_timeout_secs = secs;
    }
    if let Some(url) = trim_url(section.authorize_url) {
        config.endpoints.authorize_url = url;
    }
    if let Some(url) = trim_url(section.revoke_url) {
        config.endpoints.revoke_url = url;
    }
    if let Some(url) = trim_url(section.validate_url) {
        config.endpoints.validate_url = url;
    }
    if let Some(url) = trim_url(section.users_url) {
        config.endpoints.users_url = url;
    }

    Ok(config)
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/twitch-session/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Twitch Session Configuration
# Place this file at: ~/.config/twitch-session/config.toml

[twitch]
# Application client id from the Twitch developer console
# (TWITCH_CLIENT_ID in the environment takes precedence)
# client_id = "your-client-id"

# Redirect URI registered for the application
# Default: http://localhost:3000/callback
# redirect_uri = "http://localhost:3000/callback"

# Always show the Twitch consent page
# force_verify = true

# Reject sign-ins whose returned state does not match the generated one
# verify_state = false

# Seconds to wait for the browser redirect
# callback_timeout_secs = 300
"#
    .to_string()
}
