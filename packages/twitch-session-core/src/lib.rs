//! Twitch Session Core Library
//!
//! This crate provides the session lifecycle for a Twitch-authenticated
//! application:
//! - Implicit grant sign-in through the hosted authorization page
//! - Profile fetch from the Helix users endpoint
//! - Session persistence (keyring with file fallback)
//! - Restore and validation of a persisted session on startup
//!
//! # Features
//!
//! - `keyring-storage` (default): Use platform keyring for session storage
//! - `file-storage`: Use file-based session storage (for headless Linux)
//! - `browser` (default): Automatically open the authorization page
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use twitch_session_core::{auth, config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_session_config()?;
//!     let authorizer = Arc::new(auth::LoopbackAuthorizer::new(&config));
//!     let store = auth::default_store()?;
//!
//!     // Restores and validates any persisted session
//!     let (session, _restored) = auth::SessionManager::start(config, store, authorizer).await;
//!
//!     if !session.is_authenticated() {
//!         let user = session.sign_in().await?;
//!         println!("Signed in as {}", user.display_name);
//!     }
//!
//!     // Explicit per-request headers built from the session
//!     let headers = session.request_headers()?;
//!     println!("{} headers ready", headers.len());
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;

// Re-export commonly used types
pub use api::{ApiError, TokenValidation, TwitchClient, TwitchUser};
pub use auth::{
    AuthorizationOutcome, AuthorizationRequest, Authorizer, RestoreOutcome, SessionError,
    SessionManager, SessionState, SessionStore,
};
pub use config::{ConfigSource, Endpoints, SessionConfig};
