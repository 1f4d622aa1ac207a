//! Authentication module for Twitch sessions.
//!
//! Provides the implicit grant authorization step, the session manager, and
//! persisted session storage.

mod authorize;
mod error;
mod session;
mod storage;

pub use authorize::{
    build_authorize_url, generate_state, outcome_from_params, parse_redirect,
    AuthorizationOutcome, AuthorizationRequest, Authorizer, LoopbackAuthorizer, PasteAuthorizer,
    UrlCallback, STATE_LENGTH,
};
pub use error::SessionError;
pub use session::{RestoreOutcome, SessionManager, SessionState};
#[cfg(feature = "keyring-storage")]
pub use storage::KeyringStore;
pub use storage::{
    default_store, get_storage_info, FileStore, MemoryStore, SessionStore, TOKEN_KEY, USER_KEY,
};
