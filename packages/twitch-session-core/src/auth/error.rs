use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced by `SessionManager` operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The user declined, dismissed the page, or the flow itself failed
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Returned `state` differs from the one sent (only when `verify_state` is on)
    #[error("Authorization state mismatch")]
    StateMismatch,

    /// A token was obtained but the profile could not be fetched
    #[error("Failed to fetch user profile: {0}")]
    ProfileFetch(#[source] ApiError),

    #[error("Token validation failed: {0}")]
    ValidationFailure(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl SessionError {
    pub(crate) fn storage(error: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", error))
    }
}
