use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::Status {
            status,
            body: truncate_body(body),
        }
    }

    /// True when the server explicitly rejected the credentials (401/403)
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            ApiError::Status { status, .. } if status.as_u16() == 401 || status.as_u16() == 403
        )
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");

        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with("(truncated, 520 total bytes)"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY_LENGTH);
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated"));
    }

    #[test]
    fn test_is_unauthorized() {
        assert!(ApiError::from_status(reqwest::StatusCode::UNAUTHORIZED, "").is_unauthorized());
        assert!(ApiError::from_status(reqwest::StatusCode::FORBIDDEN, "").is_unauthorized());
        assert!(!ApiError::from_status(reqwest::StatusCode::BAD_GATEWAY, "").is_unauthorized());
        assert!(!ApiError::InvalidResponse("x".to_string()).is_unauthorized());
    }
}
