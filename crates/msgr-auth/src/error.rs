//! Authentication error types.

use thiserror::Error;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors from the SSO token exchange.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credentials were rejected. Never retried.
    #[error("credentials rejected: {0}")]
    BadCredentials(String),

    /// The authentication service could not be reached.
    #[error("authentication service unreachable: {0}")]
    Network(String),

    /// The service answered with something that is not a ticket.
    #[error("unexpected authentication response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => {
                Self::BadCredentials(err.to_string())
            }
            Some(status) if status == reqwest::StatusCode::FORBIDDEN => {
                Self::BadCredentials(err.to_string())
            }
            _ => Self::Network(err.to_string()),
        }
    }
}
