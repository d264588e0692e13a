//! Error types for the authentication flow.
//!
//! Every failure mode of the token exchange and session handling is a
//! variant here. The exchange client catches all of them and returns a
//! `Result` to the caller; nothing in this crate panics on a failed
//! exchange. The flow controller maps any exchange failure to a login
//! redirect.

/// Errors that can occur during authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The exchange request did not complete (DNS, connect, timeout).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The exchange endpoint rejected the code (non-2xx or `error` field).
    #[error("Token exchange rejected: {reason}")]
    ExchangeRejected { reason: String },

    /// The identity provider reported a redirect URI mismatch.
    ///
    /// Surfaced separately from other rejections because a mismatch
    /// between the registered redirect URI and the one used to obtain
    /// the code is a distinct configuration fault, not a bad code.
    #[error("Redirect URI mismatch: {0}")]
    RedirectUriMismatch(String),

    /// The response was 2xx but the expected token fields were missing
    /// or the payload could not be parsed.
    #[error("Malformed exchange response: {0}")]
    MalformedResponse(String),

    /// An exchange for this authorization code is already in flight.
    ///
    /// Codes are single-use against the exchange endpoint; a duplicate
    /// submission is a no-op, never a second network call.
    #[error("Exchange already in progress for this code")]
    ExchangeInProgress,

    /// No valid session: token absent, expired, or the protected API
    /// answered 401/403. The caller should re-authenticate.
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Session storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A URL could not be parsed or constructed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The protected API returned a non-auth error status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::ExchangeRejected {
            reason: "invalid_grant".to_string(),
        };
        assert_eq!(err.to_string(), "Token exchange rejected: invalid_grant");

        let err = AuthError::ExchangeInProgress;
        assert_eq!(
            err.to_string(),
            "Exchange already in progress for this code"
        );

        let err = AuthError::NotAuthenticated("session expired".to_string());
        assert_eq!(err.to_string(), "Not authenticated: session expired");
    }

    #[test]
    fn test_redirect_mismatch_is_distinct() {
        let err = AuthError::RedirectUriMismatch("redirect_mismatch".to_string());
        assert!(matches!(err, AuthError::RedirectUriMismatch(_)));
        assert!(err.to_string().contains("Redirect URI mismatch"));
    }
}
