//! Protected API client.
//!
//! Thin data-fetching client for any endpoint that requires
//! `Authorization: Bearer <id token>`. A 401/403 answer means the token
//! is no longer accepted and the caller should re-authenticate; it is
//! surfaced as [`AuthError::NotAuthenticated`], distinct from other API
//! failures.

use tracing::{debug, warn};

use crate::auth::Session;
use crate::error::AuthError;

/// Request timeout for protected API calls.
const API_TIMEOUT_SECS: u64 = 30;

/// Client for bearer-authenticated API calls.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    /// Create a new API client.
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { http_client }
    }

    /// Create an API client with a caller-supplied HTTP client.
    pub fn with_http_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// GET a JSON resource with the session's bearer token.
    ///
    /// The session is checked locally first; an expired one fails
    /// without a network call.
    pub async fn fetch_json(
        &self,
        url: &str,
        session: &Session,
    ) -> Result<serde_json::Value, AuthError> {
        if !session.is_valid() {
            return Err(AuthError::NotAuthenticated(
                "session expired or incomplete".to_string(),
            ));
        }

        debug!(%url, "Fetching protected resource");

        let response = self
            .http_client
            .get(url)
            .header(
                "Authorization",
                format!("Bearer {}", session.id_token),
            )
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            warn!(status = status.as_u16(), "API rejected the token");
            return Err(AuthError::NotAuthenticated(format!(
                "API answered {}",
                status.as_u16()
            )));
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json().await.map_err(|e| {
            AuthError::MalformedResponse(format!("API response is not JSON: {}", e))
        })?;

        Ok(body)
    }
}
