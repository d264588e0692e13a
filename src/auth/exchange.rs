//! Token exchange client.
//!
//! Trades an authorization code for tokens against the backend exchange
//! endpoint (which keeps the client secret off this machine). The
//! endpoint sits behind an API gateway whose integration style varies:
//! the token payload may arrive flat, or wrapped as
//! `{statusCode, body}` with `body` itself JSON-encoded. Field names
//! may be camelCase or snake_case. All of that is normalized here into
//! a single [`Session`]-shaped result or a typed failure.
//!
//! The client never retries and never redirects; the flow controller
//! decides what a failure means. A process-local in-flight guard makes
//! a duplicate submission of the same code a no-op, since codes are
//! single-use server-side.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use super::session::{DEFAULT_EXPIRES_IN_SECS, Session};
use super::storage::SessionStorage;
use crate::error::AuthError;

/// Request timeout for the exchange endpoint.
const EXCHANGE_TIMEOUT_SECS: u64 = 30;

/// Client for the token exchange endpoint.
pub struct ExchangeClient {
    http_client: reqwest::Client,
    endpoint: String,
    storage: Arc<dyn SessionStorage>,
    /// Codes with an exchange currently outstanding.
    in_flight: Mutex<HashSet<String>>,
}

impl ExchangeClient {
    /// Create a new exchange client against the given endpoint.
    pub fn new(endpoint: impl Into<String>, storage: Arc<dyn SessionStorage>) -> Self {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(EXCHANGE_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self::with_http_client(http_client, endpoint, storage)
    }

    /// Create an exchange client with a caller-supplied HTTP client.
    pub fn with_http_client(
        http_client: reqwest::Client,
        endpoint: impl Into<String>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
            storage,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// On success the resulting [`Session`] is written to storage as one
    /// unit and returned. Any failure leaves storage untouched. A second
    /// call with the same code while the first is outstanding returns
    /// [`AuthError::ExchangeInProgress`] without a network call.
    pub async fn exchange(&self, code: &str) -> Result<Session, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::ExchangeRejected {
                reason: "empty authorization code".to_string(),
            });
        }

        if !self.begin(code) {
            debug!("Exchange already in flight for this code, skipping");
            return Err(AuthError::ExchangeInProgress);
        }

        let result = self.do_exchange(code).await;
        self.finish(code);
        result
    }

    async fn do_exchange(&self, code: &str) -> Result<Session, AuthError> {
        debug!(code_len = code.len(), "Exchanging authorization code for tokens");

        let request_body = serde_json::json!({ "code": code });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token exchange returned error status");
            // The gateway often still carries a structured error body.
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if let Some(err) = extract_error(&value) {
                    return Err(err);
                }
            }
            return Err(AuthError::ExchangeRejected {
                reason: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            AuthError::MalformedResponse(format!("Response is not JSON: {}", e))
        })?;

        let payload = normalize_response(value)?;

        let session = Session::new(
            payload.id_token,
            payload.access_token,
            payload.refresh_token,
            payload.expires_in,
        );

        // Only a fully successful exchange ever touches storage.
        self.storage.save(&session)?;
        debug!("Token exchange successful, session stored");

        Ok(session)
    }

    /// Register a code as in flight. Returns false if it already is.
    fn begin(&self, code: &str) -> bool {
        let mut guard = self.in_flight.lock().expect("lock poisoned");
        guard.insert(code.to_string())
    }

    fn finish(&self, code: &str) {
        let mut guard = self.in_flight.lock().expect("lock poisoned");
        guard.remove(code);
    }
}

// =============================================================================
// Response normalization
// =============================================================================

/// Canonical token payload after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPayload {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Normalize an exchange response body into a [`TokenPayload`].
///
/// Unwraps the gateway proxy envelope if present, rejects payloads
/// carrying an `error` field, and resolves camelCase/snake_case field
/// aliases (camelCase wins when both are present).
pub fn normalize_response(value: Value) -> Result<TokenPayload, AuthError> {
    let tokens = unwrap_proxy_body(value)?;

    if let Some(err) = extract_error(&tokens) {
        return Err(err);
    }

    let id_token = pick_string(&tokens, "idToken", "id_token").ok_or_else(|| {
        AuthError::MalformedResponse("identity token missing from response".to_string())
    })?;

    let access_token = pick_string(&tokens, "accessToken", "access_token").unwrap_or_default();
    if access_token.is_empty() {
        debug!("Exchange response carried no access token");
    }

    let refresh_token = pick_string(&tokens, "refreshToken", "refresh_token");

    let expires_in = pick_i64(&tokens, "expiresIn", "expires_in").unwrap_or(DEFAULT_EXPIRES_IN_SECS);

    Ok(TokenPayload {
        id_token,
        access_token,
        refresh_token,
        expires_in,
    })
}

/// Unwrap the `{statusCode, body}` proxy-integration envelope.
///
/// `body` may be a JSON-encoded string or an already-nested object.
/// A response without a `body` field is taken as-is.
fn unwrap_proxy_body(value: Value) -> Result<Value, AuthError> {
    let Some(body) = value.get("body") else {
        return Ok(value);
    };

    match body {
        Value::String(inner) => serde_json::from_str(inner).map_err(|e| {
            AuthError::MalformedResponse(format!("Wrapped body is not JSON: {}", e))
        }),
        Value::Object(_) => Ok(body.clone()),
        other => Err(AuthError::MalformedResponse(format!(
            "Unexpected body wrapper type: {}",
            other
        ))),
    }
}

/// Map an `error` field in the payload to a typed failure.
///
/// `redirect_mismatch` (Cognito's name for a redirect URI mismatch) is
/// surfaced distinctly; everything else is a plain rejection.
fn extract_error(tokens: &Value) -> Option<AuthError> {
    let error = tokens.get("error")?;
    let reason = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if reason.contains("redirect_mismatch") || reason.contains("redirect_uri") {
        return Some(AuthError::RedirectUriMismatch(reason));
    }
    Some(AuthError::ExchangeRejected { reason })
}

/// Pick a non-empty string field, preferring the camelCase key.
fn pick_string(tokens: &Value, camel: &str, snake: &str) -> Option<String> {
    for key in [camel, snake] {
        if let Some(s) = tokens.get(key).and_then(Value::as_str) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Pick an integer field, preferring the camelCase key.
///
/// Accepts numeric strings too; the exchange endpoint has been seen
/// emitting both.
fn pick_i64(tokens: &Value, camel: &str, snake: &str) -> Option<i64> {
    for key in [camel, snake] {
        match tokens.get(key) {
            Some(Value::Number(n)) => return n.as_i64(),
            Some(Value::String(s)) => {
                if let Ok(parsed) = s.parse() {
                    return Some(parsed);
                }
            }
            _ => {}
        }
    }
    None
}
