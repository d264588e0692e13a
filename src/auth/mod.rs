//! Authentication flow for the hosted identity provider.
//!
//! Implements the token lifecycle state machine:
//!
//! ```text
//! Init -> code in URL? -> Exchanging -> (Authenticated | LoginRedirect)
//! Init -> no code      -> session valid? -> (Authenticated | LoginRedirect)
//! ```
//!
//! - [`AuthFlowController`] - orchestrates the end-to-end sequence
//! - [`SessionStorage`] - pluggable session persistence (file, keyring, memory)
//! - [`Session`] - token data with derived expiry and validity checks
//! - [`ExchangeClient`] - code-for-tokens exchange with response normalization
//! - [`RefreshScheduler`] - single proactive refresh timer
//!
//! # Example
//!
//! ```rust,ignore
//! use authgate::auth::AuthFlowController;
//! use authgate::config::Config;
//!
//! let (controller, mut refresh_rx) = AuthFlowController::from_config(config);
//! match controller.initialize(&returned_url).await? {
//!     FlowOutcome::Authenticated { session, .. } => { /* show the app */ }
//!     FlowOutcome::LoginRedirect { url } => { /* navigate to url */ }
//! }
//! ```

pub mod exchange;
pub mod refresh;
pub mod session;
pub mod storage;

// Re-exports
pub use exchange::{ExchangeClient, TokenPayload, normalize_response};
pub use refresh::{REFRESH_BUFFER, RefreshDue, RefreshScheduler};
pub use session::Session;
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};

#[cfg(feature = "system-keyring")]
pub use storage::KeyringSessionStorage;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{Config, StorageBackend};
use crate::error::AuthError;

// =============================================================================
// FlowOutcome
// =============================================================================

/// Terminal state of one controller activation.
#[derive(Debug)]
pub enum FlowOutcome {
    /// A valid session exists; the application surface may be shown.
    Authenticated {
        session: Session,
        /// The current URL with the authorization code stripped, when a
        /// code was present. The embedding shell must replace the
        /// visible location with this so the one-time secret is never
        /// bookmarkable.
        cleaned_url: Option<Url>,
    },
    /// No valid session; navigate the browser to this authorization URL.
    /// That is a full page navigation, and the flow restarts from Init
    /// on the provider's return trip.
    LoginRedirect { url: String },
}

impl FlowOutcome {
    /// Whether this outcome is the authenticated state.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

// =============================================================================
// AuthStatus
// =============================================================================

/// Snapshot of the stored session's state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthStatus {
    /// Whether a valid (present, unexpired) session exists.
    pub authenticated: bool,
    /// Whether a session exists but is past its expiry.
    pub expired: bool,
    /// Seconds until expiry (None when no session is stored).
    pub expires_in_secs: Option<u64>,
}

// =============================================================================
// AuthFlowController
// =============================================================================

/// Central controller for the authorization-code login flow.
///
/// Inspects the current URL for an authorization code, drives the
/// exchange, gates application visibility on the resulting session, and
/// arms the proactive refresh timer.
pub struct AuthFlowController {
    config: Arc<Config>,
    storage: Arc<dyn SessionStorage>,
    exchange: ExchangeClient,
    scheduler: RefreshScheduler,
}

impl AuthFlowController {
    /// Create a controller over the given storage.
    ///
    /// Returns the controller and the receiver delivering [`RefreshDue`]
    /// events; when one arrives the session is about to expire and the
    /// caller should navigate to [`Self::login_url`].
    pub fn new(
        config: Arc<Config>,
        storage: Arc<dyn SessionStorage>,
    ) -> (Self, mpsc::UnboundedReceiver<RefreshDue>) {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(config.exchange.timeout_secs))
            .build()
            .unwrap_or_default();

        let exchange = ExchangeClient::with_http_client(
            http_client,
            config.exchange.url.as_str(),
            storage.clone(),
        );
        let (scheduler, refresh_rx) = RefreshScheduler::new();

        (
            Self {
                config,
                storage,
                exchange,
                scheduler,
            },
            refresh_rx,
        )
    }

    /// Create a controller using the storage backend from config.
    pub fn from_config(config: Arc<Config>) -> (Self, mpsc::UnboundedReceiver<RefreshDue>) {
        let storage: Arc<dyn SessionStorage> = match config.session.storage_backend {
            StorageBackend::File => {
                Arc::new(FileSessionStorage::new(&config.session.storage_dir))
            }
            #[cfg(feature = "system-keyring")]
            StorageBackend::Keyring => Arc::new(KeyringSessionStorage::new()),
            #[cfg(not(feature = "system-keyring"))]
            StorageBackend::Keyring => {
                tracing::warn!(
                    "Keyring storage requested but system-keyring feature not enabled, falling back to file storage"
                );
                Arc::new(FileSessionStorage::new(&config.session.storage_dir))
            }
            StorageBackend::Memory => Arc::new(MemorySessionStorage::new()),
        };

        Self::new(config, storage)
    }

    /// Get a reference to the session storage.
    pub fn storage(&self) -> Arc<dyn SessionStorage> {
        self.storage.clone()
    }

    // =========================================================================
    // Flow: initialize
    // =========================================================================

    /// Run the state machine against the current navigable URL.
    ///
    /// If the URL carries an authorization code it is exchanged exactly
    /// once: the persisted pending marker is written before the network
    /// call, so a reload arriving with the same code (interrupted
    /// unload) skips re-exchange instead of burning the single-use code
    /// a second time. Exchange failures clear any partial session state
    /// and fall back to a login redirect; they are never fatal.
    pub async fn initialize(&self, current_url: &Url) -> Result<FlowOutcome, AuthError> {
        let Some(code) = extract_code(current_url) else {
            debug!("No authorization code in URL, checking stored session");
            return self.check_session(None);
        };

        // Strip the code from the visible location before anything else.
        let cleaned = cleaned_url(current_url);

        if self.storage.pending_code()?.as_deref() == Some(code.as_str()) {
            info!("Authorization code already submitted, skipping re-exchange");
            return self.check_session(Some(cleaned));
        }
        self.storage.mark_pending(&code)?;

        match self.exchange.exchange(&code).await {
            Ok(session) => {
                info!("Token exchange completed, session established");
                self.scheduler.arm(&session);
                Ok(FlowOutcome::Authenticated {
                    session,
                    cleaned_url: Some(cleaned),
                })
            }
            Err(AuthError::ExchangeInProgress) => {
                debug!("Exchange already in flight, deferring to stored session");
                self.check_session(Some(cleaned))
            }
            Err(err) => {
                warn!(error = %err, "Token exchange failed, redirecting to login");
                // No partial session state may survive a failed exchange.
                self.storage.clear_session()?;
                Ok(FlowOutcome::LoginRedirect {
                    url: self.login_url(),
                })
            }
        }
    }

    /// Evaluate the session guard against storage.
    fn check_session(&self, cleaned_url: Option<Url>) -> Result<FlowOutcome, AuthError> {
        match self.storage.load()? {
            Some(session) if session.is_valid() => {
                debug!("Stored session valid, entering authenticated state");
                self.scheduler.arm(&session);
                Ok(FlowOutcome::Authenticated {
                    session,
                    cleaned_url,
                })
            }
            Some(_) => {
                debug!("Stored session expired or incomplete");
                Ok(FlowOutcome::LoginRedirect {
                    url: self.login_url(),
                })
            }
            None => Ok(FlowOutcome::LoginRedirect {
                url: self.login_url(),
            }),
        }
    }

    // =========================================================================
    // URLs and logout
    // =========================================================================

    /// The identity provider's authorization URL for a fresh login.
    pub fn login_url(&self) -> String {
        let idp = &self.config.idp;
        let scope = idp.scopes.join(" ");
        format!(
            "{}/login?client_id={}&response_type=code&scope={}&redirect_uri={}",
            idp.base_url.trim_end_matches('/'),
            urlencoding::encode(&idp.client_id),
            urlencoding::encode(&scope),
            urlencoding::encode(&idp.redirect_uri),
        )
    }

    /// Log out: clear storage and return the provider logout URL.
    ///
    /// The provider terminates its own session upstream and redirects
    /// back to the configured URI with no code, which lands the next
    /// activation in LoginRedirect.
    pub fn logout(&self) -> Result<String, AuthError> {
        self.scheduler.disarm();
        self.storage.clear_all()?;
        info!("Session cleared, logging out upstream");

        let idp = &self.config.idp;
        Ok(format!(
            "{}/logout?client_id={}&logout_uri={}",
            idp.base_url.trim_end_matches('/'),
            urlencoding::encode(&idp.client_id),
            urlencoding::encode(&idp.redirect_uri),
        ))
    }

    /// Current authentication status from storage.
    pub fn status(&self) -> Result<AuthStatus, AuthError> {
        match self.storage.load()? {
            Some(session) => Ok(AuthStatus {
                authenticated: session.is_valid(),
                expired: session.is_expired(),
                expires_in_secs: Some(session.time_until_expiry().as_secs()),
            }),
            None => Ok(AuthStatus {
                authenticated: false,
                expired: false,
                expires_in_secs: None,
            }),
        }
    }
}

// =============================================================================
// URL helpers
// =============================================================================

/// Extract a non-empty `code` query parameter.
fn extract_code(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, v)| k == "code" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

/// The URL with the one-time auth parameters (`code`, `state`) removed.
fn cleaned_url(url: &Url) -> Url {
    let mut cleaned = url.clone();
    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "code" && k != "state")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if remaining.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned
            .query_pairs_mut()
            .clear()
            .extend_pairs(remaining.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    cleaned
}
