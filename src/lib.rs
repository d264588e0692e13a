//! Authgate -- OAuth2 authorization-code session manager.
//!
//! Client-side token lifecycle for a hosted identity provider: acquire
//! an authorization code from the return URL, exchange it for tokens
//! via a backend exchange endpoint, persist the session, detect expiry,
//! refresh proactively, and gate application visibility on
//! authentication state.
//!
//! The exchange endpoint keeps the provider client secret off this
//! machine; this crate only ever submits the code it was handed.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;

pub use api::ApiClient;
pub use auth::{AuthFlowController, FlowOutcome, Session, SessionStorage};
pub use config::Config;
pub use error::AuthError;
