//! Session data and validity checks.
//!
//! A [`Session`] is the single persisted entity of the crate: the three
//! tokens returned by the exchange endpoint plus an absolute expiry
//! timestamp. The identity provider only ever reports a relative
//! `expires_in`; the absolute `expires_at` is always derived at store
//! time, never supplied directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default token lifetime when the exchange response omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Authenticated session: tokens plus derived expiry.
///
/// All four fields are written atomically as a unit on a successful
/// exchange and cleared together on logout; a failed exchange never
/// leaves partial session state behind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Signed identity assertion (JWT). Presence required for
    /// "authenticated".
    pub id_token: String,

    /// Bearer credential for downstream API calls.
    pub access_token: String,

    /// Long-lived credential for minting new tokens without re-login.
    /// Not always issued by the provider.
    pub refresh_token: Option<String>,

    /// Unix timestamp in milliseconds when the tokens expire.
    ///
    /// Computed at store time as `now + expires_in * 1000`.
    pub expires_at: i64,
}

impl Session {
    /// Create a session expiring `expires_in` seconds from now.
    pub fn new(
        id_token: String,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
    ) -> Self {
        // The exchange endpoint is not trusted to keep expires_in sane;
        // an absurd value saturates instead of overflowing.
        let expires_at = chrono::Utc::now()
            .timestamp_millis()
            .saturating_add(expires_in.saturating_mul(1000));
        Self {
            id_token,
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Create a session with a specific expiry timestamp (milliseconds).
    pub fn with_expires_at(
        id_token: String,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            id_token,
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Check whether the session is valid: identity token present and
    /// not yet expired.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.id_token.is_empty() && !self.is_expired()
    }

    /// Check the time half of validity alone.
    ///
    /// Used independently of token presence to decide refresh timing.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp_millis() >= self.expires_at
    }

    /// Duration until the session expires.
    ///
    /// Returns `Duration::ZERO` if already expired.
    pub fn time_until_expiry(&self) -> Duration {
        let now = chrono::Utc::now().timestamp_millis();
        let remaining = self.expires_at - now;
        if remaining > 0 {
            Duration::from_millis(remaining as u64)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_session() {
        let session = Session::new(
            "id".to_string(),
            "access".to_string(),
            Some("refresh".to_string()),
            3600,
        );
        assert_eq!(session.id_token, "id");
        assert_eq!(session.access_token, "access");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh"));
        assert!(session.is_valid());
        assert!(!session.is_expired());
    }

    #[test]
    fn test_expires_at_derived_from_expires_in() {
        let before = chrono::Utc::now().timestamp_millis();
        let session = Session::new("id".into(), "access".into(), None, 120);
        let after = chrono::Utc::now().timestamp_millis();

        assert!(session.expires_at >= before + 120_000);
        assert!(session.expires_at <= after + 120_000);
    }

    #[test]
    fn test_expired_session_invalid_even_with_fields() {
        let session = Session::with_expires_at(
            "id".into(),
            "access".into(),
            Some("refresh".into()),
            chrono::Utc::now().timestamp_millis() - 1,
        );
        assert!(session.is_expired());
        assert!(!session.is_valid());
        assert!(!session.id_token.is_empty());
    }

    #[test]
    fn test_empty_id_token_invalid() {
        let session = Session::new(String::new(), "access".into(), None, 3600);
        assert!(!session.is_valid());
        // Time half alone is still fine.
        assert!(!session.is_expired());
    }

    #[test]
    fn test_absurd_expires_in_saturates() {
        // Hostile or buggy endpoint values must not overflow the
        // expiry derivation.
        let session = Session::new("id".into(), "access".into(), None, i64::MAX);
        assert_eq!(session.expires_at, i64::MAX);
        assert!(session.is_valid());

        let session = Session::new("id".into(), "access".into(), None, i64::MAX / 1000);
        assert!(session.is_valid());
        assert!(!session.is_expired());
    }

    #[test]
    fn test_time_until_expiry() {
        let session = Session::new("id".into(), "access".into(), None, 3600);
        let remaining = session.time_until_expiry();
        assert!(remaining.as_secs() >= 3595);
        assert!(remaining.as_secs() <= 3600);

        let expired = Session::with_expires_at("id".into(), "access".into(), None, 0);
        assert_eq!(expired.time_until_expiry(), Duration::ZERO);
    }

    #[test]
    fn test_serialization_round_trip() {
        let session = Session::new(
            "id".into(),
            "access".into(),
            Some("refresh".into()),
            3600,
        );
        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }

    proptest! {
        /// is_valid holds exactly when the id token is non-empty and the
        /// expiry is in the future, regardless of the other fields.
        #[test]
        fn prop_validity(id_token in ".{0,16}", offset_ms in -86_400_000i64..86_400_000i64) {
            let expires_at = chrono::Utc::now().timestamp_millis() + offset_ms;
            let session = Session::with_expires_at(
                id_token.clone(),
                "access".to_string(),
                None,
                expires_at,
            );
            let now = chrono::Utc::now().timestamp_millis();
            let expected = !id_token.is_empty() && now < expires_at;
            // Skip the race window right at the boundary.
            if (expires_at - now).abs() > 1_000 {
                prop_assert_eq!(session.is_valid(), expected);
            }
        }
    }
}
