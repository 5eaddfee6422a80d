//! Typed errors for grants, persistence, and the token lifecycle.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure of a token grant against the provider's token endpoint.
#[derive(Debug, Error)]
pub enum GrantError {
    /// Connection failure, timeout, or body read error
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("token endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body is not a grant result
    #[error("failed to parse grant response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("grant response has no access_token")]
    MissingAccessToken,

    #[error("grant response has no refresh_token")]
    MissingRefreshToken,

    #[error("grant response has neither expires_at nor expires_in")]
    MissingExpiry,

    /// `expires_at` or `expires_in` does not map to a representable instant
    #[error("grant response has unusable {field} value {value}")]
    InvalidExpiry { field: &'static str, value: i64 },

    /// Freshly granted token already falls inside the expiry margin
    #[error("granted access token expires too soon ({expires_at})")]
    ShortLived { expires_at: DateTime<Utc> },

    /// Authorization-code grant did not carry `athlete.id`
    #[error("authorization code grant response has no athlete id")]
    MissingAccountIdentity,
}

/// Failure of the credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("token encryption failed: {0}")]
    Encryption(String),

    /// A stored row could not be turned back into a credential
    #[error("corrupt credential record for athlete {athlete_id}: {reason}")]
    Corrupt { athlete_id: i64, reason: String },
}

/// Errors returned by [`crate::lifecycle::TokenLifecycleManager`].
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(#[source] GrantError),

    #[error("token refresh failed for athlete {athlete_id}: {source}")]
    RefreshFailed {
        athlete_id: i64,
        #[source]
        source: GrantError,
    },

    #[error("no credential stored for athlete {0}")]
    AccountNotFound(i64),

    #[error("provider did not identify the athlete in the grant response")]
    AccountIdentityMissing,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// True when the caller has to send the athlete through the
    /// authorization flow again rather than retry.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, LifecycleError::AccountNotFound(_))
    }
}
