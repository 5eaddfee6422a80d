//! Persisted Strava credentials, one record per athlete.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore (trait)                 │
//! │  - find_by_athlete_id                    │
//! │  - upsert by natural key                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ SqliteTokenStore │  │ MemoryTokenStore │
//! │ AES-256-GCM      │  │ DashMap          │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use strava_auth::credentials::{Credential, SqliteTokenStore, TokenStore};
//! use chrono::{Duration, Utc};
//!
//! # fn main() -> anyhow::Result<()> {
//! let encryption_key = std::env::var("STRAVA_ENCRYPTION_KEY")?;
//! let store = SqliteTokenStore::new("credentials.db", &encryption_key)?;
//!
//! let now = Utc::now();
//! let stored = store.upsert(&Credential {
//!     athlete_id: 42,
//!     access_token: "access".to_string(),
//!     refresh_token: "refresh".to_string(),
//!     expires_at: now + Duration::hours(6),
//!     scope: "read,activity:read".to_string(),
//!     created_at: now,
//!     updated_at: now,
//! })?;
//!
//! assert_eq!(store.find_by_athlete_id(42)?, Some(stored));
//! # Ok(())
//! # }
//! ```

use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
mod memory;
mod storage;

pub use encryption::TokenCipher;
pub use memory::MemoryTokenStore;
pub use storage::SqliteTokenStore;

/// OAuth credential for one Strava athlete.
///
/// `athlete_id` is the natural key and never changes once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Strava athlete id
    pub athlete_id: i64,

    /// Bearer token for the Strava API
    pub access_token: String,

    /// Token used to obtain the next access token (may rotate on refresh)
    pub refresh_token: String,

    /// When the access token expires (UTC, whole seconds)
    pub expires_at: DateTime<Utc>,

    /// Comma-separated granted scopes
    pub scope: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Returns true if the access token must not be handed out at `now`.
    ///
    /// The comparison is strict: a token expiring exactly `margin` after
    /// `now` is still considered valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin > self.expires_at
    }
}

/// Persistence for credentials keyed by athlete id.
///
/// Implementations must make `upsert` atomic for readers and must never hold
/// two records for the same athlete.
pub trait TokenStore: Send + Sync {
    fn find_by_athlete_id(&self, athlete_id: i64) -> Result<Option<Credential>, StoreError>;

    /// Inserts or fully replaces the record for `credential.athlete_id`.
    ///
    /// Returns the record as stored. When a record already exists its
    /// `created_at` is kept.
    fn upsert(&self, credential: &Credential) -> Result<Credential, StoreError>;

    /// Administrative removal for operator tooling; the token lifecycle never
    /// deletes. Returns whether a record existed.
    fn delete(&self, athlete_id: i64) -> Result<bool, StoreError>;

    fn list_athlete_ids(&self) -> Result<Vec<i64>, StoreError>;
}
