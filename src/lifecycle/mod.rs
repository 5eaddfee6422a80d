//! Token lifecycle: code exchange, expiry detection, and refresh on demand.
//!
//! A credential moves through `Absent → Valid → Expiring → Refreshed (→ Valid)`.
//! There is no background timer; refresh happens lazily when a caller asks for
//! a usable access token and the stored one falls inside the expiry margin.
//!
//! Refreshes are serialized per athlete. Two callers that both observe an
//! expiring token issue one provider call; the second waits for the first and
//! then reads the refreshed record.

mod clock;

pub use clock::{Clock, SystemClock};

use crate::config::DEFAULT_SCOPE;
use crate::credentials::{Credential, TokenStore};
use crate::error::{GrantError, LifecycleError};
use crate::oauth::AuthorizationClient;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// A token is treated as expired this many seconds before its `expires_at`.
pub const EXPIRY_MARGIN_SECS: i64 = 300;

pub fn expiry_margin() -> Duration {
    Duration::seconds(EXPIRY_MARGIN_SECS)
}

type Result<T> = std::result::Result<T, LifecycleError>;

/// Orchestrates grants against the provider and persistence of the result.
pub struct TokenLifecycleManager {
    store: Arc<dyn TokenStore>,
    client: Arc<dyn AuthorizationClient>,
    clock: Arc<dyn Clock>,
    /// Scope recorded when neither the callback nor the provider reports one
    default_scope: String,
    /// Per-athlete guard around read-modify-write of a credential. An entry
    /// lives only while some caller holds or waits on it.
    athlete_guards: DashMap<i64, Arc<Mutex<()>>>,
}

/// Held athlete guard. Dropping it unlocks and removes the map entry once no
/// other caller references it.
struct AthleteLock<'a> {
    guards: &'a DashMap<i64, Arc<Mutex<()>>>,
    athlete_id: i64,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for AthleteLock<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.guards
            .remove_if(&self.athlete_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl TokenLifecycleManager {
    pub fn new(store: Arc<dyn TokenStore>, client: Arc<dyn AuthorizationClient>) -> Self {
        Self {
            store,
            client,
            clock: Arc::new(SystemClock),
            default_scope: DEFAULT_SCOPE.to_string(),
            athlete_guards: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    async fn lock_athlete(&self, athlete_id: i64) -> AthleteLock<'_> {
        let mutex = self
            .athlete_guards
            .entry(athlete_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let mut lock = AthleteLock {
            guards: &self.athlete_guards,
            athlete_id,
            held: None,
        };
        lock.held = Some(mutex.lock_owned().await);
        lock
    }

    fn find(&self, athlete_id: i64) -> Result<Credential> {
        self.store
            .find_by_athlete_id(athlete_id)?
            .ok_or(LifecycleError::AccountNotFound(athlete_id))
    }

    /// Exchanges an authorization code and stores the resulting credential.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential> {
        self.exchange_code_with_scope(code, None).await
    }

    /// Like [`exchange_code`](Self::exchange_code), recording `granted_scope`
    /// (the `scope` the provider appended to the callback) when present.
    ///
    /// Re-authorizing a known athlete overwrites the stored record in place.
    pub async fn exchange_code_with_scope(
        &self,
        code: &str,
        granted_scope: Option<&str>,
    ) -> Result<Credential> {
        let grant = self
            .client
            .exchange_authorization_code(code)
            .await
            .map_err(|e| match e {
                GrantError::MissingAccountIdentity => LifecycleError::AccountIdentityMissing,
                other => {
                    warn!(error = %other, "Authorization code exchange failed");
                    LifecycleError::ExchangeFailed(other)
                }
            })?;

        let athlete_id = grant
            .athlete_id
            .ok_or(LifecycleError::AccountIdentityMissing)?;

        let scope = granted_scope
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or(grant.scope)
            .unwrap_or_else(|| self.default_scope.clone());

        let _lock = self.lock_athlete(athlete_id).await;

        let now = self.clock.now();
        let credential = match self.store.find_by_athlete_id(athlete_id)? {
            Some(existing) => Credential {
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                expires_at: grant.expires_at,
                scope,
                updated_at: next_update_stamp(existing.updated_at, now),
                ..existing
            },
            None => Credential {
                athlete_id,
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                expires_at: grant.expires_at,
                scope,
                created_at: now,
                updated_at: now,
            },
        };

        let stored = self.store.upsert(&credential)?;

        info!(
            athlete_id,
            athlete = grant.athlete_name.as_deref().unwrap_or("unknown"),
            expires_at = %stored.expires_at,
            "Stored Strava credential"
        );

        Ok(stored)
    }

    /// Refreshes the athlete's access token unconditionally.
    pub async fn refresh_access_token(&self, athlete_id: i64) -> Result<Credential> {
        // Unknown athletes never get a guard entry
        self.find(athlete_id)?;

        let _lock = self.lock_athlete(athlete_id).await;
        let current = self.find(athlete_id)?;
        self.refresh_locked(current).await
    }

    /// Caller must hold the athlete guard.
    async fn refresh_locked(&self, current: Credential) -> Result<Credential> {
        let athlete_id = current.athlete_id;
        debug!(athlete_id, "Refreshing access token");

        let grant = self
            .client
            .refresh_token(&current.refresh_token)
            .await
            .map_err(|source| {
                warn!(athlete_id, error = %source, "Token refresh failed");
                LifecycleError::RefreshFailed { athlete_id, source }
            })?;

        let now = self.clock.now();
        let refreshed = Credential {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant.expires_at,
            updated_at: next_update_stamp(current.updated_at, now),
            ..current
        };

        let stored = self.store.upsert(&refreshed)?;

        info!(
            athlete_id,
            expires_at = %stored.expires_at,
            "Access token refreshed"
        );

        Ok(stored)
    }

    /// Returns an access token that stays valid for at least
    /// [`EXPIRY_MARGIN_SECS`], refreshing first if needed.
    pub async fn get_valid_access_token(&self, athlete_id: i64) -> Result<String> {
        let current = self.find(athlete_id)?;
        if !current.is_expired_at(self.clock.now(), expiry_margin()) {
            debug!(athlete_id, "Using stored access token");
            return Ok(current.access_token);
        }

        let _lock = self.lock_athlete(athlete_id).await;

        // Re-read: the guard may have been held by a refresh for this athlete
        let latest = self.find(athlete_id)?;
        if !latest.is_expired_at(self.clock.now(), expiry_margin()) {
            debug!(athlete_id, "Access token refreshed by concurrent caller");
            return Ok(latest.access_token);
        }

        info!(
            athlete_id,
            expires_at = %latest.expires_at,
            "Access token expiring, refreshing"
        );
        let refreshed = self.refresh_locked(latest).await?;

        if refreshed.is_expired_at(self.clock.now(), expiry_margin()) {
            return Err(LifecycleError::RefreshFailed {
                athlete_id,
                source: GrantError::ShortLived {
                    expires_at: refreshed.expires_at,
                },
            });
        }

        Ok(refreshed.access_token)
    }
}

/// `now`, unless the clock has not moved past the previous stamp.
fn next_update_stamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}
