//! Anti-forgery state for the authorization redirect.
//!
//! Every authorization attempt gets a fresh nonce that the callback must
//! present exactly once, before the attempt expires.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One pending authorization attempt
#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    /// Scope requested in the redirect
    pub requested_scope: String,
    pub issued_at: DateTime<Utc>,
}

/// Pending authorization attempts keyed by their state nonce.
#[derive(Clone)]
pub struct StateManager {
    pending: Arc<DashMap<String, PendingAuthorization>>,
    expiry: Duration,
}

impl StateManager {
    /// `expiry_seconds`: how long a nonce is accepted after issue
    pub fn new(expiry_seconds: i64) -> Result<Self> {
        let expiry = Duration::try_seconds(expiry_seconds)
            .ok_or_else(|| anyhow!("State expiry of {} seconds is out of range", expiry_seconds))?;

        Ok(Self {
            pending: Arc::new(DashMap::new()),
            expiry,
        })
    }

    /// Issues a new nonce (UUID v4) for an authorization attempt.
    pub fn issue(&self, requested_scope: &str) -> String {
        let nonce = Uuid::new_v4().to_string();
        self.pending.insert(
            nonce.clone(),
            PendingAuthorization {
                requested_scope: requested_scope.to_string(),
                issued_at: Utc::now(),
            },
        );
        nonce
    }

    /// Removes the nonce and returns its attempt if it was issued here and
    /// has not expired. A nonce never validates twice.
    pub fn consume(&self, nonce: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.pending.remove(nonce)?;

        if Utc::now() - pending.issued_at > self.expiry {
            return None;
        }

        Some(pending)
    }

    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.pending
            .retain(|_, pending| now - pending.issued_at <= self.expiry);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Periodically drops attempts whose callback never arrived.
///
/// An `interval_seconds` of zero is treated as one second.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        manager.purge_expired();
        tracing::debug!(
            pending = manager.pending_count(),
            "OAuth state cleanup complete"
        );
    }
}
