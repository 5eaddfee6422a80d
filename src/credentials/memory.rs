//! In-memory credential store. Nothing survives a restart.

use super::{Credential, TokenStore};
use crate::error::StoreError;
use dashmap::DashMap;

/// Credential store held in a concurrent map keyed by athlete id.
#[derive(Default)]
pub struct MemoryTokenStore {
    credentials: DashMap<i64, Credential>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn find_by_athlete_id(&self, athlete_id: i64) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .credentials
            .get(&athlete_id)
            .map(|entry| entry.value().clone()))
    }

    fn upsert(&self, credential: &Credential) -> Result<Credential, StoreError> {
        // The entry holds the shard lock until it is dropped
        let mut entry = self
            .credentials
            .entry(credential.athlete_id)
            .or_insert_with(|| credential.clone());

        let created_at = entry.created_at;
        *entry = Credential {
            created_at,
            ..credential.clone()
        };

        Ok(entry.clone())
    }

    fn delete(&self, athlete_id: i64) -> Result<bool, StoreError> {
        Ok(self.credentials.remove(&athlete_id).is_some())
    }

    fn list_athlete_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut ids: Vec<i64> = self.credentials.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }
}
