//! Encrypted credential storage using SQLite.
//!
//! Access and refresh tokens are sealed with AES-256-GCM before they touch disk.

use super::{Credential, TokenCipher, TokenStore};
use crate::error::StoreError;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Credential store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE strava_credentials (
///     athlete_id INTEGER PRIMARY KEY,   -- natural key
///     access_token TEXT NOT NULL,       -- sealed
///     refresh_token TEXT NOT NULL,      -- sealed
///     expires_at INTEGER NOT NULL,      -- epoch seconds
///     scope TEXT NOT NULL,
///     created_at TEXT NOT NULL,         -- RFC 3339
///     updated_at TEXT NOT NULL          -- RFC 3339
/// );
/// ```
///
/// The connection sits behind a mutex, so an upsert and the read-back of the
/// stored row happen as one step for every other caller.
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
    cipher: TokenCipher,
}

/// Row as it sits in the table, before unsealing.
struct StoredRow {
    athlete_id: i64,
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    scope: String,
    created_at: String,
    updated_at: String,
}

impl SqliteTokenStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (`:memory:` for tests)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher =
            TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open credentials database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS strava_credentials (
                athlete_id INTEGER PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                scope TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create strava_credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // Every write is a single statement; a poisoned guard holds no partial row
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn select(conn: &Connection, athlete_id: i64) -> Result<Option<StoredRow>, StoreError> {
        let row = conn
            .query_row(
                r#"
                SELECT athlete_id, access_token, refresh_token, expires_at,
                       scope, created_at, updated_at
                FROM strava_credentials
                WHERE athlete_id = ?1
                "#,
                params![athlete_id],
                |row| {
                    Ok(StoredRow {
                        athlete_id: row.get(0)?,
                        access_token: row.get(1)?,
                        refresh_token: row.get(2)?,
                        expires_at: row.get(3)?,
                        scope: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn unseal(&self, row: StoredRow) -> Result<Credential, StoreError> {
        let athlete_id = row.athlete_id;
        let corrupt = |reason: String| StoreError::Corrupt { athlete_id, reason };

        let expires_at = Utc
            .timestamp_opt(row.expires_at, 0)
            .single()
            .ok_or_else(|| corrupt(format!("expires_at out of range: {}", row.expires_at)))?;

        Ok(Credential {
            athlete_id,
            access_token: self.cipher.open(&row.access_token)?,
            refresh_token: self.cipher.open(&row.refresh_token)?,
            expires_at,
            scope: row.scope,
            created_at: parse_timestamp(&row.created_at).map_err(corrupt)?,
            updated_at: parse_timestamp(&row.updated_at).map_err(corrupt)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {:?}: {}", value, e))
}

impl TokenStore for SqliteTokenStore {
    fn find_by_athlete_id(&self, athlete_id: i64) -> Result<Option<Credential>, StoreError> {
        let row = Self::select(&self.lock(), athlete_id)?;
        row.map(|row| self.unseal(row)).transpose()
    }

    fn upsert(&self, credential: &Credential) -> Result<Credential, StoreError> {
        let access_token = self.cipher.seal(&credential.access_token)?;
        let refresh_token = self.cipher.seal(&credential.refresh_token)?;

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO strava_credentials (
                athlete_id, access_token, refresh_token, expires_at,
                scope, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(athlete_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            "#,
            params![
                credential.athlete_id,
                access_token,
                refresh_token,
                credential.expires_at.timestamp(),
                credential.scope,
                credential.created_at.to_rfc3339(),
                credential.updated_at.to_rfc3339(),
            ],
        )?;

        let row = Self::select(&conn, credential.athlete_id)?.ok_or_else(|| {
            StoreError::Corrupt {
                athlete_id: credential.athlete_id,
                reason: "record missing right after upsert".to_string(),
            }
        })?;
        drop(conn);

        self.unseal(row)
    }

    fn delete(&self, athlete_id: i64) -> Result<bool, StoreError> {
        let rows_affected = self.lock().execute(
            "DELETE FROM strava_credentials WHERE athlete_id = ?1",
            params![athlete_id],
        )?;
        Ok(rows_affected > 0)
    }

    fn list_athlete_ids(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT athlete_id FROM strava_credentials ORDER BY athlete_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::Duration;

    fn test_key() -> String {
        BASE64.encode([7u8; 32])
    }

    fn create_test_store() -> SqliteTokenStore {
        SqliteTokenStore::new(":memory:", &test_key()).expect("Failed to create test store")
    }

    fn whole_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
        Utc.timestamp_opt(dt.timestamp(), 0).unwrap()
    }

    fn create_test_credential(athlete_id: i64) -> Credential {
        let now = Utc::now();
        Credential {
            athlete_id,
            access_token: "access-token-12345".to_string(),
            refresh_token: "refresh-token-67890".to_string(),
            expires_at: whole_seconds(now + Duration::hours(6)),
            scope: "read,activity:read".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let store = create_test_store();
        let cred = create_test_credential(42);

        let stored = store.upsert(&cred).expect("Failed to upsert");
        assert_eq!(stored, cred);

        let found = store
            .find_by_athlete_id(42)
            .expect("Failed to find")
            .expect("Credential not found");
        assert_eq!(found, cred);
    }

    #[test]
    fn test_find_nonexistent() {
        let store = create_test_store();
        assert!(store.find_by_athlete_id(42).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_and_keeps_created_at() {
        let store = create_test_store();
        let first = create_test_credential(42);
        store.upsert(&first).unwrap();

        let second = Credential {
            access_token: "new-access".to_string(),
            refresh_token: "new-refresh".to_string(),
            expires_at: first.expires_at + Duration::hours(1),
            scope: "read".to_string(),
            created_at: first.created_at + Duration::hours(1),
            updated_at: first.updated_at + Duration::hours(1),
            ..first.clone()
        };
        let stored = store.upsert(&second).unwrap();

        assert_eq!(stored.access_token, "new-access");
        assert_eq!(stored.refresh_token, "new-refresh");
        assert_eq!(stored.expires_at, second.expires_at);
        assert_eq!(stored.scope, "read");
        assert_eq!(stored.updated_at, second.updated_at);
        assert_eq!(stored.created_at, first.created_at);

        assert_eq!(store.list_athlete_ids().unwrap(), vec![42]);
    }

    #[test]
    fn test_tokens_sealed_at_rest() {
        let store = create_test_store();
        store.upsert(&create_test_credential(42)).unwrap();

        let conn = store.lock();
        let (access, refresh): (String, String) = conn
            .query_row(
                "SELECT access_token, refresh_token FROM strava_credentials WHERE athlete_id = 42",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(!access.contains("access-token"));
        assert!(!refresh.contains("refresh-token"));
    }

    #[test]
    fn test_delete_and_list() {
        let store = create_test_store();
        store.upsert(&create_test_credential(3)).unwrap();
        store.upsert(&create_test_credential(1)).unwrap();
        store.upsert(&create_test_credential(2)).unwrap();

        assert_eq!(store.list_athlete_ids().unwrap(), vec![1, 2, 3]);

        assert!(store.delete(2).unwrap());
        assert!(!store.delete(2).unwrap());
        assert_eq!(store.list_athlete_ids().unwrap(), vec![1, 3]);
        assert!(store.find_by_athlete_id(2).unwrap().is_none());
    }

    #[test]
    fn test_reopen_with_wrong_key_fails_to_unseal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        let store = SqliteTokenStore::new(&path, &test_key()).unwrap();
        store.upsert(&create_test_credential(42)).unwrap();
        drop(store);

        let reopened = SqliteTokenStore::new(&path, &test_key()).unwrap();
        assert!(reopened.find_by_athlete_id(42).unwrap().is_some());
        drop(reopened);

        let wrong = SqliteTokenStore::new(&path, &BASE64.encode([8u8; 32])).unwrap();
        assert!(matches!(
            wrong.find_by_athlete_id(42),
            Err(StoreError::Encryption(_))
        ));
    }

    #[test]
    fn test_invalid_encryption_key() {
        assert!(SqliteTokenStore::new(":memory:", "short").is_err());
        assert!(SqliteTokenStore::new(":memory:", "not-valid-base64!@#$").is_err());
    }
}
