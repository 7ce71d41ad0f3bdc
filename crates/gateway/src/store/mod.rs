// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent inventory store backed by SQLite.
//!
//! # Schema
//! - `settings`: `(key, value, updated_at)` gateway configuration.
//! - `resources`: bridge resources keyed by rid, raw JSON mirrored.
//! - `name_index`: `(rtype, name_norm, rid)` rows derived from `resources`.
//! - `idempotency`: per-credential idempotency records with TTL.
//!
//! Opened with WAL journal mode and `synchronous=NORMAL`. A single
//! connection sits behind a mutex; operations are short and synchronous, so
//! the lock is never held across an await point.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::cache::normalize_name;
use crate::state::epoch_secs;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One `(name_norm, rid, display_name)` row from the name index.
pub use crate::resolve::NameCandidate;

/// Idempotency row status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

impl IdempotencyStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    fn parse(value: &str) -> Self {
        if value == "completed" {
            Self::Completed
        } else {
            Self::InProgress
        }
    }
}

/// A persisted idempotency record.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub credential_fingerprint: String,
    pub idempotency_key: String,
    pub action: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub response_status_code: Option<u16>,
    pub response_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

/// Error type for store operations.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StoreError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The gateway's persistent store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let mut conn = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(f(&mut conn)?)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn get_setting_int(&self, key: &str, default: i64) -> Result<i64, StoreError> {
        let value = self.get_setting(key)?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(default))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = epoch_secs();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    /// Increment an integer-valued setting, creating it at 1, and return the
    /// new value.
    pub fn increment_setting_int(&self, key: &str) -> Result<i64, StoreError> {
        let now = epoch_secs();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, '1', ?2)
                 ON CONFLICT(key) DO UPDATE SET
                   value=CAST(settings.value AS INTEGER) + 1, updated_at=excluded.updated_at",
                params![key, now],
            )?;
            conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                let raw: String = row.get(0)?;
                Ok(raw.parse::<i64>().unwrap_or(0))
            })
        })
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub fn upsert_resource(
        &self,
        rid: &str,
        rtype: &str,
        name: Option<&str>,
        json_text: &str,
    ) -> Result<(), StoreError> {
        let now = epoch_secs();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO resources (rid, rtype, name, json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(rid) DO UPDATE SET
                   rtype=excluded.rtype,
                   name=excluded.name,
                   json=excluded.json,
                   updated_at=excluded.updated_at",
                params![rid, rtype, name, json_text, now],
            )?;
            Ok(())
        })
    }

    /// Delete a resource and any name-index rows pointing at it.
    pub fn delete_resource(&self, rid: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM name_index WHERE rid = ?1", params![rid])?;
            conn.execute("DELETE FROM resources WHERE rid = ?1", params![rid])?;
            Ok(())
        })
    }

    pub fn get_resource(&self, rid: &str) -> Result<Option<Value>, StoreError> {
        let json_text: Option<String> = self.with_conn(|conn| {
            conn.query_row("SELECT json FROM resources WHERE rid = ?1", params![rid], |row| {
                row.get(0)
            })
            .optional()
        })?;
        Ok(json_text.and_then(|text| serde_json::from_str(&text).ok()))
    }

    pub fn list_resources(&self, rtype: &str) -> Result<Vec<Value>, StoreError> {
        let rows: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT json FROM resources WHERE rtype = ?1")?;
            let rows = stmt.query_map(params![rtype], |row| row.get::<_, String>(0))?;
            rows.collect()
        })?;
        Ok(rows
            .into_iter()
            .filter_map(|text| serde_json::from_str::<Value>(&text).ok())
            .filter(|value| value.is_object())
            .collect())
    }

    // -----------------------------------------------------------------------
    // Name index
    // -----------------------------------------------------------------------

    pub fn insert_name_index(
        &self,
        rtype: &str,
        name_norm: &str,
        rid: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO name_index (rtype, name_norm, rid) VALUES (?1, ?2, ?3)",
                params![rtype, name_norm, rid],
            )?;
            Ok(())
        })
    }

    pub fn delete_name_index_for_rid(&self, rid: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM name_index WHERE rid = ?1", params![rid])?;
            Ok(())
        })
    }

    pub fn list_name_candidates(&self, rtype: &str) -> Result<Vec<NameCandidate>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT ni.name_norm, ni.rid, r.name
                 FROM name_index ni
                 LEFT JOIN resources r ON r.rid = ni.rid
                 WHERE ni.rtype = ?1",
            )?;
            let rows = stmt.query_map(params![rtype], |row| {
                Ok(NameCandidate {
                    name_norm: row.get(0)?,
                    rid: row.get(1)?,
                    display_name: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    /// Rebuild the whole name index from `resources` in one transaction, so
    /// readers never observe a partially built index.
    pub fn rebuild_name_index(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM name_index", [])?;
            {
                let mut stmt =
                    tx.prepare("SELECT rid, rtype, name FROM resources WHERE name IS NOT NULL")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                let mut insert = tx.prepare(
                    "INSERT OR IGNORE INTO name_index (rtype, name_norm, rid) VALUES (?1, ?2, ?3)",
                )?;
                for row in rows {
                    let (rid, rtype, name) = row?;
                    let name_norm = normalize_name(&name);
                    if name_norm.is_empty() {
                        continue;
                    }
                    insert.execute(params![rtype, name_norm, rid])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Idempotency
    // -----------------------------------------------------------------------

    pub fn get_idempotency_record(
        &self,
        credential_fp: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT credential_fingerprint, idempotency_key, action, request_hash, status,
                        response_status_code, response_json, created_at, updated_at, expires_at
                 FROM idempotency
                 WHERE credential_fingerprint = ?1 AND idempotency_key = ?2",
                params![credential_fp, key],
                map_idempotency_row,
            )
            .optional()
        })
    }

    /// Atomically claim the `(credential, key)` pair. Returns the record plus
    /// whether this call inserted it; when `inserted` is false the caller is
    /// observing someone else's claim and must not mutate it.
    pub fn insert_idempotency_in_progress(
        &self,
        credential_fp: &str,
        key: &str,
        action: &str,
        request_hash: &str,
        ttl_seconds: i64,
    ) -> Result<(IdempotencyRecord, bool), StoreError> {
        let now = epoch_secs();
        let expires_at = now + ttl_seconds.max(1);
        let inserted = self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO idempotency (
                   credential_fingerprint, idempotency_key, action, request_hash, status,
                   response_status_code, response_json, created_at, updated_at, expires_at
                 ) VALUES (?1, ?2, ?3, ?4, 'in_progress', NULL, NULL, ?5, ?5, ?6)",
                params![credential_fp, key, action, request_hash, now, expires_at],
            )?;
            Ok(changed == 1)
        })?;

        let record = self.get_idempotency_record(credential_fp, key)?.unwrap_or_else(|| {
            // The row was deleted between insert and read; treat as our own
            // fresh in-progress claim.
            IdempotencyRecord {
                credential_fingerprint: credential_fp.to_owned(),
                idempotency_key: key.to_owned(),
                action: action.to_owned(),
                request_hash: request_hash.to_owned(),
                status: IdempotencyStatus::InProgress,
                response_status_code: None,
                response_json: None,
                created_at: now,
                updated_at: now,
                expires_at,
            }
        });
        Ok((record, inserted))
    }

    /// Transition a claimed record to `completed` with the stored response.
    pub fn complete_idempotency_record(
        &self,
        credential_fp: &str,
        key: &str,
        action: &str,
        request_hash: &str,
        status_code: u16,
        response_json: &str,
        ttl_seconds: i64,
    ) -> Result<(), StoreError> {
        let now = epoch_secs();
        let expires_at = now + ttl_seconds.max(1);
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE idempotency
                 SET action = ?1, request_hash = ?2, status = 'completed',
                     response_status_code = ?3, response_json = ?4,
                     updated_at = ?5, expires_at = ?6
                 WHERE credential_fingerprint = ?7 AND idempotency_key = ?8",
                params![
                    action,
                    request_hash,
                    status_code,
                    response_json,
                    now,
                    expires_at,
                    credential_fp,
                    key
                ],
            )?;
            Ok(())
        })
    }

    /// Delete expired idempotency rows, then enforce the hard row cap by
    /// evicting the oldest rows by `updated_at`. Returns rows deleted.
    pub fn cleanup_expired_idempotency(&self, max_rows: i64) -> Result<i64, StoreError> {
        let now = epoch_secs();
        self.with_conn(|conn| {
            let mut deleted =
                conn.execute("DELETE FROM idempotency WHERE expires_at <= ?1", params![now])?
                    as i64;

            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM idempotency", [], |row| row.get(0))?;
            if count > max_rows {
                let overflow = count - max_rows;
                deleted += conn.execute(
                    "DELETE FROM idempotency
                     WHERE rowid IN (
                       SELECT rowid FROM idempotency ORDER BY updated_at ASC LIMIT ?1
                     )",
                    params![overflow],
                )? as i64;
            }
            Ok(deleted)
        })
    }

    pub fn count_idempotency_rows(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM idempotency", [], |row| row.get(0))
        })
    }
}

fn map_idempotency_row(row: &rusqlite::Row<'_>) -> Result<IdempotencyRecord, rusqlite::Error> {
    let status: String = row.get(4)?;
    Ok(IdempotencyRecord {
        credential_fingerprint: row.get(0)?,
        idempotency_key: row.get(1)?,
        action: row.get(2)?,
        request_hash: row.get(3)?,
        status: IdempotencyStatus::parse(&status),
        response_status_code: row.get::<_, Option<i64>>(5)?.map(|code| code as u16),
        response_json: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        expires_at: row.get(9)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
