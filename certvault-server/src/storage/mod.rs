//! SQLite storage backend: registered users and their secrets.

pub mod models;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use certvault_core::{ConflictResolver, Resolution, Secret};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use crate::store::{Result, SecretStore, StoreError, UpsertOutcome};
use models::{secret_from_row, SECRET_COLUMNS};

/// Pool size when the config does not set one.
pub const DEFAULT_CONNECTIONS: usize = 4;

/// Thread-safe server storage.
///
/// A file-backed database keeps a few connections on the same WAL file, so
/// readers never wait on each other and only write transactions queue on
/// SQLite's writer lock. The in-memory database used by tests has one.
#[derive(Clone)]
pub struct ServerStorage {
    pool: Arc<Vec<Mutex<Connection>>>,
    next: Arc<AtomicUsize>,
}

impl ServerStorage {
    pub fn with_connections(path: &Path, connections: usize) -> Result<Self> {
        let mut pool = Vec::with_capacity(connections.max(1));
        for _ in 0..connections.max(1) {
            let conn = Connection::open(path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            pool.push(Mutex::new(conn));
        }

        let storage = Self::from_pool(pool);
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let storage = Self::from_pool(vec![Mutex::new(conn)]);
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn from_pool(pool: Vec<Mutex<Connection>>) -> Self {
        Self {
            pool: Arc::new(pool),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                login TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS secrets (
                owner TEXT NOT NULL,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                data BLOB NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (owner, id),
                FOREIGN KEY (owner) REFERENCES users(login) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_secrets_owner_version
                ON secrets(owner, version);
            CREATE INDEX IF NOT EXISTS idx_secrets_deleted_version
                ON secrets(deleted, version);",
        )?;
        Ok(())
    }

    /// First idle connection, starting from a rotating slot. Waits on that
    /// slot when every connection is busy.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        let len = self.pool.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..len {
            match self.pool[(start + offset) % len].try_lock() {
                Ok(conn) => return Ok(conn),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::LockPoisoned),
            }
        }
        self.pool[start % len]
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }

    pub fn user_exists(&self, login: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE login = ?1)",
            [login],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Record a new identity. A taken login is [`StoreError::Conflict`].
    pub fn register_user(&self, login: &str) -> Result<()> {
        let conn = self.conn()?;
        match conn.execute(
            "INSERT INTO users (login, created_at) VALUES (?1, ?2)",
            params![login, Utc::now().timestamp()],
        ) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Conflict(login.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn query_secrets(&self, sql: &str, owner: &str) -> Result<Vec<Secret>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([owner], secret_from_row)?;
        let secrets = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(secrets)
    }

    /// Conditionally write one secret inside its own IMMEDIATE transaction.
    fn upsert_one(&self, owner: &str, secret: &Secret) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT version FROM secrets WHERE owner = ?1 AND id = ?2",
                params![owner, secret.id],
                |row| row.get(0),
            )
            .optional()?;

        let written = match ConflictResolver::resolve(stored, secret.version) {
            Resolution::AcceptIncoming => {
                tx.execute(
                    "INSERT INTO secrets (owner, id, kind, data, comment, version, deleted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(owner, id) DO UPDATE SET
                        kind = excluded.kind,
                        data = excluded.data,
                        comment = excluded.comment,
                        version = excluded.version,
                        deleted = excluded.deleted",
                    params![
                        owner,
                        secret.id,
                        secret.kind.as_str(),
                        secret.payload,
                        secret.comment,
                        secret.version,
                        secret.deleted,
                    ],
                )?;
                true
            }
            Resolution::KeepExisting => false,
        };

        tx.commit()?;
        Ok(written)
    }
}

impl SecretStore for ServerStorage {
    fn max_version(&self, owner: &str) -> Result<i64> {
        let conn = self.conn()?;
        let max = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM secrets WHERE owner = ?1",
            [owner],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn all_live(&self, owner: &str) -> Result<Vec<Secret>> {
        self.query_secrets(
            &format!(
                "SELECT {} FROM secrets WHERE owner = ?1 AND deleted = 0 ORDER BY version, id",
                SECRET_COLUMNS
            ),
            owner,
        )
    }

    fn by_id(&self, owner: &str, id: &str) -> Result<Option<Secret>> {
        let conn = self.conn()?;
        let secret = conn
            .query_row(
                &format!(
                    "SELECT {} FROM secrets WHERE owner = ?1 AND id = ?2 AND deleted = 0",
                    SECRET_COLUMNS
                ),
                params![owner, id],
                secret_from_row,
            )
            .optional()?;
        Ok(secret)
    }

    fn newer_than(&self, owner: &str, known: &HashMap<String, i64>) -> Result<Vec<Secret>> {
        let all = self.query_secrets(
            &format!(
                "SELECT {} FROM secrets WHERE owner = ?1 ORDER BY version, id",
                SECRET_COLUMNS
            ),
            owner,
        )?;
        Ok(all
            .into_iter()
            .filter(|s| known.get(&s.id).map_or(true, |&v| s.version > v))
            .collect())
    }

    fn upsert_if_newer(&self, owner: &str, secrets: &[Secret]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        for secret in secrets {
            if self.upsert_one(owner, secret)? {
                outcome.updated.push(secret.id.clone());
            } else {
                outcome.skipped.push(secret.id.clone());
            }
        }
        Ok(outcome)
    }

    fn purge_tombstones(&self, cutoff: i64) -> Result<usize> {
        let conn = self.conn()?;
        let purged = conn.execute(
            "DELETE FROM secrets WHERE deleted = 1 AND version < ?1",
            [cutoff],
        )?;
        Ok(purged)
    }
}
