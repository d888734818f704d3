//! Durable database backed by SQLite.
//!
//! All keys live in one `kv` table ordered by their BLOB key (SQLite compares
//! BLOBs with `memcmp`, which matches the tuple encoding's byte order). Each
//! unit of work runs inside a `BEGIN IMMEDIATE` transaction, so writers are
//! serialized by SQLite's lock; a writer that cannot get the lock within the
//! busy timeout fails with a retryable busy error.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use tracing::info;

use crate::database::{Database, RetryPolicy};
use crate::error::Result;
use crate::transaction::{KeyValue, ReadMode, Transaction, add_le};

/// How long a connection waits on another writer before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
) WITHOUT ROWID;";

/// Key-value database stored in a SQLite file.
///
/// Thread-safe via internal `Mutex<Connection>`. Open the same file from
/// several `SqliteDatabase` values (or processes) to share data between them.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::initialize(conn)?;

        info!("Session database opened at {:?}", path);
        Ok(db)
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Database for SqliteDatabase {
    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn run_once<T, F>(&self, work: &mut F) -> Result<T>
    where
        F: FnMut(&mut dyn Transaction) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = work(&mut SqliteTransaction { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }
}

/// A unit of work's view of an open SQLite transaction.
struct SqliteTransaction<'a> {
    conn: &'a Connection,
}

impl Transaction for SqliteTransaction<'_> {
    fn get(&mut self, key: &[u8], _mode: ReadMode) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .prepare_cached("SELECT value FROM kv WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn get_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
        _mode: ReadMode,
    ) -> Result<Vec<KeyValue>> {
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare_cached(
            "SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![begin, end, limit], |row| {
            Ok(KeyValue {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![key, value])?;
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM kv WHERE key = ?1")?
            .execute(params![key])?;
        Ok(())
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.conn
            .prepare_cached("DELETE FROM kv WHERE key >= ?1 AND key < ?2")?
            .execute(params![begin, end])?;
        Ok(())
    }

    fn atomic_add(&mut self, key: &[u8], delta: &[u8]) -> Result<()> {
        let current = self.get(key, ReadMode::Snapshot)?;
        let value = add_le(current.as_deref(), delta);
        self.set(key, &value)
    }
}
