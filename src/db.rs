//! SQLite persistence bootstrap.
//!
//! `Db` wraps a single [`rusqlite::Connection`] and owns schema migrations.
//! Everything else (event store, cache backing store, domain repository)
//! borrows this connection rather than opening its own.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::Connection;

/// One versioned migration, applied in a transaction with the
/// `schema_migrations` dirty flag set before and cleared after — a crash
/// mid-migration leaves a row with `dirty = 1` that the next boot can detect.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("migrations/0001_initial_schema.sql"),
}];

pub struct Db {
    pub conn: Connection,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory sqlite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
            .context("failed to set pragmas")?;
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version BIGINT PRIMARY KEY,
                    dirty BOOLEAN NOT NULL DEFAULT 0
                );",
            )
            .context("failed to create schema_migrations table")?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let applied: Option<bool> = self
                .conn
                .query_row(
                    "SELECT dirty FROM schema_migrations WHERE version = ?1",
                    [migration.version],
                    |row| row.get(0),
                )
                .ok();

            match applied {
                Some(false) => continue,
                Some(true) => {
                    anyhow::bail!(
                        "migration {} ({}) is marked dirty from a previous failed run",
                        migration.version,
                        migration.name
                    );
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO schema_migrations (version, dirty) VALUES (?1, 1)",
                        [migration.version],
                    )?;
                    self.conn
                        .execute_batch(migration.sql)
                        .with_context(|| format!("migration {} failed", migration.version))?;
                    self.conn.execute(
                        "UPDATE schema_migrations SET dirty = 0 WHERE version = ?1",
                        [migration.version],
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// A thin `Arc<Mutex<_>>` handle, cheap to clone across workers and the API
/// layer. `rusqlite::Connection` is `Send` but not `Sync`; the mutex is the
/// process-wide serialization point the concurrency model (§5) assumes.
#[derive(Clone)]
pub struct DbHandle(Arc<Mutex<Db>>);

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self(Arc::new(Mutex::new(db)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Db> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
