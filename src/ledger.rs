//! SQLite persistence for the ledger tables.
//!
//! The store owns a single connection behind a mutex. Readers borrow it for
//! the duration of a query; mutating operations run inside [`Ledger::exclusive`],
//! which combines the cross-table write lock and the atomic transaction the
//! consensus rules require into one guard: the lock is taken once per call,
//! the transaction commits only if the closure succeeds, and both are
//! released on every exit path.

use crate::error::{ChainError, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::Storage(format!("failed to open database: {e}")))?;
        Self::init(&conn)?;
        Ok(Ledger {
            conn: Mutex::new(conn),
        })
    }

    /// An ephemeral store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChainError::Storage(format!("failed to open database: {e}")))?;
        Self::init(&conn)?;
        Ok(Ledger {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blocks (
                id TEXT PRIMARY KEY,
                generator TEXT NOT NULL,
                height INTEGER NOT NULL UNIQUE,
                date INTEGER NOT NULL,
                nonce TEXT NOT NULL,
                signature TEXT NOT NULL,
                difficulty INTEGER NOT NULL,
                argon TEXT NOT NULL,
                transactions INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                public_key TEXT NOT NULL DEFAULT '',
                block TEXT NOT NULL,
                balance INTEGER NOT NULL DEFAULT 0,
                alias TEXT UNIQUE
            );
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                public_key TEXT NOT NULL,
                block TEXT NOT NULL,
                height INTEGER NOT NULL,
                dst TEXT NOT NULL,
                val INTEGER NOT NULL,
                fee INTEGER NOT NULL,
                signature TEXT NOT NULL,
                version INTEGER NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                date INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_block ON transactions(block);
            CREATE INDEX IF NOT EXISTS idx_transactions_dst ON transactions(dst);
            CREATE TABLE IF NOT EXISTS mempool (
                id TEXT PRIMARY KEY,
                peer TEXT NOT NULL DEFAULT '',
                public_key TEXT NOT NULL,
                height INTEGER NOT NULL,
                src TEXT NOT NULL,
                dst TEXT NOT NULL,
                val INTEGER NOT NULL,
                fee INTEGER NOT NULL,
                signature TEXT NOT NULL,
                version INTEGER NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                date INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mempool_src ON mempool(src);
            CREATE INDEX IF NOT EXISTS idx_mempool_height ON mempool(height);",
        )
        .map_err(|e| ChainError::Storage(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChainError::Storage("ledger mutex poisoned".to_string()))
    }

    /// Runs a read-only closure against the shared connection. Readers are
    /// not snapshot-consistent with an in-flight writer; callers needing
    /// strict consistency re-read after the writer finishes.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        f(&guard)
    }

    /// The exclusive ledger transaction: cross-table write lock plus an
    /// atomic transaction scope. The closure's effects are committed only if
    /// it returns `Ok`; any error rolls everything back before the lock is
    /// released.
    pub fn exclusive<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let tx = guard
            .unchecked_transaction()
            .map_err(|e| ChainError::Storage(format!("failed to start transaction: {e}")))?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| ChainError::Storage(format!("failed to commit: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                // The original failure is what the caller needs to see.
                let _ = tx.rollback();
                Err(e)
            }
        }
    }
}
