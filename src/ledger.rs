//! Processing ledger: append/update store recording each inbound callback,
//! its processing state, and its result.
//!
//! Writes here are observability, not control flow. The dispatcher logs and
//! swallows ledger failures; a broken ledger must never block a reply.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::LedgerError;

/// Placeholder stored and logged in place of raw encrypted blobs.
pub const REDACTED_PLACEHOLDER: &str = "[encrypted payload redacted]";

/// Fields settable on the exactly-once completion update.
#[derive(Debug, Clone, Default)]
pub struct ProcessUpdate {
    pub decrypted_params: Option<String>,
    pub is_succeed: bool,
    pub result: Option<String>,
}

#[async_trait]
pub trait ProcessingLedger: Send + Sync {
    /// Records a newly admitted callback; returns the record id.
    async fn add_queue(&self, source: &str, raw_params: &str) -> Result<i64, LedgerError>;

    /// Marks the record processed and stores the outcome. The
    /// false-to-true `is_processed` transition happens at most once; a second
    /// call returns `Ok(false)` and changes nothing.
    async fn update_process(&self, id: i64, update: ProcessUpdate) -> Result<bool, LedgerError>;

    /// Convenience: mark processed with no result payload.
    async fn set_processed(&self, id: i64) -> Result<(), LedgerError> {
        self.update_process(id, ProcessUpdate::default()).await?;
        Ok(())
    }
}

/// Ledger used when no db path is configured. Every write succeeds.
pub struct NoopLedger;

#[async_trait]
impl ProcessingLedger for NoopLedger {
    async fn add_queue(&self, _source: &str, _raw_params: &str) -> Result<i64, LedgerError> {
        Ok(0)
    }

    async fn update_process(&self, _id: i64, _update: ProcessUpdate) -> Result<bool, LedgerError> {
        Ok(true)
    }
}

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    pub fn new(db_path: PathBuf) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| LedgerError::Write(err.to_string()))?;
        }
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS callback_queue (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                source           TEXT NOT NULL,
                raw_params       TEXT NOT NULL,
                decrypted_params TEXT,
                is_processed     INTEGER NOT NULL DEFAULT 0,
                is_succeed       INTEGER NOT NULL DEFAULT 0,
                result           TEXT,
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_callback_queue_created_at
             ON callback_queue(created_at);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl ProcessingLedger for SqliteLedger {
    async fn add_queue(&self, source: &str, raw_params: &str) -> Result<i64, LedgerError> {
        let conn = self.conn.clone();
        let source = source.to_string();
        let raw_params = raw_params.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO callback_queue (source, raw_params, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![source, raw_params, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(|err| LedgerError::Write(err.to_string()))?
    }

    async fn update_process(&self, id: i64, update: ProcessUpdate) -> Result<bool, LedgerError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let now = Utc::now().timestamp();
            // The WHERE clause enforces the single false-to-true transition.
            let changed = conn.execute(
                "UPDATE callback_queue
                 SET is_processed = 1,
                     is_succeed = ?2,
                     decrypted_params = COALESCE(?3, decrypted_params),
                     result = COALESCE(?4, result),
                     updated_at = ?5
                 WHERE id = ?1 AND is_processed = 0",
                params![
                    id,
                    update.is_succeed as i64,
                    update.decrypted_params,
                    update.result,
                    now
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(|err| LedgerError::Write(err.to_string()))?
    }
}
