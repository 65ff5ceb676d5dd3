//! SQLite ledger

use super::ledger::{transition_error, DedupLedger, Outcome, ProcessedRecord, RecordStatus};
use crate::chain::ChainRole;
use crate::error::{RelayerError, RelayerResult};
use crate::events::EventId;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::H256;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Ledger persisted in a single SQLite file shared by all relayer processes
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger at `path` and apply migrations.
    pub async fn open(path: &Path, max_connections: u32) -> RelayerResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RelayerError::Config(format!("Cannot create ledger directory {:?}: {}", parent, e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        info!("Opened ledger at {:?}", path);
        Ok(ledger)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_events (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                target_chain TEXT NOT NULL,
                status TEXT NOT NULL,
                relay_tx_hash TEXT,
                detail TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_processed_status
            ON processed_events (target_chain, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Ledger migrations complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn hash_to_text(hash: &H256) -> String {
    format!("0x{}", hex::encode(hash.as_bytes()))
}

fn hash_from_text(text: &str) -> RelayerResult<H256> {
    let bytes = hex::decode(text.trim_start_matches("0x"))
        .map_err(|e| RelayerError::Internal(format!("corrupt hash {:?} in ledger: {}", text, e)))?;
    if bytes.len() != 32 {
        return Err(RelayerError::Internal(format!(
            "corrupt hash {:?} in ledger: {} bytes",
            text,
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

fn record_from_row(row: &SqliteRow) -> RelayerResult<ProcessedRecord> {
    let tx_hash: String = row.try_get("tx_hash")?;
    let log_index: i64 = row.try_get("log_index")?;
    let target: String = row.try_get("target_chain")?;
    let status: String = row.try_get("status")?;
    let relay_tx_hash: Option<String> = row.try_get("relay_tx_hash")?;

    Ok(ProcessedRecord {
        id: EventId::new(hash_from_text(&tx_hash)?, log_index as u64),
        target: target
            .parse::<ChainRole>()
            .map_err(|e| RelayerError::Internal(format!("corrupt ledger row: {}", e)))?,
        status: status.parse()?,
        tx_hash: relay_tx_hash.as_deref().map(hash_from_text).transpose()?,
        detail: row.try_get("detail")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl DedupLedger for SqliteLedger {
    async fn already_processed(&self, id: &EventId) -> RelayerResult<bool> {
        let row = sqlx::query("SELECT 1 FROM processed_events WHERE tx_hash = ?1 AND log_index = ?2")
            .bind(hash_to_text(&id.tx_hash))
            .bind(id.log_index as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_processing(&self, id: &EventId, target: ChainRole) -> RelayerResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events
                (tx_hash, log_index, target_chain, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(hash_to_text(&id.tx_hash))
        .bind(id.log_index as i64)
        .bind(target.as_str())
        .bind(RecordStatus::Submitting.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize(&self, id: &EventId, outcome: &Outcome) -> RelayerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE processed_events
            SET status = ?1, relay_tx_hash = ?2, detail = ?3, updated_at = ?4
            WHERE tx_hash = ?5 AND log_index = ?6 AND status = 'submitting'
            "#,
        )
        .bind(outcome.status().as_str())
        .bind(outcome.tx_hash().map(|h| hash_to_text(&h)))
        .bind(outcome.detail())
        .bind(Utc::now())
        .bind(hash_to_text(&id.tx_hash))
        .bind(id.log_index as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?.map(|r| r.status);
            return Err(transition_error(current, outcome));
        }
        debug!("Finalized {} as {}", id, outcome.status());
        Ok(())
    }

    async fn get(&self, id: &EventId) -> RelayerResult<Option<ProcessedRecord>> {
        let row = sqlx::query("SELECT * FROM processed_events WHERE tx_hash = ?1 AND log_index = ?2")
            .bind(hash_to_text(&id.tx_hash))
            .bind(id.log_index as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn in_flight(&self, target: ChainRole) -> RelayerResult<Vec<ProcessedRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM processed_events
            WHERE target_chain = ?1 AND status = 'submitting'
            ORDER BY rowid
            "#,
        )
        .bind(target.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
