//! PostgreSQL migration ledger.
//!
//! Exclusivity across every replica comes from a session-level advisory
//! lock held on one dedicated pooled connection. Steps then run on that
//! same connection, each inside a transaction together with its ledger
//! insert, so a step's effect and its record commit or roll back together.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, Postgres};
use stagehand_core::backoff::BackoffPolicy;
use stagehand_core::config::validate_table_name;
use stagehand_core::migration::{LedgerEntry, LedgerError, LedgerLock, MigrationLedger, MigrationStep};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::ledger_entry::CreateLedgerRow;
use crate::repositories::LedgerRepo;
use crate::DbPool;

/// Polling schedule while another instance holds the advisory lock.
const LOCK_POLL: BackoffPolicy = BackoffPolicy {
    base: Duration::from_millis(50),
    cap: Duration::from_secs(1),
    multiplier: 2.0,
    jitter: 0.5,
};

/// Ledger stored in a PostgreSQL table, guarded by an advisory lock.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: DbPool,
    table: String,
    lock_key: i64,
}

impl PgLedger {
    /// Fails if `table` is not a plain identifier.
    pub fn new(pool: DbPool, table: impl Into<String>, lock_key: i64) -> Result<Self, sqlx::Error> {
        let table = table.into();
        validate_table_name(&table).map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;
        Ok(Self {
            pool,
            table,
            lock_key,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn lock_key(&self) -> i64 {
        self.lock_key
    }

    /// Poll `pg_try_advisory_lock` until it succeeds, `timeout` passes or
    /// `cancel` fires. Cancellation is only observed between polls, never
    /// while a lock query is in flight.
    async fn acquire_advisory_lock(
        &self,
        conn: &mut PgConnection,
        started: Instant,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        let mut retry = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LedgerError::Cancelled);
            }
            if LedgerRepo::try_lock(conn, self.lock_key)
                .await
                .map_err(LedgerError::storage)?
            {
                return Ok(());
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(LedgerError::LockTimeout(timeout));
            }
            tracing::debug!(
                lock_key = self.lock_key,
                "Ledger lock held by another instance, waiting"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
                _ = tokio::time::sleep(LOCK_POLL.jittered(retry).min(remaining)) => {}
            }
            retry += 1;
        }
    }
}

#[async_trait]
impl MigrationLedger for PgLedger {
    type Target = PgConnection;
    type Lock = PgLedgerLock;

    async fn lock(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PgLedgerLock, LedgerError> {
        let started = Instant::now();
        let acquire = tokio::time::timeout(timeout, self.pool.acquire());
        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
            acquired = acquire => match acquired {
                Ok(conn) => conn.map_err(LedgerError::storage)?,
                Err(_) => return Err(LedgerError::LockTimeout(timeout)),
            },
        };

        // A failed acquisition closes the connection instead of returning
        // it to the pool.
        if let Err(e) = self
            .acquire_advisory_lock(&mut conn, started, timeout, cancel)
            .await
        {
            drop(conn.detach());
            return Err(e);
        }

        let mut lock = PgLedgerLock {
            conn: Some(conn),
            table: self.table.clone(),
            lock_key: self.lock_key,
        };
        lock.ensure_table().await?;
        Ok(lock)
    }
}

/// Held advisory lock plus the connection that owns it.
///
/// Dropping it without [`LedgerLock::release`] closes the connection so
/// the lock cannot outlive the holder inside the pool.
pub struct PgLedgerLock {
    conn: Option<PoolConnection<Postgres>>,
    table: String,
    lock_key: i64,
}

impl std::fmt::Debug for PgLedgerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgLedgerLock")
            .field("table", &self.table)
            .field("lock_key", &self.lock_key)
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl PgLedgerLock {
    fn conn(&mut self) -> Result<&mut PoolConnection<Postgres>, LedgerError> {
        self.conn
            .as_mut()
            .ok_or_else(|| LedgerError::storage(anyhow::anyhow!("ledger lock already released")))
    }

    async fn ensure_table(&mut self) -> Result<(), LedgerError> {
        let table = self.table.clone();
        let conn = self.conn()?;
        LedgerRepo::ensure_table(conn, &table)
            .await
            .map_err(LedgerError::storage)
    }
}

#[async_trait]
impl LedgerLock for PgLedgerLock {
    type Target = PgConnection;

    async fn entries(&mut self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let table = self.table.clone();
        let conn = self.conn()?;
        let rows = LedgerRepo::list(conn, &table)
            .await
            .map_err(LedgerError::storage)?;
        Ok(rows.into_iter().map(LedgerEntry::from).collect())
    }

    async fn commit(&mut self, step: &MigrationStep<PgConnection>) -> anyhow::Result<LedgerEntry> {
        let table = self.table.clone();
        let conn = self.conn()?;
        let started = Instant::now();

        let mut tx = conn.begin().await.context("failed to open step transaction")?;
        if let Err(e) = step.action.apply(&mut tx).await {
            tx.rollback().await.context("failed to roll back step")?;
            return Err(e);
        }

        let row = LedgerRepo::insert(
            &mut tx,
            &table,
            &CreateLedgerRow {
                step_id: &step.id,
                checksum: &step.checksum,
                execution_ms: started.elapsed().as_millis() as i64,
            },
        )
        .await
        .context("failed to record step in ledger")?;

        tx.commit().await.context("failed to commit step")?;
        Ok(row.into())
    }

    async fn release(mut self) -> Result<(), LedgerError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match LedgerRepo::unlock(&mut conn, self.lock_key).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(lock_key = self.lock_key, "Ledger lock was not held at release");
                drop(conn.detach());
                Ok(())
            }
            Err(e) => {
                drop(conn.detach());
                Err(LedgerError::storage(e))
            }
        }
    }
}

impl Drop for PgLedgerLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                lock_key = self.lock_key,
                "Ledger lock dropped without release, closing its connection"
            );
            drop(conn.detach());
        }
    }
}
