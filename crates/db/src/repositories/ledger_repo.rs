//! Repository for the migration ledger table.
//!
//! The table name is configurable and is interpolated into the SQL text;
//! callers must pass a name accepted by
//! [`validate_table_name`](stagehand_core::config::validate_table_name).

use sqlx::PgConnection;

use crate::models::ledger_entry::{CreateLedgerRow, LedgerRow};

/// Column list for ledger queries.
const COLUMNS: &str = "step_id, checksum, applied_at, execution_ms";

/// Provides query operations for the migration ledger.
pub struct LedgerRepo;

impl LedgerRepo {
    /// Create the ledger table if it does not exist yet.
    pub async fn ensure_table(conn: &mut PgConnection, table: &str) -> Result<(), sqlx::Error> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {table} ( \
                step_id TEXT PRIMARY KEY, \
                checksum TEXT NOT NULL, \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
                execution_ms BIGINT NOT NULL \
             )"
        );
        sqlx::query(&query).execute(conn).await?;
        Ok(())
    }

    /// List every recorded step, in id order.
    pub async fn list(conn: &mut PgConnection, table: &str) -> Result<Vec<LedgerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM {table} ORDER BY step_id");
        sqlx::query_as::<_, LedgerRow>(&query).fetch_all(conn).await
    }

    /// Record an applied step.
    pub async fn insert(
        conn: &mut PgConnection,
        table: &str,
        row: &CreateLedgerRow<'_>,
    ) -> Result<LedgerRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO {table} (step_id, checksum, execution_ms) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LedgerRow>(&query)
            .bind(row.step_id)
            .bind(row.checksum)
            .bind(row.execution_ms)
            .fetch_one(conn)
            .await
    }

    /// Try to take the session-level advisory lock `key` without waiting.
    pub async fn try_lock(conn: &mut PgConnection, key: i64) -> Result<bool, sqlx::Error> {
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(conn)
            .await?;
        Ok(acquired)
    }

    /// Release the session-level advisory lock `key`.
    ///
    /// Returns `false` if this session did not hold it.
    pub async fn unlock(conn: &mut PgConnection, key: i64) -> Result<bool, sqlx::Error> {
        let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .fetch_one(conn)
            .await?;
        Ok(released)
    }
}
