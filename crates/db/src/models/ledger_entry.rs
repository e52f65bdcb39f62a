//! Ledger row model and DTO.
//!
//! Maps to the configurable ledger table (default `stagehand_ledger`),
//! created on first use by [`LedgerRepo::ensure_table`](crate::repositories::LedgerRepo::ensure_table).

use serde::Serialize;
use sqlx::FromRow;
use stagehand_core::migration::LedgerEntry;
use stagehand_core::types::Timestamp;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A row from the ledger table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LedgerRow {
    pub step_id: String,
    pub checksum: String,
    pub applied_at: Timestamp,
    pub execution_ms: i64,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        Self {
            step_id: row.step_id,
            checksum: row.checksum,
            applied_at: row.applied_at,
            execution_ms: row.execution_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Create DTO
// ---------------------------------------------------------------------------

/// DTO for recording an applied step.
#[derive(Debug)]
pub struct CreateLedgerRow<'a> {
    pub step_id: &'a str,
    pub checksum: &'a str,
    pub execution_ms: i64,
}
