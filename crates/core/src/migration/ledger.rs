//! Ledger traits shared by every storage backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::migration::step::MigrationStep;
use crate::types::Timestamp;

/// A durable record that a step was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub step_id: String,
    /// Checksum of the step definition at the time it was applied.
    pub checksum: String,
    pub applied_at: Timestamp,
    pub execution_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("wait for the ledger lock was cancelled")]
    Cancelled,

    #[error("ledger storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl LedgerError {
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }
}

/// Storage for applied-step records, guarded by a deployment-wide lock.
#[async_trait]
pub trait MigrationLedger: Send + Sync {
    /// What migration actions run against while the lock is held.
    type Target: Send;
    type Lock: LedgerLock<Target = Self::Target>;

    /// Take the exclusive ledger lock, giving up after `timeout` or as
    /// soon as `cancel` fires.
    async fn lock(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self::Lock, LedgerError>;
}

/// Exclusive access to the ledger. Only one holder exists across every
/// runner sharing the ledger.
#[async_trait]
pub trait LedgerLock: Send + Sized {
    type Target: Send;

    /// Every recorded entry.
    async fn entries(&mut self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Apply `step` and record it in one atomic unit: either both the
    /// step's effect and its ledger entry persist, or neither does.
    async fn commit(
        &mut self,
        step: &MigrationStep<Self::Target>,
    ) -> anyhow::Result<LedgerEntry>;

    async fn release(self) -> Result<(), LedgerError>;
}
