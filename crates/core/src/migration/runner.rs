//! Applies pending migration steps exactly once under the ledger lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::validate_step_ids;
use crate::error::ConfigError;
use crate::migration::ledger::{LedgerEntry, LedgerError, LedgerLock, MigrationLedger};
use crate::migration::step::MigrationStep;

/// Default bound on waiting for another instance to release the ledger.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Steps applied by this run (the AppliedCount).
    pub applied: usize,
    /// Supplied steps that were already recorded in the ledger.
    pub already_applied: usize,
    /// Ids of the steps applied by this run, in apply order.
    pub applied_steps: Vec<String>,
    /// Time spent waiting for the ledger lock.
    pub lock_wait: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid migration steps: {0}")]
    InvalidSteps(#[from] ConfigError),

    #[error("migration ledger lock not acquired within {waited:?}")]
    LockTimeout { waited: Duration },

    #[error("migration step '{0}' changed after it was applied (checksum drift)")]
    Drift(String),

    #[error("migration step '{step_id}' failed: {cause:#}")]
    StepFailed {
        step_id: String,
        cause: anyhow::Error,
    },

    #[error("migration cancelled after {applied} step(s)")]
    Cancelled { applied: usize },

    #[error("migration ledger unavailable: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for MigrationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::LockTimeout(waited) => Self::LockTimeout { waited },
            LedgerError::Cancelled => Self::Cancelled { applied: 0 },
            other => Self::Ledger(other),
        }
    }
}

/// Runs migration steps against a [`MigrationLedger`].
pub struct MigrationRunner<L> {
    ledger: Arc<L>,
    lock_timeout: Duration,
}

impl<L: MigrationLedger> MigrationRunner<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Apply every step not yet recorded in the ledger, in ascending id
    /// order.
    ///
    /// Stops at the first failing step; steps before it stay committed and
    /// a later run resumes from the failed step. `cancel` interrupts the
    /// wait for the lock and is otherwise honoured only between steps. The
    /// ledger lock is released on every path.
    pub async fn run(
        &self,
        steps: &[MigrationStep<L::Target>],
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigrationError> {
        validate_step_ids(steps.iter().map(|s| s.id.as_str()))?;

        let started = Instant::now();
        let mut lock = self.ledger.lock(self.lock_timeout, cancel).await?;
        let lock_wait = started.elapsed();
        tracing::debug!(
            lock_wait_ms = lock_wait.as_millis() as u64,
            "Migration ledger lock acquired"
        );

        let result = apply_pending(&mut lock, steps, cancel).await;

        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "Failed to release migration ledger lock");
        }

        result.map(|report| MigrationReport {
            lock_wait,
            ..report
        })
    }
}

async fn apply_pending<K: LedgerLock>(
    lock: &mut K,
    steps: &[MigrationStep<K::Target>],
    cancel: &CancellationToken,
) -> Result<MigrationReport, MigrationError> {
    let recorded: HashMap<String, LedgerEntry> = lock
        .entries()
        .await?
        .into_iter()
        .map(|entry| (entry.step_id.clone(), entry))
        .collect();

    let supplied: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for step_id in recorded.keys().filter(|id| !supplied.contains(id.as_str())) {
        tracing::warn!(step_id = %step_id, "Ledger records a step that is no longer defined");
    }

    // Drift anywhere blocks every pending step.
    for step in steps {
        if let Some(entry) = recorded.get(&step.id) {
            if entry.checksum != step.checksum {
                tracing::error!(
                    step_id = %step.id,
                    recorded = %entry.checksum,
                    current = %step.checksum,
                    "Applied migration step was modified",
                );
                return Err(MigrationError::Drift(step.id.clone()));
            }
        }
    }

    let mut report = MigrationReport {
        already_applied: steps.iter().filter(|s| recorded.contains_key(&s.id)).count(),
        ..Default::default()
    };

    for step in steps.iter().filter(|s| !recorded.contains_key(&s.id)) {
        if cancel.is_cancelled() {
            tracing::warn!(applied = report.applied, "Migration cancelled between steps");
            return Err(MigrationError::Cancelled {
                applied: report.applied,
            });
        }

        tracing::info!(step_id = %step.id, "Applying migration step");
        match lock.commit(step).await {
            Ok(entry) => {
                tracing::info!(
                    step_id = %entry.step_id,
                    execution_ms = entry.execution_ms,
                    "Migration step applied",
                );
                report.applied += 1;
                report.applied_steps.push(entry.step_id);
            }
            Err(cause) => {
                tracing::error!(step_id = %step.id, error = %format!("{cause:#}"), "Migration step failed");
                return Err(MigrationError::StepFailed {
                    step_id: step.id.clone(),
                    cause,
                });
            }
        }
    }

    if report.applied == 0 {
        tracing::info!(
            already_applied = report.already_applied,
            "No pending migration steps"
        );
    }

    Ok(report)
}
