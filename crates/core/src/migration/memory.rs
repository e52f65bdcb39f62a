//! In-process ledger.
//!
//! [`MemoryLedger`] keeps the ledger entries next to the migration target
//! itself behind one async mutex. Steps run against a staged copy of the
//! target that replaces the live one only when the step succeeds, which
//! gives the same all-or-nothing behaviour as a database transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::migration::ledger::{LedgerEntry, LedgerError, LedgerLock, MigrationLedger};
use crate::migration::step::MigrationStep;

struct LedgerState<T> {
    entries: Vec<LedgerEntry>,
    target: T,
}

/// Ledger and target shared by every runner holding a clone.
pub struct MemoryLedger<T> {
    state: Arc<Mutex<LedgerState<T>>>,
}

impl<T> Clone for MemoryLedger<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MemoryLedger<T> {
    pub fn new(target: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                entries: Vec::new(),
                target,
            })),
        }
    }

    /// Snapshot of the recorded entries, in apply order.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Snapshot of the migration target.
    pub async fn target(&self) -> T {
        self.state.lock().await.target.clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> MigrationLedger for MemoryLedger<T> {
    type Target = T;
    type Lock = MemoryLedgerLock<T>;

    async fn lock(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self::Lock, LedgerError> {
        let acquire = tokio::time::timeout(timeout, Arc::clone(&self.state).lock_owned());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LedgerError::Cancelled),
            acquired = acquire => acquired
                .map(|guard| MemoryLedgerLock { guard })
                .map_err(|_| LedgerError::LockTimeout(timeout)),
        }
    }
}

/// Held lock on a [`MemoryLedger`]; released on drop.
pub struct MemoryLedgerLock<T> {
    guard: OwnedMutexGuard<LedgerState<T>>,
}

impl<T> std::fmt::Debug for MemoryLedgerLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLedgerLock")
            .field("entries", &self.guard.entries.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> LedgerLock for MemoryLedgerLock<T> {
    type Target = T;

    async fn entries(&mut self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.guard.entries.clone())
    }

    async fn commit(&mut self, step: &MigrationStep<T>) -> anyhow::Result<LedgerEntry> {
        let started = Instant::now();
        let mut staged = self.guard.target.clone();
        step.action.apply(&mut staged).await?;

        let entry = LedgerEntry {
            step_id: step.id.clone(),
            checksum: step.checksum.clone(),
            applied_at: Utc::now(),
            execution_ms: started.elapsed().as_millis() as i64,
        };
        self.guard.target = staged;
        self.guard.entries.push(entry.clone());
        Ok(entry)
    }

    async fn release(self) -> Result<(), LedgerError> {
        drop(self.guard);
        Ok(())
    }
}
