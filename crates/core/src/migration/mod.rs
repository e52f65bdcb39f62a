//! Ledger-tracked migrations.
//!
//! - [`step`]: the [`MigrationStep`] definition and its checksum.
//! - [`ledger`]: the [`MigrationLedger`] / [`LedgerLock`] storage traits.
//! - [`memory`]: an in-process ledger for embedding and tests.
//! - [`runner`]: the [`MigrationRunner`] that applies pending steps
//!   exactly once under the ledger lock.

pub mod ledger;
pub mod memory;
pub mod runner;
pub mod step;

pub use ledger::{LedgerEntry, LedgerError, LedgerLock, MigrationLedger};
pub use memory::MemoryLedger;
pub use runner::{MigrationError, MigrationReport, MigrationRunner, DEFAULT_LOCK_TIMEOUT};
pub use step::{checksum_of, MigrationAction, MigrationStep};
