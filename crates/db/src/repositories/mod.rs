//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods.
//! Ledger queries take `&mut PgConnection` rather than the pool: they must
//! run on the connection that holds the advisory lock, usually inside a
//! transaction.

pub mod ledger_repo;

pub use ledger_repo::LedgerRepo;
