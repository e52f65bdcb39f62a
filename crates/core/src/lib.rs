//! Stagehand core: readiness probes, backoff-driven readiness gates,
//! ledger-tracked migrations and the coordinator state machine that
//! sequences them into a single "ready" signal.
//!
//! This crate owns no database driver. Probes and migration targets are
//! supplied through the [`probe::Probe`] and [`migration::MigrationLedger`]
//! traits by the `db` and `api` crates.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod migration;
pub mod probe;
pub mod types;
