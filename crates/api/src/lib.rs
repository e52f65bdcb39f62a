//! Stagehand binary support library.
//!
//! Exposes configuration loading, coordinator assembly, probe
//! construction and the health router so integration tests and the
//! `stagehand` binary share them.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod probes;
pub mod router;
pub mod routes;
pub mod state;
