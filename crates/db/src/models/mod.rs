//! Row structs and DTOs for the tables this crate owns.

pub mod ledger_entry;
