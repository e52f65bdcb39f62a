//! PostgreSQL backing for the coordinator: connection pools, the
//! `postgres` probe kind, the advisory-lock guarded migration ledger and
//! SQL-file migration steps.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod ledger;
pub mod models;
pub mod probe;
pub mod repositories;
pub mod sql_step;

pub use ledger::{PgLedger, PgLedgerLock};
pub use probe::PostgresProbe;
pub use sql_step::{sql_step, SqlMigration};

pub type DbPool = sqlx::PgPool;

/// Bound on waiting for a free pooled connection.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Create a pool that opens no connection until first use.
///
/// The ledger pool is built before the database is known to be reachable;
/// connections are only opened once the readiness gates have passed.
pub fn create_lazy_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_lazy(database_url)
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
