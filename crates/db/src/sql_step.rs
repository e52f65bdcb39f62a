//! Migration steps backed by SQL source text.

use async_trait::async_trait;
use sqlx::PgConnection;
use stagehand_core::error::ConfigError;
use stagehand_core::migration::{checksum_of, MigrationAction, MigrationStep};

/// Executes a SQL script as one multi-statement batch.
///
/// Runs inside the step transaction opened by the ledger, so statements
/// that refuse to run in a transaction (`CREATE INDEX CONCURRENTLY`,
/// `VACUUM`) are not supported.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    sql: String,
}

impl SqlMigration {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

#[async_trait]
impl MigrationAction<PgConnection> for SqlMigration {
    async fn apply(&self, conn: &mut PgConnection) -> anyhow::Result<()> {
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&self.sql)).await?;
        Ok(())
    }
}

/// Build a SQL step, checking `declared` against the digest of `sql` when
/// a checksum was configured.
pub fn sql_step(
    id: &str,
    sql: String,
    declared: Option<&str>,
) -> Result<MigrationStep<PgConnection>, ConfigError> {
    let actual = checksum_of(sql.as_bytes());
    if let Some(declared) = declared {
        if !declared.eq_ignore_ascii_case(&actual) {
            return Err(ConfigError::ChecksumMismatch {
                step_id: id.to_string(),
                declared: declared.to_string(),
                actual,
            });
        }
    }
    Ok(MigrationStep::new(id, actual, SqlMigration::new(sql)))
}
