//! The `postgres` probe kind.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use stagehand_core::probe::{bounded, Probe, ProbeResult};

/// Succeeds when a fresh session can be opened and answers `SELECT 1`.
///
/// The session is closed again before the probe returns; no pool is kept.
#[derive(Clone)]
pub struct PostgresProbe {
    url: String,
}

impl PostgresProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl std::fmt::Debug for PostgresProbe {
    // The URL may carry a password.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresProbe").finish_non_exhaustive()
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    async fn check(&self, timeout: Duration) -> ProbeResult {
        bounded(timeout, async {
            let mut conn = PgConnection::connect(&self.url).await?;
            sqlx::query("SELECT 1").execute(&mut conn).await?;
            conn.close().await
        })
        .await
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}
