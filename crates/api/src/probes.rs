//! Probe construction per configured `probe_kind`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stagehand_core::config::ProbeKind;
use stagehand_core::probe::{bounded, Probe, ProbeResult, TcpProbe};
use stagehand_db::PostgresProbe;

use crate::error::AppError;

/// Succeeds when `GET url` answers with a 2xx status.
///
/// Used for transitive readiness, e.g. a proxy waiting on the backend's
/// own readiness endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, timeout: Duration) -> ProbeResult {
        bounded(timeout, async {
            let response = self.client.get(&self.url).timeout(timeout).send().await?;
            response.error_for_status().map(|_| ())
        })
        .await
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

/// Builds probes, sharing one HTTP client between every `http` probe.
#[derive(Debug, Clone)]
pub struct ProbeFactory {
    http: reqwest::Client,
}

impl ProbeFactory {
    pub fn new() -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("stagehand/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// `target` must already be resolved (no `env:` prefix).
    pub fn build(&self, kind: ProbeKind, target: &str) -> Arc<dyn Probe> {
        match kind {
            ProbeKind::Postgres => Arc::new(PostgresProbe::new(target)),
            ProbeKind::Tcp => Arc::new(TcpProbe::new(target)),
            ProbeKind::Http => Arc::new(HttpProbe::new(self.http.clone(), target)),
        }
    }
}
