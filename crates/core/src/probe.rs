//! Readiness probes.
//!
//! A [`Probe`] performs one bounded check of whether a dependency is
//! currently usable and classifies the outcome as ready, timed out, or
//! unreachable. Probes never retry; retrying is the job of
//! [`ReadinessGate`](crate::gate::ReadinessGate).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Why a probe attempt did not report the dependency as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// The check did not answer within its per-call timeout.
    Timeout,
    /// The resource refused or failed the check (network, auth, status).
    Unreachable,
}

impl ProbeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single probe attempt. Produced fresh on every attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub error: Option<ProbeErrorKind>,
    /// Underlying error message, for logs only.
    pub detail: Option<String>,
    pub observed_at: Timestamp,
}

impl ProbeResult {
    /// The dependency answered and is usable.
    pub fn ready() -> Self {
        Self {
            ok: true,
            error: None,
            detail: None,
            observed_at: Utc::now(),
        }
    }

    /// The dependency did not answer within `after`.
    pub fn timed_out(after: Duration) -> Self {
        Self {
            ok: false,
            error: Some(ProbeErrorKind::Timeout),
            detail: Some(format!("no answer within {} ms", after.as_millis())),
            observed_at: Utc::now(),
        }
    }

    /// The dependency answered with a failure.
    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(ProbeErrorKind::Unreachable),
            detail: Some(detail.into()),
            observed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Probe trait
// ---------------------------------------------------------------------------

/// A single bounded check of a dependency.
///
/// Implementations must return within `timeout` and must not leave
/// anything behind beyond what the check itself opens and closes.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Check the dependency once.
    async fn check(&self, timeout: Duration) -> ProbeResult;

    /// Probe kind for logs (`"postgres"`, `"tcp"`, ...).
    fn kind(&self) -> &'static str;
}

/// Run `attempt` under `timeout` and classify its outcome.
///
/// `Ok` maps to ready, `Err` to [`ProbeErrorKind::Unreachable`], and an
/// elapsed timer to [`ProbeErrorKind::Timeout`].
pub async fn bounded<F, T, E>(timeout: Duration, attempt: F) -> ProbeResult
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(_)) => ProbeResult::ready(),
        Ok(Err(e)) => ProbeResult::unreachable(e.to_string()),
        Err(_) => ProbeResult::timed_out(timeout),
    }
}

// ---------------------------------------------------------------------------
// TCP probe
// ---------------------------------------------------------------------------

/// Succeeds when a TCP connection to `addr` (`host:port`) can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, timeout: Duration) -> ProbeResult {
        bounded(timeout, tokio::net::TcpStream::connect(self.addr.as_str())).await
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }
}
