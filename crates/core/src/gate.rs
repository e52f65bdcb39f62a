//! Readiness gates: retry a dependency's probe with backoff until it
//! reports ready, its deadline passes, or the wait is cancelled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::probe::{Probe, ProbeErrorKind, ProbeResult};

/// Default overall deadline for a dependency to become ready.
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single probe attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Dependency
// ---------------------------------------------------------------------------

/// A named service the coordinator waits on before migrating.
///
/// Built at configuration time and never mutated afterwards.
#[derive(Clone)]
pub struct Dependency {
    pub name: String,
    pub probe: Arc<dyn Probe>,
    /// Deadline for the dependency to become ready, measured from the
    /// first attempt.
    pub timeout: Duration,
    /// Bound on each individual probe attempt.
    pub attempt_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Required dependencies must all become ready; optional ones are
    /// waited for but their failure is only logged.
    pub required: bool,
}

impl Dependency {
    pub fn new(name: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        Self {
            name: name.into(),
            probe,
            timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            required: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Mark the dependency as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("name", &self.name)
            .field("probe", &self.probe.kind())
            .field("timeout", &self.timeout)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("backoff", &self.backoff)
            .field("required", &self.required)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Gate outcome
// ---------------------------------------------------------------------------

/// Summary of a gate that succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateReport {
    pub dependency: String,
    /// Total probe attempts, including the successful one.
    pub attempts: u32,
    pub failures: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error(
        "dependency '{dependency}' not ready after {attempts} attempt(s) in {elapsed:?} (last error: {})",
        .last_error.map(|k| k.as_str()).unwrap_or("none")
    )]
    DeadlineExceeded {
        dependency: String,
        attempts: u32,
        elapsed: Duration,
        last_error: Option<ProbeErrorKind>,
    },

    #[error("wait for dependency '{dependency}' was cancelled")]
    Cancelled { dependency: String },
}

impl GateError {
    pub fn dependency(&self) -> &str {
        match self {
            Self::DeadlineExceeded { dependency, .. } | Self::Cancelled { dependency } => dependency,
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Drives a [`Dependency`]'s probe until it succeeds or gives up.
pub struct ReadinessGate;

impl ReadinessGate {
    /// Wait for `dependency` to become ready.
    ///
    /// Attempts are sequential. Cancellation is checked before every
    /// attempt and every sleep, and interrupts a sleep immediately; an
    /// attempt already in flight always runs to its own timeout.
    pub async fn wait(
        dependency: &Dependency,
        cancel: &CancellationToken,
    ) -> Result<GateReport, GateError> {
        let started = Instant::now();
        let deadline = started + dependency.timeout;
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(dependency));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(deadline_exceeded(dependency, attempts, started, last_error));
            }

            attempts += 1;
            let result = attempt(dependency, dependency.attempt_timeout.min(remaining)).await;

            if result.ok {
                let report = GateReport {
                    dependency: dependency.name.clone(),
                    attempts,
                    failures: attempts - 1,
                    elapsed: started.elapsed(),
                };
                tracing::info!(
                    dependency = %dependency.name,
                    attempts,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Dependency ready",
                );
                return Ok(report);
            }

            tracing::debug!(
                dependency = %dependency.name,
                probe = dependency.probe.kind(),
                attempt = attempts,
                error_kind = result.error.map(|k| k.as_str()).unwrap_or("unknown"),
                detail = result.detail.as_deref().unwrap_or(""),
                "Probe attempt failed",
            );
            last_error = result.error;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(deadline_exceeded(dependency, attempts, started, last_error));
            }
            if cancel.is_cancelled() {
                return Err(cancelled(dependency));
            }

            let delay = dependency.backoff.jittered(attempts - 1).min(remaining);
            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(dependency)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// One probe call, guarded so a probe ignoring its timeout cannot stall
/// the gate.
async fn attempt(dependency: &Dependency, limit: Duration) -> ProbeResult {
    match tokio::time::timeout(limit, dependency.probe.check(limit)).await {
        Ok(result) => result,
        Err(_) => ProbeResult::timed_out(limit),
    }
}

fn cancelled(dependency: &Dependency) -> GateError {
    tracing::debug!(dependency = %dependency.name, "Readiness wait cancelled");
    GateError::Cancelled {
        dependency: dependency.name.clone(),
    }
}

fn deadline_exceeded(
    dependency: &Dependency,
    attempts: u32,
    started: Instant,
    last_error: Option<ProbeErrorKind>,
) -> GateError {
    GateError::DeadlineExceeded {
        dependency: dependency.name.clone(),
        attempts,
        elapsed: started.elapsed(),
        last_error,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;

    /// Fails `failures` times, then succeeds.
    struct FlakyProbe {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyProbe {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Probe for FlakyProbe {
        async fn check(&self, _timeout: Duration) -> ProbeResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                ProbeResult::unreachable("connection refused")
            } else {
                ProbeResult::ready()
            }
        }

        fn kind(&self) -> &'static str {
            "flaky"
        }
    }

    /// Never answers.
    struct HungProbe;

    #[async_trait]
    impl Probe for HungProbe {
        async fn check(&self, _timeout: Duration) -> ProbeResult {
            std::future::pending().await
        }

        fn kind(&self) -> &'static str {
            "hung"
        }
    }

    /// Answers unreachable after `delay`, counting completed checks.
    struct SlowProbe {
        delay: Duration,
        finished: AtomicU32,
    }

    #[async_trait]
    impl Probe for SlowProbe {
        async fn check(&self, _timeout: Duration) -> ProbeResult {
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            ProbeResult::unreachable("connection refused")
        }

        fn kind(&self) -> &'static str {
            "slow"
        }
    }

    fn deterministic() -> BackoffPolicy {
        BackoffPolicy::default().without_jitter()
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let probe = FlakyProbe::new(2);
        let dep = Dependency::new("db", probe.clone()).with_backoff(deterministic());

        let report = ReadinessGate::wait(&dep, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.failures, 2);
        // 200 ms + 400 ms of backoff between the three attempts.
        assert_eq!(report.elapsed, Duration::from_millis(600));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_carries_last_error() {
        let dep = Dependency::new("db", FlakyProbe::new(u32::MAX))
            .with_timeout(Duration::from_secs(1))
            .with_backoff(deterministic());

        let err = ReadinessGate::wait(&dep, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(
            err,
            GateError::DeadlineExceeded {
                ref dependency,
                last_error: Some(ProbeErrorKind::Unreachable),
                ..
            } if dependency == "db"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_is_bounded_by_attempt_timeout() {
        let dep = Dependency::new("cache", Arc::new(HungProbe))
            .with_timeout(Duration::from_secs(1))
            .with_attempt_timeout(Duration::from_millis(300))
            .with_backoff(deterministic());

        let err = ReadinessGate::wait(&dep, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_matches!(
            err,
            GateError::DeadlineExceeded {
                last_error: Some(ProbeErrorKind::Timeout),
                ..
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_attempt() {
        let probe = FlakyProbe::new(0);
        let dep = Dependency::new("db", probe.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ReadinessGate::wait(&dep, &cancel).await.unwrap_err();

        assert_matches!(err, GateError::Cancelled { .. });
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let dep = Dependency::new("db", FlakyProbe::new(u32::MAX))
            .with_timeout(Duration::from_secs(120))
            .with_backoff(BackoffPolicy {
                base: Duration::from_secs(60),
                cap: Duration::from_secs(60),
                multiplier: 1.0,
                jitter: 0.0,
            });
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ReadinessGate::wait(&dep, &cancel).await.unwrap_err();

        assert_matches!(err, GateError::Cancelled { .. });
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_waits_for_in_flight_probe() {
        let probe = Arc::new(SlowProbe {
            delay: Duration::from_secs(2),
            finished: AtomicU32::new(0),
        });
        let dep = Dependency::new("db", probe.clone())
            .with_timeout(Duration::from_secs(60))
            .with_backoff(deterministic());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ReadinessGate::wait(&dep, &cancel).await.unwrap_err();

        assert_matches!(err, GateError::Cancelled { ref dependency } if dependency == "db");
        assert_eq!(probe.finished.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
