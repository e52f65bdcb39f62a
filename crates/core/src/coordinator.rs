//! The service coordinator: waits for every declared dependency, runs the
//! migrations once, then publishes `Ready`.
//!
//! ```text
//! Initializing -> WaitingOnDependencies -> Migrating -> Ready
//!       \                  \                  \
//!        +------------------+------------------+--> Failed(reason)
//! ```
//!
//! The current state is published on a `watch` channel; callers observe
//! it through a cloneable [`StatusHandle`]. A coordinator is consumed by
//! [`ServiceCoordinator::run`], so one instance runs the sequence at most
//! once. Recovery from `Failed` is a fresh instance.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_dependency_names, validate_step_ids};
use crate::error::ConfigError;
use crate::gate::{Dependency, GateError, GateReport, ReadinessGate};
use crate::migration::{MigrationError, MigrationLedger, MigrationReport, MigrationRunner, MigrationStep};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Why the coordinator ended in `Failed`.
///
/// Each variant carries the dependency name or step id an operator needs
/// to diagnose it, and a stable reason code (see [`FailureReason::code`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    #[error("configuration invalid: {message}")]
    ConfigInvalid { message: String },

    #[error("dependency '{dependency}' unready: {message}")]
    DependencyUnready { dependency: String, message: String },

    #[error("migration failed{}: {message}", .step_id.as_ref().map(|id| format!(" at step '{id}'")).unwrap_or_default())]
    MigrationFailed {
        step_id: Option<String>,
        message: String,
    },

    #[error("migration step '{step_id}' drifted from its applied definition")]
    Drift { step_id: String },

    #[error("another instance held the migration lock for more than {waited_ms} ms")]
    LockTimeout { waited_ms: u64 },

    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl FailureReason {
    /// Stable reason code, always present in the final log line.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::DependencyUnready { .. } => "DEPENDENCY_UNREADY",
            Self::MigrationFailed { .. } => "MIGRATION_FAILED",
            Self::Drift { .. } => "DRIFT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl From<ConfigError> for FailureReason {
    fn from(err: ConfigError) -> Self {
        Self::ConfigInvalid {
            message: err.to_string(),
        }
    }
}

impl From<MigrationError> for FailureReason {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::InvalidSteps(e) => e.into(),
            MigrationError::Drift(step_id) => Self::Drift { step_id },
            MigrationError::LockTimeout { waited } => Self::LockTimeout {
                waited_ms: waited.as_millis() as u64,
            },
            MigrationError::Cancelled { .. } => Self::Cancelled,
            MigrationError::StepFailed { step_id, cause } => Self::MigrationFailed {
                step_id: Some(step_id),
                message: format!("{cause:#}"),
            },
            err @ MigrationError::Ledger(_) => Self::MigrationFailed {
                step_id: None,
                message: err.to_string(),
            },
        }
    }
}

/// Lifecycle of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CoordinatorState {
    Initializing,
    WaitingOnDependencies,
    Migrating,
    Ready,
    Failed(FailureReason),
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::WaitingOnDependencies => "waiting_on_dependencies",
            Self::Migrating => "migrating",
            Self::Ready => "ready",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// `Ready` and `Failed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Read-only view of a coordinator's state, safe to share with health
/// endpoints. Observing never triggers any work.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<CoordinatorState>,
}

impl StatusHandle {
    pub fn current(&self) -> CoordinatorState {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_ready()
    }

    /// Wait until the coordinator reaches `Ready` or `Failed`.
    pub async fn wait_terminal(&self) -> CoordinatorState {
        let mut rx = self.rx.clone();
        let outcome = rx.wait_for(CoordinatorState::is_terminal).await;
        match outcome {
            Ok(state) => state.clone(),
            // The coordinator was dropped before finishing.
            Err(_) => self.current(),
        }
    }
}

/// Everything a finished run observed.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorReport {
    pub state: CoordinatorState,
    /// States entered, in order, starting with `Initializing`.
    pub history: Vec<CoordinatorState>,
    /// Reports of the gates that succeeded.
    pub gates: Vec<GateReport>,
    pub migration: Option<MigrationReport>,
}

impl CoordinatorReport {
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        self.state.failure()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct ServiceCoordinator<L: MigrationLedger> {
    dependencies: Vec<Dependency>,
    steps: Vec<MigrationStep<L::Target>>,
    runner: MigrationRunner<L>,
    cancel: CancellationToken,
    state: watch::Sender<CoordinatorState>,
    history: Vec<CoordinatorState>,
    gates: Vec<GateReport>,
}

impl<L: MigrationLedger> ServiceCoordinator<L> {
    pub fn new(
        dependencies: Vec<Dependency>,
        steps: Vec<MigrationStep<L::Target>>,
        ledger: Arc<L>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Initializing);
        Self {
            dependencies,
            steps,
            runner: MigrationRunner::new(ledger),
            cancel: CancellationToken::new(),
            state,
            history: vec![CoordinatorState::Initializing],
            gates: Vec::new(),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.runner = self.runner.with_lock_timeout(lock_timeout);
        self
    }

    /// Drive the coordinator from an externally owned shutdown token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            rx: self.state.subscribe(),
        }
    }

    /// Token that cancels this coordinator's run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the whole startup sequence and return what happened.
    pub async fn run(mut self) -> CoordinatorReport {
        if let Err(e) = self.validate() {
            return self.fail(e.into());
        }

        self.transition(CoordinatorState::WaitingOnDependencies);
        if let Err(reason) = self.wait_for_dependencies().await {
            return self.fail(reason);
        }
        if self.cancel.is_cancelled() {
            return self.fail(FailureReason::Cancelled);
        }

        self.transition(CoordinatorState::Migrating);
        match self.runner.run(&self.steps, &self.cancel).await {
            Ok(report) => {
                tracing::info!(
                    applied = report.applied,
                    already_applied = report.already_applied,
                    "Migrations complete",
                );
                self.transition(CoordinatorState::Ready);
                self.finish(Some(report))
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_dependency_names(self.dependencies.iter().map(|d| d.name.as_str()))?;
        validate_step_ids(self.steps.iter().map(|s| s.id.as_str()))
    }

    /// Run every gate concurrently. The first required gate to give up,
    /// whether past its deadline or cancelled, fails the wait and cancels
    /// the others; optional gates only log.
    async fn wait_for_dependencies(&mut self) -> Result<(), FailureReason> {
        let gate_cancel = self.cancel.child_token();
        let mut pending: FuturesUnordered<_> = self
            .dependencies
            .iter()
            .map(|dep| {
                let gate_cancel = &gate_cancel;
                async move { (dep, ReadinessGate::wait(dep, gate_cancel).await) }
            })
            .collect();

        let mut failure = None;
        while let Some((dep, outcome)) = pending.next().await {
            match outcome {
                Ok(report) => self.gates.push(report),
                // Siblings stopped after the first required failure.
                Err(GateError::Cancelled { .. }) if failure.is_some() => {}
                Err(e) if !dep.required => {
                    tracing::warn!(dependency = %dep.name, error = %e, "Optional dependency not ready, continuing");
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(FailureReason::DependencyUnready {
                            dependency: e.dependency().to_string(),
                            message: e.to_string(),
                        });
                        gate_cancel.cancel();
                    }
                }
            }
        }
        drop(pending);

        match failure {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    fn transition(&mut self, next: CoordinatorState) {
        tracing::info!(state = next.as_str(), "Coordinator state changed");
        self.history.push(next.clone());
        self.state.send_replace(next);
    }

    fn fail(mut self, reason: FailureReason) -> CoordinatorReport {
        self.transition(CoordinatorState::Failed(reason.clone()));
        tracing::error!(code = reason.code(), reason = %reason, "Coordinator failed");
        self.finish(None)
    }

    fn finish(self, migration: Option<MigrationReport>) -> CoordinatorReport {
        CoordinatorReport {
            state: self.state.borrow().clone(),
            history: self.history,
            gates: self.gates,
            migration,
        }
    }
}
