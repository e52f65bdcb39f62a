//! Shared fixtures for coordinator and runner integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stagehand_core::backoff::BackoffPolicy;
use stagehand_core::gate::Dependency;
use stagehand_core::migration::{checksum_of, MigrationAction, MigrationStep};
use stagehand_core::probe::{Probe, ProbeResult};
use tokio_util::sync::CancellationToken;

/// Stand-in for a database schema: the ordered list of applied changes.
pub type Schema = Vec<String>;

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Reports unreachable for the first `failures` calls, then ready.
pub struct ScriptedProbe {
    failures: u32,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn failing_times(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    pub fn never_ready() -> Arc<Self> {
        Self::failing_times(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self, _timeout: Duration) -> ProbeResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ProbeResult::unreachable("connection refused")
        } else {
            ProbeResult::ready()
        }
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }
}

/// A dependency with deterministic backoff (200 ms doubling, no jitter).
pub fn dependency(name: &str, probe: Arc<dyn Probe>, timeout: Duration) -> Dependency {
    Dependency::new(name, probe)
        .with_timeout(timeout)
        .with_backoff(BackoffPolicy::default().without_jitter())
}

// ---------------------------------------------------------------------------
// Migration actions
// ---------------------------------------------------------------------------

/// Appends a named change to the schema and counts invocations.
pub struct Change {
    name: String,
    pub runs: Arc<AtomicU32>,
}

#[async_trait]
impl MigrationAction<Schema> for Change {
    async fn apply(&self, schema: &mut Schema) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        schema.push(self.name.clone());
        Ok(())
    }
}

/// Half-applies, then fails.
pub struct Broken;

#[async_trait]
impl MigrationAction<Schema> for Broken {
    async fn apply(&self, schema: &mut Schema) -> anyhow::Result<()> {
        schema.push("partial".to_string());
        anyhow::bail!("relation \"users\" already exists")
    }
}

/// Records its name, firing `cancel` while the apply is in progress.
pub struct CancelMidway {
    name: String,
    cancel: CancellationToken,
}

#[async_trait]
impl MigrationAction<Schema> for CancelMidway {
    async fn apply(&self, schema: &mut Schema) -> anyhow::Result<()> {
        self.cancel.cancel();
        tokio::task::yield_now().await;
        schema.push(self.name.clone());
        Ok(())
    }
}

/// A step that records `id` into the schema; checksum derives from `id`.
pub fn step(id: &str) -> MigrationStep<Schema> {
    counted_step(id).0
}

/// Like [`step`], also returning the step's invocation counter.
pub fn counted_step(id: &str) -> (MigrationStep<Schema>, Arc<AtomicU32>) {
    let runs = Arc::new(AtomicU32::new(0));
    let action = Change {
        name: id.to_string(),
        runs: Arc::clone(&runs),
    };
    (MigrationStep::from_source(id, id.as_bytes(), action), runs)
}

/// A step that cancels `cancel` from inside its own apply.
pub fn cancelling_step(id: &str, cancel: CancellationToken) -> MigrationStep<Schema> {
    let action = CancelMidway {
        name: id.to_string(),
        cancel,
    };
    MigrationStep::from_source(id, id.as_bytes(), action)
}

/// A step with the given id whose apply fails.
pub fn broken_step(id: &str) -> MigrationStep<Schema> {
    MigrationStep::from_source(id, b"broken", Broken)
}

pub fn steps(ids: &[&str]) -> Vec<MigrationStep<Schema>> {
    ids.iter().map(|id| step(id)).collect()
}

/// Same step id with different content.
pub fn edited(step: &MigrationStep<Schema>) -> MigrationStep<Schema> {
    MigrationStep {
        checksum: checksum_of(format!("{} -- edited", step.id).as_bytes()),
        ..step.clone()
    }
}
