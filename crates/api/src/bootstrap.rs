//! Assembling a coordinator from the configuration document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::PgConnection;
use stagehand_core::config::{resolve_target, BootstrapConfig, StepConfig};
use stagehand_core::coordinator::{CoordinatorReport, ServiceCoordinator, StatusHandle};
use stagehand_core::gate::Dependency;
use stagehand_core::migration::{MemoryLedger, MigrationStep};
use stagehand_db::{sql_step, PgLedger};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::probes::ProbeFactory;

/// A parsed configuration document and the directory relative step
/// sources resolve against.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: BootstrapConfig,
    pub base_dir: PathBuf,
}

/// Read and validate the configuration document at `path`.
pub fn load_config(path: &Path) -> Result<LoadedConfig, AppError> {
    let json = std::fs::read_to_string(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = BootstrapConfig::from_json(&json)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok(LoadedConfig { config, base_dir })
}

/// Resolve targets and build a probe for every configured dependency.
pub fn build_dependencies(
    config: &BootstrapConfig,
    probes: &ProbeFactory,
) -> Result<Vec<Dependency>, AppError> {
    config
        .dependencies
        .iter()
        .map(|dep| -> Result<Dependency, AppError> {
            let target = resolve_target(&dep.target)?;
            let mut dependency = Dependency::new(&dep.name, probes.build(dep.probe_kind, &target))
                .with_timeout(dep.timeout())
                .with_attempt_timeout(dep.attempt_timeout())
                .with_backoff((&dep.backoff).into());
            if !dep.required {
                dependency = dependency.optional();
            }
            Ok(dependency)
        })
        .collect()
}

/// Read every step's SQL source and verify declared checksums.
pub fn load_steps(
    steps: &[StepConfig],
    base_dir: &Path,
) -> Result<Vec<MigrationStep<PgConnection>>, AppError> {
    steps
        .iter()
        .map(|step| -> Result<MigrationStep<PgConnection>, AppError> {
            let path = base_dir.join(&step.source);
            let sql = std::fs::read_to_string(&path)
                .map_err(|source| AppError::Io { path, source })?;
            Ok(sql_step(&step.id, sql, step.checksum.as_deref())?)
        })
        .collect()
}

/// A coordinator ready to run, with or without a PostgreSQL ledger.
///
/// Deployments that only wait on dependencies configure no ledger and no
/// steps; they run against an empty in-process ledger.
pub enum Coordinator {
    WithLedger(ServiceCoordinator<PgLedger>),
    ProbesOnly(ServiceCoordinator<MemoryLedger<()>>),
}

impl Coordinator {
    /// Load the document at `path` and assemble its coordinator.
    pub fn from_path(path: &Path, cancel: CancellationToken) -> Result<Self, AppError> {
        let loaded = load_config(path)?;
        Self::assemble(&loaded, cancel)
    }

    /// Build probes, read steps and prepare the ledger pool.
    ///
    /// No connection is opened here; the ledger pool connects lazily once
    /// the dependency gates have passed.
    pub fn assemble(loaded: &LoadedConfig, cancel: CancellationToken) -> Result<Self, AppError> {
        let config = &loaded.config;
        let probes = ProbeFactory::new()?;
        let dependencies = build_dependencies(config, &probes)?;
        let lock_timeout = config.migrations.lock_timeout();

        let coordinator = match &config.ledger {
            Some(ledger) => {
                let steps = load_steps(&config.migrations.steps, &loaded.base_dir)?;
                let url = resolve_target(&ledger.url)?;
                let pool = stagehand_db::create_lazy_pool(&url)?;
                let pg = PgLedger::new(pool, &ledger.table, ledger.lock_key)?;
                tracing::info!(
                    dependencies = dependencies.len(),
                    steps = steps.len(),
                    table = %ledger.table,
                    "Coordinator assembled with PostgreSQL ledger",
                );
                Self::WithLedger(
                    ServiceCoordinator::new(dependencies, steps, Arc::new(pg))
                        .with_lock_timeout(lock_timeout)
                        .with_cancellation(cancel),
                )
            }
            None => {
                tracing::info!(
                    dependencies = dependencies.len(),
                    "Coordinator assembled without ledger",
                );
                Self::ProbesOnly(
                    ServiceCoordinator::new(dependencies, Vec::new(), Arc::new(MemoryLedger::new(())))
                        .with_lock_timeout(lock_timeout)
                        .with_cancellation(cancel),
                )
            }
        };
        Ok(coordinator)
    }

    pub fn status(&self) -> StatusHandle {
        match self {
            Self::WithLedger(c) => c.status(),
            Self::ProbesOnly(c) => c.status(),
        }
    }

    pub fn has_ledger(&self) -> bool {
        matches!(self, Self::WithLedger(_))
    }

    pub async fn run(self) -> CoordinatorReport {
        match self {
            Self::WithLedger(c) => c.run().await,
            Self::ProbesOnly(c) => c.run().await,
        }
    }
}

/// `Ok` when the run ended `Ready`, else the failure reason.
pub fn outcome(report: &CoordinatorReport) -> Result<(), AppError> {
    match report.failure() {
        Some(reason) => Err(AppError::Failed(reason.clone())),
        None => Ok(()),
    }
}
