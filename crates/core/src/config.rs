//! Declarative coordinator configuration.
//!
//! The JSON document lists the dependencies to wait on, the migration
//! steps to apply and where the ledger lives. Parsing and validation are
//! pure; reading files and building probes happens in the `api` crate.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prefix marking a target that is read from an environment variable.
pub const ENV_TARGET_PREFIX: &str = "env:";

/// Default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "stagehand_ledger";

/// Default advisory lock key guarding the ledger.
pub const DEFAULT_LEDGER_LOCK_KEY: i64 = 7261;

/// Maximum length of a ledger table identifier (PostgreSQL `NAMEDATALEN - 1`).
pub const MAX_TABLE_NAME_LENGTH: usize = 63;

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
    #[serde(default)]
    pub migrations: MigrationsConfig,
    /// Required whenever migration steps are declared.
    #[serde(default)]
    pub ledger: Option<LedgerConfig>,
}

/// How a dependency is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Postgres,
    Tcp,
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyConfig {
    pub name: String,
    pub probe_kind: ProbeKind,
    /// Connection URL, `host:port` or URL depending on `probe_kind`;
    /// `env:NAME` reads it from the environment.
    pub target: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl DependencyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_backoff_jitter")]
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            cap_ms: default_backoff_cap_ms(),
            multiplier: default_backoff_multiplier(),
            jitter: default_backoff_jitter(),
        }
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_ms),
            cap: Duration::from_millis(config.cap_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            steps: Vec::new(),
        }
    }
}

impl MigrationsConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub id: String,
    /// Expected checksum of `source`; when absent the digest of the
    /// source is used as is.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Path of the step's source, relative to the configuration file.
    pub source: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    pub url: String,
    #[serde(default = "default_ledger_table")]
    pub table: String,
    #[serde(default = "default_ledger_lock_key")]
    pub lock_key: i64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_backoff_cap_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.5
}

fn default_lock_timeout_ms() -> u64 {
    60_000
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}

fn default_ledger_lock_key() -> i64 {
    DEFAULT_LEDGER_LOCK_KEY
}

// ---------------------------------------------------------------------------
// Parsing and validation
// ---------------------------------------------------------------------------

impl BootstrapConfig {
    /// Parse a JSON configuration document and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every rule that does not need I/O.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dependency_names(self.dependencies.iter().map(|d| d.name.as_str()))?;
        for dep in &self.dependencies {
            if dep.target.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "dependency '{}' has an empty target",
                    dep.name
                )));
            }
            if dep.timeout_ms == 0 || dep.attempt_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "dependency '{}' timeouts must be greater than zero",
                    dep.name
                )));
            }
            validate_backoff(&dep.name, &dep.backoff)?;
        }

        validate_step_ids(self.migrations.steps.iter().map(|s| s.id.as_str()))?;
        if self.migrations.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "migrations.lock_timeout_ms must be greater than zero".into(),
            ));
        }

        match &self.ledger {
            Some(ledger) => validate_table_name(&ledger.table)?,
            None if !self.migrations.steps.is_empty() => {
                return Err(ConfigError::Invalid(
                    "a ledger must be configured when migration steps are declared".into(),
                ));
            }
            None => {}
        }

        Ok(())
    }
}

fn validate_backoff(dependency: &str, backoff: &BackoffConfig) -> Result<(), ConfigError> {
    if backoff.base_ms == 0 || backoff.base_ms > backoff.cap_ms {
        return Err(ConfigError::Invalid(format!(
            "dependency '{dependency}' backoff requires 0 < base_ms <= cap_ms"
        )));
    }
    if !(backoff.multiplier.is_finite() && backoff.multiplier >= 1.0) {
        return Err(ConfigError::Invalid(format!(
            "dependency '{dependency}' backoff multiplier must be at least 1.0"
        )));
    }
    if !(0.0..=1.0).contains(&backoff.jitter) {
        return Err(ConfigError::Invalid(format!(
            "dependency '{dependency}' backoff jitter must be within 0.0..=1.0"
        )));
    }
    Ok(())
}

/// Dependency names must be non-empty and unique.
pub fn validate_dependency_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for (position, name) in names.into_iter().enumerate() {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyDependencyName { position });
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateDependency(name.to_string()));
        }
    }
    Ok(())
}

/// Step ids must be non-empty and strictly increasing (byte order), which
/// also rules out duplicates.
pub fn validate_step_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut previous: Option<&str> = None;
    for (position, id) in ids.into_iter().enumerate() {
        if id.trim().is_empty() {
            return Err(ConfigError::EmptyStepId { position });
        }
        if let Some(prev) = previous {
            if id <= prev {
                return Err(ConfigError::StepOrder {
                    previous: prev.to_string(),
                    next: id.to_string(),
                });
            }
        }
        previous = Some(id);
    }
    Ok(())
}

/// Ledger table names are interpolated into SQL, so only plain
/// identifiers are accepted.
pub fn validate_table_name(table: &str) -> Result<(), ConfigError> {
    let valid = !table.is_empty()
        && table.len() <= MAX_TABLE_NAME_LENGTH
        && table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "ledger table '{table}' must be a lowercase identifier of at most {MAX_TABLE_NAME_LENGTH} characters"
        )))
    }
}

/// Resolve an `env:NAME` target from the environment; other targets are
/// returned unchanged.
pub fn resolve_target(raw: &str) -> Result<String, ConfigError> {
    match raw.strip_prefix(ENV_TARGET_PREFIX) {
        Some(var) => {
            let var = var.trim();
            std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))
        }
        None => Ok(raw.to_string()),
    }
}
