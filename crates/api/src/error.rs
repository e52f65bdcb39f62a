use std::path::PathBuf;

use stagehand_core::coordinator::FailureReason;
use stagehand_core::error::ConfigError;

/// Errors that end the `stagehand` process.
///
/// Everything except [`AppError::Failed`] happens before the coordinator
/// runs. Each variant maps to a process exit code through
/// [`AppError::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The environment or the configuration document is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The ledger pool could not be built.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP probe client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Binding or running the health server failed.
    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),

    #[error("Coordinator task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The coordinator ran and ended in `Failed`.
    #[error(transparent)]
    Failed(FailureReason),
}

impl AppError {
    /// Reason code written on the final log line.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_INVALID",
            Self::Failed(reason) => reason.code(),
            Self::Database(_)
            | Self::Io { .. }
            | Self::HttpClient(_)
            | Self::Server(_)
            | Self::Task(_) => "STARTUP_ERROR",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Failed(reason) => failure_exit_code(reason),
            Self::Database(_)
            | Self::Io { .. }
            | Self::HttpClient(_)
            | Self::Server(_)
            | Self::Task(_) => 1,
        }
    }
}

/// Exit code reported for a coordinator failure.
pub fn failure_exit_code(reason: &FailureReason) -> u8 {
    match reason {
        FailureReason::ConfigInvalid { .. } => 2,
        FailureReason::DependencyUnready { .. } => 3,
        FailureReason::MigrationFailed { .. } => 4,
        FailureReason::Drift { .. } => 5,
        FailureReason::LockTimeout { .. } => 6,
        FailureReason::Cancelled => 130,
    }
}
