/// Configuration errors detected before any dependency is probed.
///
/// Every variant maps to the `CONFIG_INVALID` failure reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Dependency name must not be empty (position {position})")]
    EmptyDependencyName { position: usize },

    #[error("Duplicate dependency name: {0}")]
    DuplicateDependency(String),

    #[error("Migration step id must not be empty (position {position})")]
    EmptyStepId { position: usize },

    #[error("Migration step ids must be strictly increasing: '{previous}' is followed by '{next}'")]
    StepOrder { previous: String, next: String },

    #[error("Migration step '{step_id}' checksum mismatch: declared {declared}, source hashes to {actual}")]
    ChecksumMismatch {
        step_id: String,
        declared: String,
        actual: String,
    },

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
