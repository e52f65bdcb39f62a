use std::path::PathBuf;
use std::str::FromStr;

use stagehand_core::error::ConfigError;

/// Log filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str =
    "stagehand=info,stagehand_api=info,stagehand_core=info,stagehand_db=info";

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid(format!(
                "LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Process configuration loaded from environment variables.
///
/// The coordinator itself is described by the JSON document at
/// `config_path`; this only covers where to find it and how the process
/// serves and logs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address of the health server (default: `0.0.0.0`).
    pub host: String,
    /// Bind port of the health server (default: `8081`).
    pub port: u16,
    /// Health request timeout in seconds (default: `10`).
    pub request_timeout_secs: u64,
    /// Coordinator configuration file (default: `stagehand.json`).
    pub config_path: PathBuf,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default          |
    /// |------------------------|------------------|
    /// | `HOST`                 | `0.0.0.0`        |
    /// | `PORT`                 | `8081`           |
    /// | `REQUEST_TIMEOUT_SECS` | `10`             |
    /// | `STAGEHAND_CONFIG`     | `stagehand.json` |
    /// | `LOG_FORMAT`           | `text`           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an explicit variable source.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_var(&lookup, "PORT", 8081)?;
        let request_timeout_secs = parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 10)?;
        let config_path = lookup("STAGEHAND_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("stagehand.json"));
        let log_format = parse_var(&lookup, "LOG_FORMAT", LogFormat::Text)?;

        if request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        Ok(Self {
            host,
            port,
            request_timeout_secs,
            config_path,
            log_format,
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{name} is invalid: {e}"))),
    }
}
