use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use stagehand_core::error::ConfigError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagehand_api::bootstrap::{outcome, Coordinator};
use stagehand_api::config::{LogFormat, ServerConfig, DEFAULT_LOG_FILTER};
use stagehand_api::error::AppError;
use stagehand_api::router::build_app_router;
use stagehand_api::state::AppState;

/// Startup coordinator: waits for dependencies, applies migrations once,
/// then reports ready.
#[derive(Debug, Parser)]
#[command(name = "stagehand", version, about)]
struct Cli {
    /// Configuration file; overrides `STAGEHAND_CONFIG`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the startup sequence once and exit with its outcome.
    Bootstrap,
    /// Serve `/health` and `/ready` while the sequence runs, and keep
    /// serving after it is ready until SIGINT/SIGTERM.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = ServerConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_format).unwrap_or_default());

    let result = match config {
        Ok(mut config) => {
            if let Some(path) = cli.config {
                config.config_path = path;
            }
            match cli.command {
                Command::Bootstrap => bootstrap(&config).await,
                Command::Serve => serve(&config).await,
            }
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let exit_code = e.exit_code();
            tracing::error!(code = e.code(), exit_code, error = %e, "Startup failed");
            ExitCode::from(exit_code)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// One-shot mode.
async fn bootstrap(config: &ServerConfig) -> Result<(), AppError> {
    let cancel = CancellationToken::new();
    let coordinator = Coordinator::from_path(&config.config_path, cancel.clone())?;

    let signal = tokio::spawn(cancel_on_shutdown(cancel.clone()));
    let report = coordinator.run().await;
    signal.abort();

    outcome(&report)?;
    tracing::info!(
        applied = report.migration.as_ref().map_or(0, |m| m.applied),
        "Startup sequence complete, ready",
    );
    Ok(())
}

/// Embedded mode: health endpoints alongside the running coordinator.
async fn serve(config: &ServerConfig) -> Result<(), AppError> {
    let cancel = CancellationToken::new();
    let coordinator = Coordinator::from_path(&config.config_path, cancel.clone())?;
    let state = AppState {
        status: coordinator.status(),
    };
    let app = build_app_router(state, config);

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("HOST '{}' is invalid: {e}", config.host)))?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AppError::Server)?;
    tracing::info!(%addr, "Serving health endpoints");

    // A failed run stops the server so the process exits with its code.
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        let report = coordinator.run().await;
        if !report.is_ready() {
            run_cancel.cancel();
        }
        report
    });
    let signal = tokio::spawn(cancel_on_shutdown(cancel.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .map_err(AppError::Server)?;
    signal.abort();

    let report = run.await?;
    outcome(&report)?;
    tracing::info!("Health server stopped");
    Ok(())
}

async fn cancel_on_shutdown(cancel: CancellationToken) {
    shutdown_signal().await;
    cancel.cancel();
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
