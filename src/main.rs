//! appizap build daemon
//!
//! HTTP service that packages web apps into mobile apps by running the
//! builder image in one disposable container per build.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use appizap_build_daemon::{
    artifact::ArtifactLocator,
    backend::{DockerBackend, ExecutionBackend},
    config::Config,
    controller::{BuildController, ControllerSettings},
    http::{self, AppState},
};

#[derive(Parser, Debug)]
#[command(name = "appizap-build-daemon")]
#[command(about = "Package web apps into mobile apps in disposable build containers")]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Root directory for build workspaces (overrides BUILDS_DIR)
    #[arg(long)]
    builds_dir: Option<PathBuf>,

    /// Directory for per-build log files (overrides LOGS_DIR)
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.builds_dir {
        config.builds_dir = dir;
    }
    if let Some(dir) = args.logs_dir {
        config.logs_dir = dir;
    }

    tokio::fs::create_dir_all(&config.builds_dir)
        .await
        .with_context(|| format!("Failed to create builds directory {}", config.builds_dir.display()))?;

    info!(
        port = config.port,
        builds_dir = %config.builds_dir.display(),
        image = %config.builder_image,
        max_concurrent = config.max_concurrent_builds,
        "Loaded configuration"
    );

    let backend = DockerBackend::connect().context("Failed to connect to Docker")?;
    if let Err(e) = backend.ping().await {
        warn!(error = %e, "Docker is not responding yet; builds will fail until it is");
    }

    let controller = Arc::new(BuildController::new(
        Arc::new(backend),
        ControllerSettings::from_config(&config),
    ));
    let reaper = controller.start_reaper();

    let state = Arc::new(AppState::new(
        controller,
        ArtifactLocator::new(&config.builds_dir),
    ));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let result = tokio::select! {
        result = http::serve(addr, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    reaper.abort();
    result
}
