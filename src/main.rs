use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use apirate::commands;
use apirate::config;
use apirate::error::Result;
use apirate::logging;
use apirate::modules::builtin_factories;
use apirate::process::{ExecutionProcess, ListenerService};

#[derive(Parser, Debug)]
#[command(name = "apirate")]
#[command(about = "A modular network service built from a phase-ordered module pipeline", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Start the modules and serve connections (default)
    Run,
    /// Validate configuration and run module startup without binding ports
    Check,
    /// List the modules this build can instantiate
    Modules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging settings live in the configuration, so it is loaded first.
    let config = match &args.config {
        Some(path) => config::load_from_path(path).await,
        None => config::load_from_env_or_file().await,
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e);
        }
    };

    let _log_guard = logging::init_tracing(args.debug, &config.logging);
    match &args.config {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Configuration loaded from default locations"),
    }

    let factories = builtin_factories();

    match args.command.unwrap_or(Command::Run) {
        Command::Check => {
            if let Err(e) = commands::run_config_check(&config, &factories) {
                error!("Check failed: {:#}", e);
                std::process::exit(1);
            }
            return Ok(());
        }
        Command::Modules => {
            commands::print_modules(&factories);
            return Ok(());
        }
        Command::Run => {}
    }

    info!("Starting Apirate");
    info!(
        "Loaded {} module configuration(s)",
        config.enabled_modules().count()
    );

    let mut process = ExecutionProcess::from_config(&config, &factories)?;
    let report = process.start()?;
    for exclusion in &report.excluded {
        warn!(module = %exclusion.module, "Module excluded: {}", exclusion.error);
    }
    let process = Arc::new(process);

    let listeners = ListenerService::new(process.clone(), config.server.host.clone())
        .with_shutdown_grace(Duration::from_millis(config.server.shutdown_grace_ms))
        .bind()
        .await?;
    for (port, addr) in listeners.addrs() {
        info!("Port {} bound on {}", port, addr);
    }

    shutdown_signal().await;

    info!("Shutting down Apirate");
    listeners.shutdown().await;
    debug!("Final metrics:\n{}", process.metrics().render());
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
