//! # Pipeline Jobs Entry Point
//!
//! `serve` runs the worker pools, the scheduler and the health endpoint.
//! `tick` fires every enabled schedule once. `migrate` applies migrations.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pipeline_jobs::{
    config::ConfigLoader,
    db,
    runtime::{Collaborators, Runtime},
    seeds, telemetry,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "pipeline-jobs", version, about = "Content pipeline job runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run workers, the scheduler and the HTTP server (default)
    Serve,
    /// Fire every enabled schedule once and exit
    Tick,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::health_check(&db).await?;
    db::migrate(&db).await?;
    let command = cli.command.unwrap_or(Command::Serve);
    if matches!(command, Command::Migrate) {
        return Ok(());
    }

    let seeded = seeds::seed_schedules(&db).await?;
    if seeded > 0 {
        info!(seeded, "Seeded default job schedules");
    }

    let config = Arc::new(config);
    let runtime = Runtime::build(config, db, Collaborators::new())?;

    match command {
        Command::Tick => {
            let stats = runtime.scheduler().run_all(Utc::now()).await?;
            info!(
                schedules = stats.schedules_due,
                enqueued = stats.jobs_enqueued,
                skipped_duplicate = stats.skipped_duplicate,
                skipped_busy = stats.skipped_busy,
                skipped_capped = stats.skipped_capped,
                errors = stats.errors,
                "Manual scheduler tick finished"
            );
            Ok(())
        }
        Command::Serve | Command::Migrate => {
            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));
            runtime.run(shutdown).await
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
    shutdown.cancel();
}
