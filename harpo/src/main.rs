mod cli;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use harpo::backup::Engine;
use harpo::config::Settings;
use harpo::logging::init_logging;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let logging = init_logging(cli.log_dir.as_deref())?;
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let result = execute(&cli).await;
    shutdown.cancel();

    if let Err(e) = &result {
        error!(error = %e, "harpo exited with an error");
    }
    result
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    settings.validate()?;

    let storages = settings.build_storages().await?;
    let notifiers = settings.build_notifiers()?;
    info!(
        folders = settings.folders.len(),
        storages = storages.len(),
        notifiers = notifiers.len(),
        "Configuration is valid"
    );

    let engine = Engine::new(
        settings.folders.clone(),
        storages,
        notifiers,
        settings.engine.clone(),
    );

    let result = match cli.command() {
        Command::Run => serve(&engine).await,
        Command::Backup { folder } => {
            let report = engine.run_now(&folder).await?;
            if report.is_success() {
                info!(
                    folder = %folder,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Backup completed"
                );
                Ok(())
            } else if let Some(stage) = report.halted_at {
                Err(anyhow::anyhow!("backup of folder {folder} stopped at the {stage} stage"))
            } else {
                Err(anyhow::anyhow!(
                    "backup of folder {folder} failed on {} storage(s)",
                    report.failed_uploads()
                ))
            }
        }
        Command::Restore { folder, storage, into } => {
            let object = engine.restore(&folder, &storage, &into).await?;
            info!(folder = %folder, storage = %storage, object = %object, "Restore completed");
            Ok(())
        }
        Command::Check => Ok(()),
    };

    engine.close_providers().await;
    result
}

async fn serve(engine: &Engine) -> anyhow::Result<()> {
    engine.build_jobs()?;
    if engine.job_names().is_empty() {
        bail!("no folders configured");
    }
    engine.start();
    info!(jobs = ?engine.job_names(), "harpo started");

    wait_for_shutdown().await;

    info!("Shutting down, waiting for running backups");
    engine.stop().await;
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl-C");
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
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
