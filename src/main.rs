use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use pullsync::app::App;
use pullsync::cli::Cli;
use pullsync::config::Config;
use pullsync::metrics::{PrometheusSink, install_exporter, set_info};
use pullsync::transfer::Rsync;

fn setup_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false);

    let Some(dir) = log_dir else {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).with_context(|| format!("cannot create log dir {}", dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(dir, "pullsync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging(cli.log_dir.as_deref())?;

    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };
    let rsync = config.resolve_transfer_tool()?;
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("cannot create state dir {}", config.state_dir.display()))?;

    tracing::info!("pullsync {} starting, transfer tool {}", env!("CARGO_PKG_VERSION"), rsync.display());
    tracing::info!("sync pairs: {}", config.pairs_json());

    install_exporter(config.metrics_addr)?;
    set_info(env!("CARGO_PKG_VERSION"), &config.stand_name, &config.pod_name);

    let transfer = Arc::new(Rsync::new(rsync).with_password(config.rsync_password.expose()));
    let app = App::new(config, transfer, Arc::new(PrometheusSink));

    let mut scheduler = app.schedule().await.context("failed to schedule jobs")?;
    scheduler.start().await?;

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    scheduler.shutdown().await?;
    Ok(())
}
