// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbmon::agent::Monitor;
use dbmon::config::{Overrides, Settings};
use dbmon::db::SqlDatabase;
use dbmon::http;
use dbmon::telemetry::init_telemetry;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "dbmon", version, about = "Database telemetry agent exporting over OTLP")]
struct Cli {
    /// TOML settings file
    #[arg(short, long, env = "DBMON_CONFIG")]
    config: Option<PathBuf>,

    /// OTLP base endpoint, e.g. http://collector:4318
    #[arg(long)]
    endpoint: Option<String>,

    /// Database URL, overrides `database.url`
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the monitor loop (and the HTTP API when enabled) until Ctrl-C
    Run,
    /// Run a single cycle and exit; non-zero exit when a query failed
    Once,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let overrides = Overrides {
        database_url: cli.database_url.clone(),
        endpoint: cli.endpoint.clone(),
    };
    let settings =
        Settings::load(cli.config.as_deref(), &overrides).context("loading settings")?;

    let telemetry = init_telemetry(settings.telemetry.clone())?;
    info!(command = ?cli.command, "dbmon started");

    let db = SqlDatabase::connect(&settings.database).await?;
    let monitor = Arc::new(Monitor::new(&settings, Arc::new(db), &telemetry.meter()));

    let code = match cli.command {
        Command::Once => {
            let summary = monitor.run_cycle().await;
            println!("{summary:?}");
            if summary.db_up && summary.queries_failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Command::Run => {
            run(monitor, &settings).await;
            ExitCode::SUCCESS
        }
    };

    info!("shutting down");
    telemetry.shutdown()?;
    Ok(code)
}

async fn run(monitor: Arc<Monitor>, settings: &Settings) {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        let _ = stop_tx.send(true);
    });

    let server = settings.http.enabled.then(|| {
        let monitor = monitor.clone();
        let bind = settings.http.bind.clone();
        let stop = stopped(stop_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = http::serve(monitor, &bind, stop).await {
                error!(error = %e, "http api failed");
            }
        })
    });

    monitor.run(stopped(stop_rx)).await;

    if let Some(server) = server {
        let _ = server.await;
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
