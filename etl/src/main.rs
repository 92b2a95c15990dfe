mod app;
mod dedup;
mod model;
mod pipeline;
mod source;
mod store;
mod transform;

use clap::Parser;
use covid_etl_core::{telemetry, Config};
use std::path::PathBuf;
use std::process;
use store::Connector;
use tracing::{error, info};

#[derive(Parser)]
#[clap(name = "covid-etl")]
#[clap(about = "Fetch daily US COVID case data and append new rows to MySQL", version)]
struct Cli {
    /// Config file (TOML). Defaults to ./config.toml when present
    #[clap(long, env = "COVID_ETL_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        eprintln!("covid-etl: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    telemetry::init(&config.telemetry)?;

    let connector = Connector::new(&config.database);
    let app = app::App::new(&config, connector).await?;
    let summary = app.run().await?;

    info!(written = summary.written, "Pipeline finished");
    Ok(())
}
