// Tether daemon: device RPC agent with a loopback pipeline

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tether_agent::{run_echo_pipeline, TetherAgent};
use tether_core::{SystemClock, TetherConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - device RPC session agent", long_about = None)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override one setting, e.g. `correlator.default_timeout_ms=5000`
    #[arg(short = 's', long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<TetherConfig> {
    let mut config = match &cli.config {
        Some(path) => TetherConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TetherConfig::default(),
    };
    config.merge_with_env()?;
    for assignment in &cli.overrides {
        let (key, value) = assignment
            .split_once('=')
            .with_context(|| format!("override {assignment} is not KEY=VALUE"))?;
        config.set_from_string(key.trim(), value.trim())?;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    let (agent, pipeline) = TetherAgent::new(config, Arc::new(SystemClock));
    agent.start();
    let echo = tokio::spawn(run_echo_pipeline(pipeline.requests, pipeline.results));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    agent.shutdown();
    echo.abort();
    Ok(())
}
