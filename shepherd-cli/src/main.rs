use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shepherd_config::{ConfigLoader, LogFormat, ShepherdConfig};
use shepherd_supervisor::Master;

mod cli;
use cli::{Cli, Commands};

fn init_logging(config: &ShepherdConfig, override_level: Option<&str>) -> Result<()> {
    let level = match override_level {
        Some(level) => level
            .parse::<shepherd_config::LogLevel>()
            .map_err(|_| anyhow::anyhow!("invalid log level: {}", level))?,
        None => config.logging.level,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

async fn serve(config: ShepherdConfig) -> Result<()> {
    let servables = config.servables.len();
    info!(servables, "Starting serving master");

    let master = Master::new(config);
    let handle = master
        .start_servables()
        .await
        .context("failed to start workers")?;
    info!(workers = handle.worker_count(), "Serving started successfully");

    handle.wait().await.context("serving ended abnormally")?;
    info!("Serving stopped");
    Ok(())
}

fn check_config(config: &ShepherdConfig) -> Result<()> {
    config
        .validate_all()
        .context("configuration validation failed")?;
    let merged = shepherd_config::merge_start_configs(config.servables.clone())
        .context("servable configs do not merge")?;

    let rendered = serde_yaml::to_string(&ShepherdConfig {
        servables: merged,
        supervisor: config.supervisor.clone(),
        logging: config.logging.clone(),
    })?;
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = ConfigLoader::new();
    let config = loader
        .load(cli.config.as_ref())
        .context("failed to load configuration")?;

    match cli.command {
        Commands::Serve => {
            init_logging(&config, cli.log_level.as_deref())?;
            serve(config).await
        }
        Commands::CheckConfig => check_config(&config),
    }
}
