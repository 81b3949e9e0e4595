//! Sensorline collector: authenticated gRPC endpoint persisting readings.

use clap::Parser;
use sensorline_collector::CollectorApp;
use sensorline_common::{
    Configuration, LoggingConfig, config::DEFAULT_CONFIG_FILE, init_logging,
    wait_for_shutdown_signal,
};
use sensorline_persistence::driver_from_settings;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "sensorline-collector", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    /// Database backend: postgresql, mysql or memory
    #[arg(long = "db-backend")]
    db_backend: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Vec<(String, String)> {
        let mut overrides = Vec::new();
        if let Some(port) = self.port {
            overrides.push(("collector.port".to_string(), port.to_string()));
        }
        if let Some(backend) = &self.db_backend {
            overrides.push(("db.backend".to_string(), backend.clone()));
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::load(&cli.config, &cli.overrides())?;

    let logging_config =
        LoggingConfig::from_settings("sensorline-collector", &configuration.logging());
    let _logging_guard = init_logging(&logging_config)?;

    let settings = configuration.collector();
    let database = configuration.database();
    info!(
        address = %settings.bind_address(),
        backend = %database.backend,
        "Starting sensorline collector"
    );

    let driver = driver_from_settings(&database)?;
    if let Err(e) = driver.connect().await {
        error!(error = %e, "Database connection failed");
        return Err(e.into());
    }

    let shutdown = wait_for_shutdown_signal();
    CollectorApp::new(settings, driver)?.serve(shutdown).await?;
    Ok(())
}
