//! Sensorline watcher: ships sensor files from a directory to the collector.

use std::sync::Arc;

use clap::Parser;
use sensorline_common::{
    Configuration, LoggingConfig, config::DEFAULT_CONFIG_FILE, init_logging,
    wait_for_shutdown_signal,
};
use sensorline_ingest::{CollectorRelay, IngestWatcher, Relay};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "sensorline-watcher", version, about)]
struct Cli {
    /// Directory receiving sensor files
    #[arg(long = "watch-dir")]
    watch_dir: Option<String>,
    /// Root of the day partitioned archive
    #[arg(long = "archive-dir")]
    archive_dir: Option<String>,
    /// Collector endpoint, e.g. http://127.0.0.1:50051
    #[arg(long = "collector")]
    collector: Option<String>,
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
}

impl Cli {
    fn overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(v) = &self.watch_dir {
            overrides.push(("watcher.watch_dir", v.clone()));
        }
        if let Some(v) = &self.archive_dir {
            overrides.push(("watcher.archive_dir", v.clone()));
        }
        if let Some(v) = &self.collector {
            overrides.push(("watcher.collector.endpoint", v.clone()));
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::load(&cli.config, &cli.overrides())?;

    let logging_config = LoggingConfig::from_settings("sensorline-watcher", &configuration.logging());
    let _logging_guard = init_logging(&logging_config)?;

    let settings = configuration.watcher();
    info!(
        watch_dir = %settings.watch_dir.display(),
        archive_dir = %settings.archive_dir.display(),
        collector = %settings.relay.endpoint,
        batch_size = settings.batch_size,
        "Starting sensorline watcher"
    );

    let relay = Arc::new(CollectorRelay::new(settings.relay.clone())?);
    match relay.fetch_schema().await {
        Ok(schema) => info!(
            fields = schema.fields.len(),
            generated_at = %schema.generated_at,
            "Collector schema available"
        ),
        Err(e) => warn!(error = %e, "Collector schema unavailable, continuing"),
    }

    let shutdown = wait_for_shutdown_signal();
    let mut watcher = IngestWatcher::new(&settings, relay);
    watcher.run(shutdown).await?;

    info!("Sensorline watcher stopped");
    Ok(())
}
