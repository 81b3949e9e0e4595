//! File-based logging for the Sensorline processes.
//!
//! Every process writes a root log file named after the process plus one
//! file per component, rotated by `logs.rotation` (daily by default):
//!
//! | Log File          | Component                    | Target Prefixes                         |
//! |-------------------|------------------------------|-----------------------------------------|
//! | `<process>.log`   | Root logger (all components) | (all)                                   |
//! | watcher.log       | File watcher, parser, relay  | sensorline_ingest                       |
//! | collector.log     | gRPC collector               | sensorline_collector, sensorline_api    |
//! | persistence.log   | Database persistence         | sensorline_persistence                  |
//!
//! `RUST_LOG` overrides the configured level of the console and root layers.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::LoggingSettings;
use crate::error::SensorlineError;

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "watcher.log",
        targets: &["sensorline_ingest"],
    },
    ComponentLogDef {
        file_name: "collector.log",
        targets: &["sensorline_collector", "sensorline_api"],
    },
    ComponentLogDef {
        file_name: "persistence.log",
        targets: &["sensorline_persistence"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl LogRotation {
    /// Parse a `logs.rotation` value; unknown values fall back to daily
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "hourly" => LogRotation::Hourly,
            "never" => LogRotation::Never,
            _ => LogRotation::Daily,
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Logging configuration of one process.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Name of the root log file without extension
    pub process_name: String,
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_logging: bool,
    pub level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            process_name: "sensorline".to_string(),
            log_dir: PathBuf::from("logs"),
            console_output: true,
            file_logging: true,
            level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    pub fn from_settings(process_name: &str, settings: &LoggingSettings) -> Self {
        Self {
            process_name: process_name.to_string(),
            log_dir: settings.path.clone(),
            console_output: settings.console,
            file_logging: settings.file,
            level: settings.level.parse().unwrap_or(Level::INFO),
            rotation: LogRotation::from_setting(&settings.rotation),
        }
    }

    fn root_file_name(&self) -> String {
        format!("{}.log", self.process_name)
    }
}

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Initialize console and file logging for the current process.
///
/// Component files use per-layer [`Targets`] filters so they capture every
/// event of their targets; the console and root file follow `RUST_LOG` or the
/// configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, SensorlineError> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender = RollingFileAppender::new(
            config.rotation.into(),
            &config.log_dir,
            config.root_file_name(),
        );
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(root_filter);
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| SensorlineError::Logging(e.to_string()))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            root_file = %config.root_file_name(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}
