//! Sensorline Common - shared types and process utilities
//!
//! This crate provides:
//! - Reading and batch models shared by the watcher and the collector
//! - Configuration loading (`conf/application.yml` + environment + overrides)
//! - Multi-file logging setup
//! - Graceful shutdown signalling

pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod shutdown;

pub use config::{
    CollectorSettings, Configuration, DatabaseSettings, LoggingSettings, PoolSettings,
    RelaySettings, ServerTlsSettings, WatcherSettings,
};
pub use error::SensorlineError;
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use model::{Batch, Reading};
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
