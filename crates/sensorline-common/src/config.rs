//! Configuration management for Sensorline processes
//!
//! Settings are layered in this order (later wins):
//! 1. `conf/application.yml` (or the file given on the command line)
//! 2. environment variables prefixed with `SENSORLINE_`, nested keys joined
//!    by `__` (e.g. `SENSORLINE_COLLECTOR__PORT=50052`)
//! 3. command line overrides applied by the binaries
//!
//! Every getter falls back to a default so a partial file still yields a
//! usable configuration.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use tracing::warn;

use crate::error::SensorlineError;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_COLLECTOR_PORT: u16 = 50051;
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_SCHEMA_MAX_AGE_DAYS: u64 = 5;
pub const DEFAULT_DB_BACKEND: &str = "postgresql";

const ENV_PREFIX: &str = "SENSORLINE";

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load the configuration file at `path`, the environment and `overrides`.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load<K, V>(path: &str, overrides: &[(K, V)]) -> Result<Self, SensorlineError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (key, value) in overrides {
            builder = builder.set_override(key.as_ref(), value.as_ref())?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    /// Build a configuration from YAML text only
    pub fn from_yaml(yaml: &str) -> Result<Self, SensorlineError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(Configuration { config })
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.config
            .get_string(key)
            .unwrap_or_else(|_| default.to_string())
    }

    fn opt_string(&self, key: &str) -> Option<String> {
        self.config
            .get_string(key)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    fn int_or(&self, key: &str, default: i64) -> i64 {
        self.config.get_int(key).unwrap_or(default)
    }

    fn port_or(&self, key: &str, default: u16) -> u16 {
        let value = self.int_or(key, default.into());
        u16::try_from(value).unwrap_or_else(|_| {
            warn!(key, value, default, "Port out of range, using default");
            default
        })
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.config.get_bool(key).unwrap_or(default)
    }

    fn millis_or(&self, key: &str, default: u64) -> Duration {
        Duration::from_millis(self.int_or(key, default as i64).max(0) as u64)
    }

    fn secs_or(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.int_or(key, default as i64).max(0) as u64)
    }

    fn days_or(&self, key: &str, default: u64) -> Duration {
        let days = self.int_or(key, default as i64).max(0) as u64;
        Duration::from_secs(days.saturating_mul(24 * 60 * 60))
    }

    // ========================================================================
    // Collector Configuration
    // ========================================================================

    pub fn collector(&self) -> CollectorSettings {
        CollectorSettings {
            address: self.string_or("collector.address", "0.0.0.0"),
            port: self.port_or("collector.port", DEFAULT_COLLECTOR_PORT),
            token: self.string_or("collector.token", ""),
            max_concurrent_calls: self
                .int_or(
                    "collector.max_concurrent_calls",
                    DEFAULT_MAX_CONCURRENT_CALLS as i64,
                )
                .max(1) as usize,
            schema_cache_path: PathBuf::from(
                self.string_or("collector.schema_cache_path", "data/dataschema.json"),
            ),
            schema_max_age: self.days_or(
                "collector.schema_max_age_days",
                DEFAULT_SCHEMA_MAX_AGE_DAYS,
            ),
            tls: ServerTlsSettings {
                enabled: self.bool_or("collector.tls.enabled", false),
                cert_path: self.opt_string("collector.tls.cert_path").map(PathBuf::from),
                key_path: self.opt_string("collector.tls.key_path").map(PathBuf::from),
                ca_cert_path: self
                    .opt_string("collector.tls.ca_cert_path")
                    .map(PathBuf::from),
            },
        }
    }

    // ========================================================================
    // Watcher Configuration
    // ========================================================================

    pub fn watcher(&self) -> WatcherSettings {
        WatcherSettings {
            watch_dir: PathBuf::from(self.string_or("watcher.watch_dir", "data/incoming")),
            archive_dir: PathBuf::from(self.string_or("watcher.archive_dir", "data/archive")),
            batch_size: self
                .int_or("watcher.batch_size", DEFAULT_BATCH_SIZE as i64)
                .max(1) as usize,
            readable_timeout: self.millis_or("watcher.readable_timeout_ms", 10_000),
            rescan_interval: self.secs_or("watcher.rescan_interval_secs", 60),
            relay: self.relay(),
        }
    }

    pub fn relay(&self) -> RelaySettings {
        RelaySettings {
            endpoint: self.string_or("watcher.collector.endpoint", "http://127.0.0.1:50051"),
            token: self.string_or("watcher.collector.token", ""),
            connect_timeout: self.millis_or("watcher.collector.connect_timeout_ms", 5_000),
            request_timeout: self.millis_or("watcher.collector.request_timeout_ms", 10_000),
            schema_cache_path: PathBuf::from(
                self.string_or("watcher.collector.schema_cache_path", "data/client-schema.json"),
            ),
            schema_max_age: self.days_or(
                "watcher.collector.schema_max_age_days",
                DEFAULT_SCHEMA_MAX_AGE_DAYS,
            ),
            ca_cert_path: self
                .opt_string("watcher.collector.ca_cert_path")
                .map(PathBuf::from),
            domain_name: self.opt_string("watcher.collector.domain_name"),
        }
    }

    // ========================================================================
    // Database Configuration
    // ========================================================================

    /// Database settings of the configured backend (`db.backend`).
    ///
    /// Connection parameters are read from the section named after the
    /// backend, e.g. `db.postgresql.host`.
    pub fn database(&self) -> DatabaseSettings {
        let backend = self.string_or("db.backend", DEFAULT_DB_BACKEND).to_lowercase();
        let section = format!("db.{}", backend);
        let default_port = match backend.as_str() {
            "mysql" => 3306,
            _ => 5432,
        };

        DatabaseSettings {
            url: self.opt_string(&format!("{}.url", section)),
            host: self.string_or(&format!("{}.host", section), "127.0.0.1"),
            port: self.port_or(&format!("{}.port", section), default_port),
            user: self.string_or(&format!("{}.user", section), ""),
            password: self.string_or(&format!("{}.password", section), ""),
            database: self.string_or(&format!("{}.database", section), "sensorline"),
            pool: PoolSettings {
                max_connections: self.int_or("db.pool.max_connections", 20).max(1) as u32,
                min_connections: self.int_or("db.pool.min_connections", 1).max(0) as u32,
                connect_timeout: self.secs_or("db.pool.connect_timeout_secs", 30),
                acquire_timeout: self.secs_or("db.pool.acquire_timeout_secs", 8),
                idle_timeout: self.secs_or("db.pool.idle_timeout_secs", 10),
                max_lifetime: self.secs_or("db.pool.max_lifetime_secs", 1800),
                sqlx_logging: self.bool_or("db.pool.sqlx_logging", false),
            },
            backend,
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging(&self) -> LoggingSettings {
        LoggingSettings {
            path: PathBuf::from(self.string_or("logs.path", "logs")),
            level: self.string_or("logs.level", "info"),
            console: self.bool_or("logs.console", true),
            file: self.bool_or("logs.file", true),
            rotation: self.string_or("logs.rotation", "daily"),
        }
    }
}

/// Collector server settings
#[derive(Clone)]
pub struct CollectorSettings {
    pub address: String,
    pub port: u16,
    pub token: String,
    pub max_concurrent_calls: usize,
    pub schema_cache_path: PathBuf,
    pub schema_max_age: Duration,
    pub tls: ServerTlsSettings,
}

impl CollectorSettings {
    /// Socket address string the server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// TLS identity of the collector server
#[derive(Debug, Clone, Default)]
pub struct ServerTlsSettings {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// CA used to verify client certificates; enables mutual TLS when set
    pub ca_cert_path: Option<PathBuf>,
}

/// Ingestion watcher settings
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub watch_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub batch_size: usize,
    pub readable_timeout: Duration,
    pub rescan_interval: Duration,
    pub relay: RelaySettings,
}

/// Client side settings for reaching the collector
#[derive(Clone)]
pub struct RelaySettings {
    pub endpoint: String,
    pub token: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub schema_cache_path: PathBuf,
    pub schema_max_age: Duration,
    pub ca_cert_path: Option<PathBuf>,
    pub domain_name: Option<String>,
}

/// Connection parameters of one database backend
#[derive(Clone)]
pub struct DatabaseSettings {
    pub backend: String,
    /// Full connection URL; takes precedence over the individual fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool: PoolSettings,
}

impl DatabaseSettings {
    /// Connection URL for the backend.
    ///
    /// User and password are inserted verbatim; use `url` for credentials
    /// containing URL reserved characters.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let scheme = match self.backend.as_str() {
            "mysql" => "mysql",
            _ => "postgres",
        };
        if self.user.is_empty() {
            format!("{}://{}:{}/{}", scheme, self.host, self.port, self.database)
        } else {
            format!(
                "{}://{}:{}@{}:{}/{}",
                scheme, self.user, self.password, self.host, self.port, self.database
            )
        }
    }
}

impl std::fmt::Debug for CollectorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorSettings")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("schema_cache_path", &self.schema_cache_path)
            .field("schema_max_age", &self.schema_max_age)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RelaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySettings")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("schema_cache_path", &self.schema_cache_path)
            .field("schema_max_age", &self.schema_max_age)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("domain_name", &self.domain_name)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub sqlx_logging: bool,
}

/// Logging settings
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub path: PathBuf,
    pub level: String,
    pub console: bool,
    pub file: bool,
    /// `daily`, `hourly` or `never`
    pub rotation: String,
}
