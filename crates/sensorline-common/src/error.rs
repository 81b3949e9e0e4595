//! Error types shared by the Sensorline processes

/// Errors raised while bootstrapping a process
#[derive(thiserror::Error, Debug)]
pub enum SensorlineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("logging error: {0}")]
    Logging(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SensorlineError {
    pub fn invalid_setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        SensorlineError::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
