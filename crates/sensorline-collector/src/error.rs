//! Collector startup errors

use sensorline_persistence::PersistError;

#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid bind address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("server error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("database error: {0}")]
    Persist(#[from] PersistError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
