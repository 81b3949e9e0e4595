//! Error types of the ingestion side

use std::path::PathBuf;

/// Errors raised while reading and parsing input files
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("file {path} did not become readable within {waited_ms} ms")]
    NotReadable { path: PathBuf, waited_ms: u128 },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl IngestError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        IngestError::MalformedRecord(reason.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of one call to the collector.
///
/// Only [`RelayError::Transport`] is worth retrying; everything the collector
/// explicitly rejected is terminal for the batch.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("collector rejected the call ({code:?}): {message}")]
    Application { code: tonic::Code, message: String },

    #[error("relay configuration error: {0}")]
    Config(String),

    #[error("payload error: {0}")]
    Payload(#[from] sensorline_api::PayloadError),

    #[error("schema cache error: {0}")]
    SchemaCache(#[from] sensorline_api::SchemaCacheError),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Transport(_))
    }
}

impl From<tonic::Status> for RelayError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;

        match status.code() {
            Code::Unavailable | Code::Unknown | Code::DeadlineExceeded | Code::Cancelled => {
                RelayError::Transport(format!("{:?}: {}", status.code(), status.message()))
            }
            code => RelayError::Application {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

impl From<tonic::transport::Error> for RelayError {
    fn from(e: tonic::transport::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}
