//! Persistence error types

use sea_orm::DbErr;

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    /// Table layout cannot back the entity; fatal for that entity type
    #[error("schema error for table '{table}': {reason}")]
    Schema { table: String, reason: String },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("entity of table '{table}' carries no primary key value")]
    MissingPrimaryKey { table: String },

    #[error("cannot decode column '{column}': {reason}")]
    Decode { column: String, reason: String },

    #[error("statement error: {0}")]
    Statement(String),

    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("cannot export to {path}: {reason}")]
    Export { path: String, reason: String },
}

impl PersistError {
    pub fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        PersistError::Schema {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(column: impl Into<String>, reason: impl Into<String>) -> Self {
        PersistError::Decode {
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub fn export(path: &std::path::Path, reason: impl Into<String>) -> Self {
        PersistError::Export {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, PersistError::Schema { .. })
    }

    /// The database could not be reached; the call may succeed later
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            PersistError::Connection(_)
                | PersistError::Database(DbErr::ConnectionAcquire(_) | DbErr::Conn(_))
        )
    }
}

impl From<sea_orm::sea_query::error::Error> for PersistError {
    fn from(e: sea_orm::sea_query::error::Error) -> Self {
        PersistError::Statement(e.to_string())
    }
}
