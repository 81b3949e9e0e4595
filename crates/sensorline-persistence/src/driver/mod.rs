//! Database driver abstraction
//!
//! A [`DatabaseDriver`] owns the process-wide connection of one backend and
//! hands out [`DriverSession`]s, each wrapping exactly one transaction. The
//! engine only talks to these traits; the backend is chosen once from
//! configuration.

pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod sql;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sensorline_common::DatabaseSettings;

use crate::condition::QueryCondition;
use crate::entity::SemanticType;
use crate::error::PersistError;
use crate::value::{Row, SqlValue};

pub use memory::MemoryDriver;
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;

/// Supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Postgres,
    MySql,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgresql",
            BackendKind::MySql => "mysql",
            BackendKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(BackendKind::Postgres),
            "mysql" => Ok(BackendKind::MySql),
            "memory" => Ok(BackendKind::Memory),
            other => Err(PersistError::Connection(format!(
                "unsupported database backend '{}'",
                other
            ))),
        }
    }
}

/// Column as reported by the database catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

/// Table layout as reported by the database catalog.
///
/// An empty column list means the table does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
}

impl TableInfo {
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Column to fetch, with the type used to decode it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub semantic: SemanticType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, semantic: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic,
        }
    }
}

/// Column to write
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub name: String,
    pub semantic: SemanticType,
    pub value: SqlValue,
}

impl ColumnValue {
    pub fn new(name: impl Into<String>, semantic: SemanticType, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            semantic,
            value,
        }
    }
}

/// Process-wide handle to one backend
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn backend(&self) -> BackendKind;

    /// Establish the shared connection now instead of on first use
    async fn connect(&self) -> Result<(), PersistError>;

    /// Columns and primary key of `table`
    async fn describe_table(&self, table: &str) -> Result<TableInfo, PersistError>;

    /// Start a transaction
    async fn begin(&self) -> Result<Box<dyn DriverSession>, PersistError>;

    /// Release the shared connection
    async fn close(&self) -> Result<(), PersistError>;
}

/// One open transaction
#[async_trait]
pub trait DriverSession: Send {
    async fn select(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        condition: &QueryCondition,
    ) -> Result<Vec<Row>, PersistError>;

    /// Insert one row and return the generated primary key, if any
    async fn insert(
        &mut self,
        table: &str,
        values: &[ColumnValue],
        primary_key: &str,
    ) -> Result<Option<i64>, PersistError>;

    /// Returns the number of affected rows
    async fn update(
        &mut self,
        table: &str,
        values: &[ColumnValue],
        condition: &QueryCondition,
    ) -> Result<u64, PersistError>;

    /// Returns the number of deleted rows
    async fn delete(&mut self, table: &str, condition: &QueryCondition)
    -> Result<u64, PersistError>;

    async fn commit(self: Box<Self>) -> Result<(), PersistError>;

    async fn rollback(self: Box<Self>) -> Result<(), PersistError>;
}

/// Build the driver configured by `settings.backend`.
///
/// No connection is opened; call [`DatabaseDriver::connect`] to fail fast.
pub fn driver_from_settings(
    settings: &DatabaseSettings,
) -> Result<Arc<dyn DatabaseDriver>, PersistError> {
    let driver: Arc<dyn DatabaseDriver> = match settings.backend.parse::<BackendKind>()? {
        BackendKind::Postgres => Arc::new(PostgresDriver::new(settings.clone())),
        BackendKind::MySql => Arc::new(MySqlDriver::new(settings.clone())),
        BackendKind::Memory => Arc::new(MemoryDriver::with_known_tables()),
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("postgresql".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("Postgres".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("mysql".parse::<BackendKind>().unwrap(), BackendKind::MySql);
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("oracle".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_table_info_lookup() {
        let info = crate::entity::reading::reading_table();
        assert!(info.exists());
        assert!(info.column("LOCATION_ID").is_some());
        assert!(info.column("nope").is_none());
        assert!(!TableInfo::default().exists());
    }
}
