//! Sensorline Persistence - generic entity persistence over relational backends
//!
//! This crate provides:
//! - An explicit per-entity column mapping ([`Persistable`])
//! - A schema catalog that discovers table layouts and primary keys once per
//!   process
//! - The [`PersistenceEngine`] with transactional upsert, load, find and delete
//! - Database drivers for PostgreSQL, MySQL and an in-memory backend
//! - JSON export of single entities

pub mod catalog;
pub mod condition;
pub mod driver;
pub mod engine;
pub mod entity;
pub mod error;
pub mod export;
pub mod value;

// Re-export sea-orm for convenience
pub use sea_orm;

pub use catalog::{DescribedColumn, EntityDescriptor, SchemaCatalog};
pub use condition::QueryCondition;
pub use driver::{
    BackendKind, ColumnInfo, ColumnSpec, ColumnValue, DatabaseDriver, DriverSession,
    MemoryDriver, MySqlDriver, PostgresDriver, TableInfo, driver_from_settings,
};
pub use engine::{PersistenceEngine, UpsertOutcome};
pub use entity::{ColumnDef, ColumnRole, Persistable, SemanticType};
pub use error::PersistError;
pub use export::{save_to_json, to_json_map};
pub use value::{Row, SqlValue};
