//! Explicit column mapping for persistable entities
//!
//! Every persistable type lists its columns once, in table order, with a
//! semantic type, a role and a getter/setter pair. The engine never inspects
//! the type beyond this table.

pub mod reading;

use crate::error::PersistError;
use crate::value::{Row, SqlValue};

/// Semantic type of a mapped column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    Decimal,
    Timestamp,
    Text,
}

impl SemanticType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Decimal => "decimal",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Text => "text",
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the engine treats a column when writing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Written on insert and update
    Plain,
    /// Part of the natural identity; probed when no primary key value is set
    NaturalKey,
    /// Owned by the database (surrogate key, insert default); never updated
    ServerAssigned,
    /// Stamped with the current time on every update
    ModifiedStamp,
}

pub type Getter<E> = fn(&E) -> SqlValue;
pub type Setter<E> = fn(&mut E, SqlValue) -> Result<(), PersistError>;

/// One mapped column
pub struct ColumnDef<E> {
    pub name: &'static str,
    pub semantic: SemanticType,
    pub role: ColumnRole,
    pub get: Getter<E>,
    pub set: Setter<E>,
}

impl<E> std::fmt::Debug for ColumnDef<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDef")
            .field("name", &self.name)
            .field("semantic", &self.semantic)
            .field("role", &self.role)
            .finish()
    }
}

/// A type the engine can store
pub trait Persistable: Default + Send + Sync + 'static {
    /// Mapped columns in table order
    fn columns() -> &'static [ColumnDef<Self>];

    /// Backing table; the type name lower-cased unless overridden
    fn table_name() -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_lowercase()
    }

    fn column(name: &str) -> Option<&'static ColumnDef<Self>> {
        Self::columns()
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Current values of every mapped column
    fn to_row(&self) -> Row {
        let mut row = Row::new();
        for column in Self::columns() {
            row.insert(column.name, (column.get)(self));
        }
        row
    }

    /// Build an entity from a fetched row; absent columns keep their default
    fn from_row(row: &Row) -> Result<Self, PersistError> {
        let mut entity = Self::default();
        for column in Self::columns() {
            if row.contains(column.name) {
                (column.set)(&mut entity, row.get(column.name).clone())?;
            }
        }
        Ok(entity)
    }
}

// ============================================================================
// Setter helpers
// ============================================================================

pub(crate) fn required_i64(column: &str, value: SqlValue) -> Result<i64, PersistError> {
    value
        .as_i64()
        .ok_or_else(|| PersistError::decode(column, format!("expected integer, got {:?}", value)))
}

pub(crate) fn optional_i64(column: &str, value: SqlValue) -> Result<Option<i64>, PersistError> {
    if value.is_null() {
        return Ok(None);
    }
    required_i64(column, value).map(Some)
}

pub(crate) fn required_f64(column: &str, value: SqlValue) -> Result<f64, PersistError> {
    value
        .as_f64()
        .ok_or_else(|| PersistError::decode(column, format!("expected decimal, got {:?}", value)))
}

pub(crate) fn required_timestamp(
    column: &str,
    value: SqlValue,
) -> Result<chrono::NaiveDateTime, PersistError> {
    value.as_timestamp().ok_or_else(|| {
        PersistError::decode(column, format!("expected timestamp, got {:?}", value))
    })
}

pub(crate) fn optional_timestamp(
    column: &str,
    value: SqlValue,
) -> Result<Option<chrono::NaiveDateTime>, PersistError> {
    if value.is_null() {
        return Ok(None);
    }
    required_timestamp(column, value).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct SensorLocation;

    impl Persistable for SensorLocation {
        fn columns() -> &'static [ColumnDef<Self>] {
            &[]
        }
    }

    #[test]
    fn test_default_table_name() {
        assert_eq!(SensorLocation::table_name(), "sensorlocation");
    }

    #[test]
    fn test_setter_helpers() {
        assert_eq!(required_i64("id", SqlValue::Integer(4)).unwrap(), 4);
        assert!(required_i64("id", SqlValue::Text("4".into())).is_err());
        assert_eq!(optional_i64("id", SqlValue::Null).unwrap(), None);
        assert_eq!(required_f64("t", SqlValue::Integer(2)).unwrap(), 2.0);
        assert!(optional_timestamp("ts", SqlValue::Null).unwrap().is_none());
    }
}
