//! Backend neutral column values

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use sea_orm::Value;

use crate::entity::SemanticType;
use crate::error::PersistError;

/// A single bound column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Decimal(f64),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Convert into a sea-orm value typed after `semantic`.
    ///
    /// NULL needs the column type so Postgres accepts the parameter.
    pub fn into_db_value(self, semantic: SemanticType) -> Value {
        match (self, semantic) {
            (SqlValue::Null, SemanticType::Integer) => Value::from(None::<i64>),
            (SqlValue::Null, SemanticType::Decimal) => Value::from(None::<f64>),
            (SqlValue::Null, SemanticType::Timestamp) => Value::from(None::<NaiveDateTime>),
            (SqlValue::Null, SemanticType::Text) => Value::from(None::<String>),
            (SqlValue::Integer(v), SemanticType::Decimal) => Value::from(v as f64),
            (value, _) => value.into(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Decimal(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<SqlValue> for Value {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Value::from(None::<String>),
            SqlValue::Integer(v) => Value::from(v),
            SqlValue::Decimal(v) => Value::from(v),
            SqlValue::Timestamp(v) => Value::from(v),
            SqlValue::Text(v) => Value::from(v),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One fetched row, keyed by lower-cased column name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: &str, value: SqlValue) {
        self.values.insert(column.to_lowercase(), value);
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value.into());
        self
    }

    /// Value of `column`; absent columns read as NULL
    pub fn get(&self, column: &str) -> &SqlValue {
        static NULL: SqlValue = SqlValue::Null;
        self.values.get(&column.to_lowercase()).unwrap_or(&NULL)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(&column.to_lowercase())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Require a non-null integer in `column`
    pub fn require_i64(&self, column: &str) -> Result<i64, PersistError> {
        self.get(column)
            .as_i64()
            .ok_or_else(|| PersistError::decode(column, "expected a non-null integer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(Some(5_i64)), SqlValue::Integer(5));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert!(SqlValue::from(None::<f64>).is_null());
    }

    #[test]
    fn test_row_is_case_insensitive() {
        let row = Row::new().with("Location_ID", 12_i64);
        assert_eq!(row.get("location_id"), &SqlValue::Integer(12));
        assert!(row.contains("LOCATION_ID"));
        assert_eq!(row.get("missing"), &SqlValue::Null);
        assert_eq!(row.require_i64("location_id").unwrap(), 12);
        assert!(row.require_i64("missing").is_err());
    }

    #[test]
    fn test_integer_widens_to_decimal() {
        assert_eq!(SqlValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(
            SqlValue::Integer(3).into_db_value(SemanticType::Decimal),
            Value::from(3.0_f64)
        );
    }

    #[test]
    fn test_typed_null() {
        assert_eq!(
            SqlValue::Null.into_db_value(SemanticType::Timestamp),
            Value::from(None::<NaiveDateTime>)
        );
        assert_eq!(
            SqlValue::Null.into_db_value(SemanticType::Integer),
            Value::from(None::<i64>)
        );
    }
}
