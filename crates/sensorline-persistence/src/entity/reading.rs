//! Column mapping of [`Reading`]

use sensorline_common::Reading;

use super::{
    ColumnDef, ColumnRole, Persistable, SemanticType, optional_i64, optional_timestamp,
    required_f64, required_i64, required_timestamp,
};
use crate::driver::{ColumnInfo, TableInfo};
use crate::error::PersistError;
use crate::value::SqlValue;

fn get_id(r: &Reading) -> SqlValue {
    r.id.into()
}

fn set_id(r: &mut Reading, v: SqlValue) -> Result<(), PersistError> {
    r.id = optional_i64("id", v)?;
    Ok(())
}

fn get_location_id(r: &Reading) -> SqlValue {
    r.location_id.into()
}

fn set_location_id(r: &mut Reading, v: SqlValue) -> Result<(), PersistError> {
    r.location_id = required_i64("location_id", v)?;
    Ok(())
}

fn get_temperature(r: &Reading) -> SqlValue {
    r.temperature.into()
}

fn set_temperature(r: &mut Reading, v: SqlValue) -> Result<(), PersistError> {
    r.temperature = required_f64("temperature", v)?;
    Ok(())
}

fn get_captured_at(r: &Reading) -> SqlValue {
    r.captured_at.into()
}

fn set_captured_at(r: &mut Reading, v: SqlValue) -> Result<(), PersistError> {
    r.captured_at = required_timestamp("captured_at", v)?;
    Ok(())
}

fn get_recorded_at(r: &Reading) -> SqlValue {
    r.recorded_at.into()
}

fn set_recorded_at(r: &mut Reading, v: SqlValue) -> Result<(), PersistError> {
    r.recorded_at = optional_timestamp("recorded_at", v)?;
    Ok(())
}

fn get_modified_at(r: &Reading) -> SqlValue {
    r.modified_at.into()
}

fn set_modified_at(r: &mut Reading, v: SqlValue) -> Result<(), PersistError> {
    r.modified_at = optional_timestamp("modified_at", v)?;
    Ok(())
}

static READING_COLUMNS: [ColumnDef<Reading>; 6] = [
    ColumnDef {
        name: "id",
        semantic: SemanticType::Integer,
        role: ColumnRole::ServerAssigned,
        get: get_id,
        set: set_id,
    },
    ColumnDef {
        name: "location_id",
        semantic: SemanticType::Integer,
        role: ColumnRole::NaturalKey,
        get: get_location_id,
        set: set_location_id,
    },
    ColumnDef {
        name: "temperature",
        semantic: SemanticType::Decimal,
        role: ColumnRole::Plain,
        get: get_temperature,
        set: set_temperature,
    },
    ColumnDef {
        name: "captured_at",
        semantic: SemanticType::Timestamp,
        role: ColumnRole::NaturalKey,
        get: get_captured_at,
        set: set_captured_at,
    },
    ColumnDef {
        name: "recorded_at",
        semantic: SemanticType::Timestamp,
        role: ColumnRole::ServerAssigned,
        get: get_recorded_at,
        set: set_recorded_at,
    },
    ColumnDef {
        name: "modified_at",
        semantic: SemanticType::Timestamp,
        role: ColumnRole::ModifiedStamp,
        get: get_modified_at,
        set: set_modified_at,
    },
];

impl Persistable for Reading {
    fn columns() -> &'static [ColumnDef<Self>] {
        &READING_COLUMNS
    }
}

/// Layout of the `reading` table as created by the shipped schema scripts.
///
/// Used to provision the in-memory backend.
pub fn reading_table() -> TableInfo {
    let column = |name: &str, data_type: &str, nullable: bool, has_default: bool| ColumnInfo {
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        has_default,
    };
    TableInfo {
        name: Reading::table_name(),
        columns: vec![
            column("id", "bigint", false, true),
            column("location_id", "bigint", false, false),
            column("temperature", "double precision", false, false),
            column("captured_at", "timestamp", false, false),
            column("recorded_at", "timestamp", false, true),
            column("modified_at", "timestamp", true, false),
        ],
        primary_key: vec!["id".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn test_reading_table_name() {
        assert_eq!(Reading::table_name(), "reading");
    }

    #[test]
    fn test_row_round_trip() {
        let captured = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let mut reading = Reading::new(12, 21.5, captured);
        reading.id = Some(7);

        let row = reading.to_row();
        assert_eq!(row.get("location_id"), &SqlValue::Integer(12));
        assert_eq!(row.get("recorded_at"), &SqlValue::Null);

        let restored = Reading::from_row(&row).unwrap();
        assert_eq!(restored, reading);
    }

    #[test]
    fn test_from_row_rejects_wrong_type() {
        let row = crate::value::Row::new().with("location_id", "twelve");
        assert!(matches!(
            Reading::from_row(&row),
            Err(PersistError::Decode { .. })
        ));
    }

    #[test]
    fn test_natural_key_columns() {
        let natural: Vec<&str> = Reading::columns()
            .iter()
            .filter(|c| c.role == ColumnRole::NaturalKey)
            .map(|c| c.name)
            .collect();
        assert_eq!(natural, vec!["location_id", "captured_at"]);
    }
}
