//! JSON export of persistable entities
//!
//! The document is built from the mapping table, so it carries the column
//! names of the table. Timestamps are written as `YYYY-MM-DD HH:MM:SS`.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde_json::{Map, Value};
use tracing::info;

use crate::entity::Persistable;
use crate::error::PersistError;
use crate::value::SqlValue;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column name to value map of `entity`
pub fn to_json_map<E: Persistable>(entity: &E) -> Map<String, Value> {
    E::columns()
        .iter()
        .map(|column| (column.name.to_string(), json_value((column.get)(entity))))
        .collect()
}

fn json_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::from(v),
        SqlValue::Decimal(v) => Value::from(v),
        SqlValue::Timestamp(v) => Value::from(v.format(TIMESTAMP_FORMAT).to_string()),
        SqlValue::Text(v) => Value::from(v),
    }
}

/// File name used when none is given: `<Type>_<YYYYMMDD_HHMMSS>.json`
pub fn default_file_name<E: Persistable>(now: NaiveDateTime) -> String {
    let full = std::any::type_name::<E>();
    let type_name = full.rsplit("::").next().unwrap_or(full);
    format!("{}_{}.json", type_name, now.format("%Y%m%d_%H%M%S"))
}

/// Write `entity` as pretty JSON into `dir`; returns the written path
pub async fn save_to_json<E: Persistable>(
    entity: &E,
    dir: &Path,
    file_name: Option<&str>,
) -> Result<PathBuf, PersistError> {
    let file_name = match file_name {
        Some(name) => name.to_string(),
        None => default_file_name::<E>(Local::now().naive_local()),
    };
    let path = dir.join(file_name);

    let document = serde_json::to_vec_pretty(&Value::Object(to_json_map(entity)))
        .map_err(|e| PersistError::export(&path, e.to_string()))?;
    tokio::fs::write(&path, document)
        .await
        .map_err(|e| PersistError::export(&path, e.to_string()))?;

    info!(table = %E::table_name(), path = %path.display(), "Exported entity");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sensorline_common::Reading;

    use super::*;

    fn captured() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_map_follows_columns() {
        let mut reading = Reading::new(12, 21.5, captured());
        reading.id = Some(3);

        let map = to_json_map(&reading);
        assert_eq!(map["id"], Value::from(3));
        assert_eq!(map["location_id"], Value::from(12));
        assert_eq!(map["temperature"], Value::from(21.5));
        assert_eq!(map["captured_at"], Value::from("2024-05-01 08:00:00"));
        assert_eq!(map["modified_at"], Value::Null);
        assert_eq!(map.len(), Reading::columns().len());
    }

    #[test]
    fn test_default_file_name() {
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 5)
            .unwrap();
        assert_eq!(default_file_name::<Reading>(at), "Reading_20240501_083005.json");
    }

    #[tokio::test]
    async fn test_save_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let reading = Reading::new(13, 19.8, captured());

        let path = save_to_json(&reading, dir.path(), Some("reading.json"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("reading.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["location_id"], Value::from(13));
        assert_eq!(value["temperature"], Value::from(19.8));
    }

    #[tokio::test]
    async fn test_save_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reading = Reading::new(1, 1.0, captured());
        let result = save_to_json(&reading, &dir.path().join("absent"), None).await;
        assert!(matches!(result, Err(PersistError::Export { .. })));
    }
}
