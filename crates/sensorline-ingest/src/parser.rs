//! Record line parser
//!
//! One input line carries the readings of several locations taken at the same
//! moment:
//!
//! ```text
//! 2024-05-01|08:00:00|{"12": 21.5, "13": 19.8}
//! 01.05.2024|08:00|{'12': '21.5'}
//! ```
//!
//! Single quotes are accepted and normalized before decoding. Temperatures
//! may be JSON numbers or numeric strings; no range check is applied.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sensorline_common::{Batch, Reading};
use serde_json::Value;

use crate::error::IngestError;

const FIELD_SEPARATOR: char = '|';
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// One parsed input line
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLine {
    pub captured_at: NaiveDateTime,
    /// Temperature by location id
    pub measurements: BTreeMap<i64, f64>,
}

impl RecordLine {
    /// One reading per location, each in its own single element list
    pub fn into_batch(self) -> Batch {
        let captured_at = self.captured_at;
        self.measurements
            .into_iter()
            .map(|(location_id, temperature)| Reading::new(location_id, temperature, captured_at))
            .collect()
    }
}

impl fmt::Display for RecordLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{{",
            self.captured_at.format("%Y-%m-%d"),
            self.captured_at.format("%H:%M:%S")
        )?;
        for (i, (location_id, temperature)) in self.measurements.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\": {}", location_id, temperature)?;
        }
        f.write_str("}")
    }
}

/// Parse one non-blank line
pub fn parse_line(line: &str) -> Result<RecordLine, IngestError> {
    let fields: Vec<&str> = line.trim().split(FIELD_SEPARATOR).collect();
    let [date, time, map] = fields.as_slice() else {
        return Err(IngestError::malformed(format!(
            "expected 3 '|' separated fields, found {}",
            fields.len()
        )));
    };

    let captured_at = parse_date(date)?.and_time(parse_time(time)?);

    let normalized = map.trim().replace('\'', "\"");
    let decoded: Value = serde_json::from_str(&normalized)
        .map_err(|e| IngestError::malformed(format!("measurement map is not valid JSON: {}", e)))?;
    let Value::Object(entries) = decoded else {
        return Err(IngestError::malformed("measurement map is not an object"));
    };

    let mut measurements = BTreeMap::new();
    for (sensor_id, value) in entries {
        let location_id = sensor_id
            .trim()
            .parse::<i64>()
            .map_err(|_| IngestError::malformed(format!("sensor id '{}' is not an integer", sensor_id)))?;
        let temperature = decimal(&value).ok_or_else(|| {
            IngestError::malformed(format!("temperature '{}' of sensor {} is not a number", value, location_id))
        })?;
        measurements.insert(location_id, temperature);
    }

    Ok(RecordLine {
        captured_at,
        measurements,
    })
}

fn parse_date(text: &str) -> Result<NaiveDate, IngestError> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .ok_or_else(|| IngestError::malformed(format!("unrecognized date '{}'", text)))
}

fn parse_time(text: &str) -> Result<NaiveTime, IngestError> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
        .ok_or_else(|| IngestError::malformed(format!("unrecognized time '{}'", text)))
}

fn decimal(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
