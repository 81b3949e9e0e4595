//! Reading and batch models
//!
//! A [`Reading`] is one temperature measurement of one location at one point
//! in time. A [`Batch`] groups readings by location id and is the unit the
//! watcher ships to the collector.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One temperature measurement.
///
/// Identity is the natural key `(location_id, captured_at)`. `id`,
/// `recorded_at` and `modified_at` are owned by the database and stay empty
/// until the reading has been persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub location_id: i64,
    pub temperature: f64,
    pub captured_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<NaiveDateTime>,
}

impl Reading {
    pub fn new(location_id: i64, temperature: f64, captured_at: NaiveDateTime) -> Self {
        Self {
            id: None,
            location_id,
            temperature,
            captured_at,
            recorded_at: None,
            modified_at: None,
        }
    }

    /// Natural key of the reading
    pub fn natural_key(&self) -> (i64, NaiveDateTime) {
        (self.location_id, self.captured_at)
    }
}

/// Readings grouped by location id, in arrival order per location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Batch {
    readings: BTreeMap<i64, Vec<Reading>>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading to the list of its location
    pub fn push(&mut self, reading: Reading) {
        self.readings
            .entry(reading.location_id)
            .or_default()
            .push(reading);
    }

    /// Append every reading of `other`, keeping per-location order
    pub fn merge(&mut self, other: Batch) {
        for (location_id, readings) in other.readings {
            self.readings.entry(location_id).or_default().extend(readings);
        }
    }

    /// Total number of readings across all locations
    pub fn len(&self) -> usize {
        self.readings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Location ids present in the batch, ascending
    pub fn locations(&self) -> impl Iterator<Item = i64> + '_ {
        self.readings.keys().copied()
    }

    /// Readings of one location
    pub fn for_location(&self, location_id: i64) -> &[Reading] {
        self.readings
            .get(&location_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All readings, grouped by ascending location id
    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.values().flatten()
    }

    pub fn into_readings(self) -> impl Iterator<Item = Reading> {
        self.readings.into_values().flatten()
    }
}

impl FromIterator<Reading> for Batch {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for reading in iter {
            batch.push(reading);
        }
        batch
    }
}
