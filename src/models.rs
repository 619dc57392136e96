//! Data models.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One dispatch event as published by the open-data API
///
/// Kept as the untyped JSON object so that a single bad field only rejects
/// its own record, not the whole page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Short identifier for log lines and error messages
    ///
    /// Prefers the event number, falls back to the source `_id`.
    pub fn identifier(&self) -> String {
        if let Some(Value::String(event)) = self.get("Event_Number") {
            let event = event.trim();
            if !event.is_empty() {
                return format!("event {event}");
            }
        }
        match self.get("_id") {
            Some(Value::Number(id)) => format!("_id={id}"),
            Some(Value::String(id)) => format!("_id={}", id.trim()),
            _ => "<unidentified>".to_string(),
        }
    }
}

impl From<Value> for RawRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// A dispatch event ready for storage, one row of table `dispatch`
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DispatchRow {
    /// Source record id; not unique across pages
    pub id: i64,
    /// Primary key
    pub event_number: String,
    pub street_num: Option<i32>,
    pub street_name: String,
    /// Stored form, ampersands rejoined as `" & "`
    pub full_address: String,
    pub city: String,
    pub reporting_district: Option<String>,
    pub dispatch_date_time: NaiveDateTime,
    pub dispatch_date: NaiveDate,
    pub dispatch_time: NaiveTime,
    pub incident_type: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl DispatchRow {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }
}
