//! Record normalization
//!
//! Turns one [`RawRecord`] into typed, trimmed fields. Column widths are
//! checked here so that a single oversize value rejects its own record
//! instead of failing a whole batch insert.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use crate::errors::DispatchError;
use crate::models::{Coordinates, DispatchRow, RawRecord};

const EVENT_NUMBER_MAX: usize = 20;
const STREET_NAME_MAX: usize = 40;
const FULL_ADDRESS_MAX: usize = 60;
const CITY_MAX: usize = 10;
const DISTRICT_MAX: usize = 6;
const INCIDENT_TYPE_MAX: usize = 100;

const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p"];

/// A normalized record waiting for coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub id: i64,
    pub event_number: String,
    pub street_num: Option<i32>,
    pub street_name: String,
    pub full_address: String,
    /// Same as `full_address` with `&` sent as `%26`
    pub geocode_address: String,
    pub city: String,
    pub reporting_district: Option<String>,
    pub dispatch_date_time: NaiveDateTime,
    pub dispatch_date: NaiveDate,
    pub dispatch_time: NaiveTime,
    pub incident_type: String,
}

impl NormalizedRecord {
    /// Complete the row with the geocoding result
    pub fn with_coordinates(self, coordinates: Option<Coordinates>) -> DispatchRow {
        DispatchRow {
            id: self.id,
            event_number: self.event_number,
            street_num: self.street_num,
            street_name: self.street_name,
            full_address: self.full_address,
            city: self.city,
            reporting_district: self.reporting_district,
            dispatch_date_time: self.dispatch_date_time,
            dispatch_date: self.dispatch_date,
            dispatch_time: self.dispatch_time,
            incident_type: self.incident_type,
            lat: coordinates.map(|c| c.lat),
            lon: coordinates.map(|c| c.lon),
        }
    }
}

/// Address in its stored and geocoder-bound forms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAddress {
    pub stored: String,
    pub geocode: String,
}

/// Rebuild an address around its ampersands.
///
/// Intersections such as `"MAIN ST&3RD ST"` are stored as `"MAIN ST & 3RD ST"`
/// and sent to the geocoder as `"MAIN ST %26 3RD ST"`, since a bare `&` would
/// end the query parameter. Empty pieces between ampersands are dropped.
pub fn split_address(full_address: &str) -> SplitAddress {
    let trimmed = full_address.trim();
    if !trimmed.contains('&') {
        return SplitAddress {
            stored: trimmed.to_string(),
            geocode: trimmed.to_string(),
        };
    }

    let pieces: Vec<&str> = trimmed
        .split('&')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect();

    SplitAddress {
        stored: pieces.join(" & "),
        geocode: pieces.join(" %26 "),
    }
}

/// Normalize one raw API record
pub fn normalize(raw: &RawRecord) -> Result<NormalizedRecord, DispatchError> {
    let fields = Fields { raw };

    let id = fields.integer("_id")?;
    let event_number = fields.required_str("Event_Number", EVENT_NUMBER_MAX)?;
    let street_num = fields.optional_integer("StreetNum")?;
    let street_name = fields.bounded_str("StreetName", STREET_NAME_MAX)?;

    let address = split_address(fields.string("Full_Address")?);
    fields.check_width("Full_Address", &address.stored, FULL_ADDRESS_MAX)?;

    let city = fields.bounded_str("City", CITY_MAX)?;
    let reporting_district = fields.nullable_str("Reporting_District", DISTRICT_MAX)?;
    let dispatch_date_time = fields.date_time("Dispatch_Date_Time")?;
    let dispatch_date = fields.date("Dispatch_Date")?;
    let dispatch_time = fields.time("Dispatch_Time")?;
    let incident_type = fields.bounded_str("Incident_Type_Desc_Display", INCIDENT_TYPE_MAX)?;

    Ok(NormalizedRecord {
        id,
        event_number,
        street_num,
        street_name,
        full_address: address.stored,
        geocode_address: address.geocode,
        city,
        reporting_district,
        dispatch_date_time,
        dispatch_date,
        dispatch_time,
        incident_type,
    })
}

/// Typed field access that reports which field was wrong
struct Fields<'a> {
    raw: &'a RawRecord,
}

impl<'a> Fields<'a> {
    fn malformed(&self, field: &'static str, reason: impl Into<String>) -> DispatchError {
        DispatchError::MalformedRecord {
            record: self.raw.identifier(),
            field,
            reason: reason.into(),
        }
    }

    /// Trimmed string value; missing, null or non-string values are errors
    fn string(&self, field: &'static str) -> Result<&'a str, DispatchError> {
        match self.raw.get(field) {
            Some(Value::String(s)) => Ok(s.trim()),
            Some(Value::Null) => Err(self.malformed(field, "is null")),
            Some(other) => Err(self.malformed(field, format!("is not a string: {other}"))),
            None => Err(self.malformed(field, "is missing")),
        }
    }

    fn check_width(
        &self,
        field: &'static str,
        value: &str,
        max: usize,
    ) -> Result<(), DispatchError> {
        let len = value.chars().count();
        if len > max {
            return Err(self.malformed(field, format!("is {len} characters, limit is {max}")));
        }
        Ok(())
    }

    /// Present string of at most `max` characters, possibly empty
    fn bounded_str(&self, field: &'static str, max: usize) -> Result<String, DispatchError> {
        let value = self.string(field)?;
        self.check_width(field, value, max)?;
        Ok(value.to_string())
    }

    fn required_str(&self, field: &'static str, max: usize) -> Result<String, DispatchError> {
        let value = self.bounded_str(field, max)?;
        if value.is_empty() {
            return Err(self.malformed(field, "is empty"));
        }
        Ok(value)
    }

    fn nullable_str(
        &self,
        field: &'static str,
        max: usize,
    ) -> Result<Option<String>, DispatchError> {
        match self.raw.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => {
                let value = self.string(field)?;
                self.check_width(field, value, max)?;
                Ok(Some(value.to_string()))
            }
        }
    }

    fn integer(&self, field: &'static str) -> Result<i64, DispatchError> {
        match self.raw.get(field) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| self.malformed(field, format!("is not an integer: {n}"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| self.malformed(field, format!("is not an integer: {s:?}"))),
            Some(Value::Null) => Err(self.malformed(field, "is null")),
            Some(other) => Err(self.malformed(field, format!("is not an integer: {other}"))),
            None => Err(self.malformed(field, "is missing")),
        }
    }

    /// Absent, null and blank values all mean "no value"
    fn optional_integer(&self, field: &'static str) -> Result<Option<i32>, DispatchError> {
        match self.raw.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.malformed(field, format!("is not an integer: {s:?}"))),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| self.malformed(field, format!("is not an integer: {n}"))),
            Some(other) => Err(self.malformed(field, format!("is not an integer: {other}"))),
        }
    }

    fn date_time(&self, field: &'static str) -> Result<NaiveDateTime, DispatchError> {
        let value = self.string(field)?;
        parse_date_time(value)
            .ok_or_else(|| self.malformed(field, format!("is not a timestamp: {value:?}")))
    }

    fn date(&self, field: &'static str) -> Result<NaiveDate, DispatchError> {
        let value = self.string(field)?;
        DATE_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
            .or_else(|| parse_date_time(value).map(|dt| dt.date()))
            .ok_or_else(|| self.malformed(field, format!("is not a date: {value:?}")))
    }

    fn time(&self, field: &'static str) -> Result<NaiveTime, DispatchError> {
        let value = self.string(field)?;
        TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(value, format).ok())
            .ok_or_else(|| self.malformed(field, format!("is not a time of day: {value:?}")))
    }
}

fn parse_date_time(value: &str) -> Option<NaiveDateTime> {
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "_id": 101,
            "Event_Number": " RF21001234 ",
            "StreetNum": "1200 ",
            "StreetName": " N MAIN ST",
            "Full_Address": " 1200 N MAIN ST ",
            "City": "ROCKFORD ",
            "Reporting_District": " R12 ",
            "Dispatch_Date_Time": "2021-03-04T17:45:12",
            "Dispatch_Date": "2021-03-04",
            "Dispatch_Time": "17:45:12",
            "Incident_Type_Desc_Display": " TRAFFIC STOP "
        })
    }

    fn with(field: &str, value: serde_json::Value) -> RawRecord {
        let mut raw = sample();
        raw[field] = value;
        RawRecord::from(raw)
    }

    fn without(field: &str) -> RawRecord {
        let mut raw = sample();
        raw.as_object_mut().unwrap().remove(field);
        RawRecord::from(raw)
    }

    #[test]
    fn test_normalize_trims_fields() {
        let record = normalize(&RawRecord::from(sample())).unwrap();

        assert_eq!(record.id, 101);
        assert_eq!(record.event_number, "RF21001234");
        assert_eq!(record.street_num, Some(1200));
        assert_eq!(record.street_name, "N MAIN ST");
        assert_eq!(record.full_address, "1200 N MAIN ST");
        assert_eq!(record.geocode_address, "1200 N MAIN ST");
        assert_eq!(record.city, "ROCKFORD");
        assert_eq!(record.reporting_district.as_deref(), Some("R12"));
        assert_eq!(
            record.dispatch_date_time,
            NaiveDate::from_ymd_opt(2021, 3, 4)
                .unwrap()
                .and_hms_opt(17, 45, 12)
                .unwrap()
        );
        assert_eq!(record.dispatch_date, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert_eq!(record.dispatch_time, NaiveTime::from_hms_opt(17, 45, 12).unwrap());
        assert_eq!(record.incident_type, "TRAFFIC STOP");
    }

    #[test]
    fn test_split_address_without_ampersand() {
        let split = split_address("  1200 N MAIN ST ");
        assert_eq!(split.stored, "1200 N MAIN ST");
        assert_eq!(split.geocode, "1200 N MAIN ST");
    }

    #[test]
    fn test_split_address_one_ampersand() {
        let split = split_address("MAIN ST & 3RD ST");
        assert_eq!(split.stored, "MAIN ST & 3RD ST");
        assert_eq!(split.geocode, "MAIN ST %26 3RD ST");

        let split = split_address("MAIN ST&3RD ST");
        assert_eq!(split.stored, "MAIN ST & 3RD ST");
        assert_eq!(split.geocode, "MAIN ST %26 3RD ST");
    }

    #[test]
    fn test_split_address_multiple_ampersands() {
        let split = split_address(" E STATE ST&ALPINE RD  &  PERRYVILLE RD ");
        assert_eq!(split.stored, "E STATE ST & ALPINE RD & PERRYVILLE RD");
        assert_eq!(split.geocode, "E STATE ST %26 ALPINE RD %26 PERRYVILLE RD");
    }

    #[test]
    fn test_split_address_forms_differ_only_in_ampersand() {
        for address in ["1200 N MAIN ST", "MAIN ST & 3RD ST", "A&B&C", "A & & B", "& MAIN ST"] {
            let split = split_address(address);
            assert_eq!(split.geocode.replace(" %26 ", " & "), split.stored);
            assert!(!split.geocode.contains('&'));
        }
    }

    #[test]
    fn test_address_of_only_ampersands_is_blank() {
        let record = normalize(&with("Full_Address", json!(" & & "))).unwrap();
        assert_eq!(record.full_address, "");
        assert_eq!(record.geocode_address, "");
    }

    #[test]
    fn test_normalize_intersection_address() {
        let record = normalize(&with("Full_Address", json!("MAIN ST & 3RD ST"))).unwrap();
        assert_eq!(record.full_address, "MAIN ST & 3RD ST");
        assert_eq!(record.geocode_address, "MAIN ST %26 3RD ST");
    }

    #[test]
    fn test_null_district_passes_through() {
        let record = normalize(&with("Reporting_District", serde_json::Value::Null)).unwrap();
        assert_eq!(record.reporting_district, None);

        let record = normalize(&without("Reporting_District")).unwrap();
        assert_eq!(record.reporting_district, None);
    }

    #[test]
    fn test_blank_street_number_is_null() {
        assert_eq!(normalize(&with("StreetNum", json!(""))).unwrap().street_num, None);
        assert_eq!(normalize(&with("StreetNum", json!("  "))).unwrap().street_num, None);
        assert_eq!(normalize(&without("StreetNum")).unwrap().street_num, None);
        assert_eq!(
            normalize(&with("StreetNum", serde_json::Value::Null)).unwrap().street_num,
            None
        );
    }

    #[test]
    fn test_invalid_street_number() {
        let err = normalize(&with("StreetNum", json!("12B"))).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRecord { field: "StreetNum", .. }));
    }

    #[test]
    fn test_missing_event_number() {
        let err = normalize(&without("Event_Number")).unwrap_err();
        match err {
            DispatchError::MalformedRecord { record, field, .. } => {
                assert_eq!(field, "Event_Number");
                assert_eq!(record, "_id=101");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_text_fields_are_kept() {
        let record = normalize(&with("StreetName", json!(""))).unwrap();
        assert_eq!(record.street_name, "");
        assert_eq!(record.event_number, "RF21001234");

        let record = normalize(&with("Incident_Type_Desc_Display", json!("  "))).unwrap();
        assert_eq!(record.incident_type, "");
        assert_eq!(normalize(&with("City", json!(""))).unwrap().city, "");
    }

    #[test]
    fn test_blank_event_number() {
        let err = normalize(&with("Event_Number", json!("  "))).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRecord { field: "Event_Number", .. }));
    }

    #[test]
    fn test_null_required_field() {
        let err = normalize(&with("City", serde_json::Value::Null)).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRecord { field: "City", .. }));
    }

    #[test]
    fn test_oversize_field() {
        let err = normalize(&with("City", json!("ROCKFORD HEIGHTS"))).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRecord { field: "City", .. }));

        let err = normalize(&with("Event_Number", json!("X".repeat(21)))).unwrap_err();
        assert!(matches!(err, DispatchError::MalformedRecord { field: "Event_Number", .. }));
    }

    #[test]
    fn test_alternate_date_time_formats() {
        let record = normalize(&RawRecord::from({
            let mut raw = sample();
            raw["Dispatch_Date_Time"] = json!("2021-03-04 17:45:12.000");
            raw["Dispatch_Date"] = json!("2021-03-04T00:00:00");
            raw["Dispatch_Time"] = json!("05:45:12 PM");
            raw
        }))
        .unwrap();

        assert_eq!(record.dispatch_date, NaiveDate::from_ymd_opt(2021, 3, 4).unwrap());
        assert_eq!(record.dispatch_time, NaiveTime::from_hms_opt(17, 45, 12).unwrap());
        assert_eq!(record.dispatch_date_time.date(), record.dispatch_date);
    }

    #[test]
    fn test_unparseable_timestamp() {
        let err = normalize(&with("Dispatch_Date_Time", json!("yesterday"))).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MalformedRecord { field: "Dispatch_Date_Time", .. }
        ));
    }

    #[test]
    fn test_with_coordinates() {
        let record = normalize(&RawRecord::from(sample())).unwrap();
        let row = record.clone().with_coordinates(Some(Coordinates {
            lat: 42.27,
            lon: -89.09,
        }));
        assert_eq!(row.lat, Some(42.27));
        assert_eq!(row.lon, Some(-89.09));
        assert_eq!(row.event_number, record.event_number);

        let row = record.with_coordinates(None);
        assert_eq!(row.coordinates(), None);
    }
}
