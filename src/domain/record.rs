use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable external identifier of one dispensing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one previously ingested data batch (one day's import).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub i32);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when a stored record field cannot be interpreted.
///
/// Imported rows keep their date/time columns as raw text, so parsing
/// can fail on individual records without poisoning the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("record {record}: unparseable date {value:?}")]
    BadDate { record: String, value: String },

    #[error("record {record}: unparseable time {value:?}")]
    BadTime { record: String, value: String },
}

/// One fuel-dispensing transaction as stored by the import pipeline.
///
/// Records are immutable once stored and belong to exactly one batch.
/// Optional fields reflect the source CSVs, which routinely omit
/// identity columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelRecord {
    pub record_id: RecordId,
    pub batch_id: BatchId,

    /// Raw date as imported, expected `YYYY-MM-DD`
    pub event_date: String,
    /// Raw time as imported, expected `HH:MM:SS`
    pub event_time: String,

    pub station_code: Option<String>,
    pub product: Option<String>,
    pub volume_liters: Option<Decimal>,
    pub consumer_type: Option<String>,
    pub plate_number: Option<String>,
    pub national_id: Option<String>,
    pub plate_color: Option<String>,
}

impl FuelRecord {
    /// Combine the raw date and time columns into an event timestamp.
    pub fn event_timestamp(&self) -> Result<NaiveDateTime, FieldError> {
        let date = NaiveDate::parse_from_str(self.event_date.trim(), "%Y-%m-%d").map_err(|_| {
            FieldError::BadDate {
                record: self.record_id.0.clone(),
                value: self.event_date.clone(),
            }
        })?;
        let time = NaiveTime::parse_from_str(self.event_time.trim(), "%H:%M:%S").map_err(|_| {
            FieldError::BadTime {
                record: self.record_id.0.clone(),
                value: self.event_time.clone(),
            }
        })?;
        Ok(date.and_time(time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, time: &str) -> FuelRecord {
        FuelRecord {
            record_id: RecordId::new("TX-1"),
            batch_id: BatchId(1),
            event_date: date.to_string(),
            event_time: time.to_string(),
            station_code: None,
            product: None,
            volume_liters: None,
            consumer_type: None,
            plate_number: None,
            national_id: None,
            plate_color: None,
        }
    }

    #[test]
    fn test_timestamp_parses() {
        let r = record("2024-03-05", "14:30:00");
        let ts = r.event_timestamp().unwrap();
        assert_eq!(ts.to_string(), "2024-03-05 14:30:00");
    }

    #[test]
    fn test_timestamp_trims_whitespace() {
        let r = record(" 2024-03-05 ", "14:30:00 ");
        assert!(r.event_timestamp().is_ok());
    }

    #[test]
    fn test_bad_date_is_typed() {
        let r = record("05/03/2024", "14:30:00");
        match r.event_timestamp() {
            Err(FieldError::BadDate { record, value }) => {
                assert_eq!(record, "TX-1");
                assert_eq!(value, "05/03/2024");
            }
            other => panic!("expected BadDate, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_time_is_typed() {
        let r = record("2024-03-05", "2pm");
        assert!(matches!(r.event_timestamp(), Err(FieldError::BadTime { .. })));
    }
}
