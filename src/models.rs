//! Data models for the water-meter import pipeline.
//!
//! [`RawReading`] is the untrusted shape uploaded by users: a loose JSON
//! object whose fields are read through coercing accessors. [`WaterPoint`]
//! is the validated unit written to InfluxDB.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Timelike, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

// ---

/// Measurement name shared by every point this service writes.
pub const MEASUREMENT: &str = "water_consumption";

/// Layout of the `TIME` field, e.g. `15.01.2024 08:30:00`.
pub const TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Why a single uploaded record was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    // ---
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing TIME field")]
    MissingTime,

    #[error("invalid TIME '{value}': {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

/// One uploaded record, borrowed from the decoded upload.
#[derive(Debug, Clone, Copy)]
pub struct RawReading<'a> {
    // ---
    fields: &'a Map<String, Value>,
}

/// The `{"data": [...]}` envelope of an upload.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    // ---
    pub data: Vec<Value>,
}

/// Identity dimensions of a point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaterTags {
    // ---
    pub meter_serial: String,
    pub grupmas_id: String,
}

/// Payload values of a point.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterFields {
    // ---
    pub index_cit: f64,
    pub consumption: f64,
    /// Written as the `type` field.
    pub kind: String,
}

/// Validated reading, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterPoint {
    // ---
    pub measurement: &'static str,
    pub tags: WaterTags,
    pub timestamp: DateTime<Utc>,
    pub fields: WaterFields,
}

impl IngestBatch {
    // ---
    /// Extract the records of an upload.
    ///
    /// Anything other than an object with a `data` array yields an empty batch.
    pub fn from_json(value: Value) -> Self {
        // ---
        match value {
            Value::Object(mut obj) => match obj.remove("data") {
                Some(Value::Array(data)) => Self { data },
                _ => Self::default(),
            },
            _ => Self::default(),
        }
    }
}

impl<'a> TryFrom<&'a Value> for RawReading<'a> {
    type Error = SkipReason;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(SkipReason::NotAnObject),
        }
    }
}

impl RawReading<'_> {
    // ---
    /// `TIME` parsed as a UTC instant.
    ///
    /// Readings carry no zone; they are stored as if they were UTC.
    pub fn time(&self) -> Result<DateTime<Utc>, SkipReason> {
        // ---
        let raw = match self.fields.get("TIME") {
            None => return Err(SkipReason::MissingTime),
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(SkipReason::InvalidTime {
                    value: other.to_string(),
                    reason: "expected a string".to_string(),
                })
            }
        };

        let invalid = |reason: &str| SkipReason::InvalidTime {
            value: raw.clone(),
            reason: reason.to_string(),
        };

        // chrono lets a format space match zero or more whitespace and skips
        // leading whitespace before numbers; the layout here is exact.
        if raw.trim() != raw || !raw.contains(char::is_whitespace) {
            return Err(invalid("does not match DD.MM.YYYY HH:MM:SS"));
        }

        let naive = NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
            .map_err(|e| invalid(&e.to_string()))?;

        // `:60` parses as a leap second and would share its instant with `:59`.
        if naive.nanosecond() >= 1_000_000_000 {
            return Err(invalid("second out of range"));
        }

        // InfluxDB only stores instants representable as i64 nanoseconds.
        let parsed = naive.and_utc();
        if parsed.timestamp_nanos_opt().is_none() {
            return Err(invalid("outside the storable time range"));
        }
        Ok(parsed)
    }

    pub fn meter_serial(&self) -> String {
        self.text("METERSERIAL")
    }

    pub fn grupmas_id(&self) -> String {
        self.text("GRUPMAS_ID")
    }

    pub fn real_medie(&self) -> String {
        self.text("REAL_MEDIE")
    }

    /// `INDEX_CIT` as a float, `0.0` when absent.
    pub fn index_cit(&self) -> Result<f64, SkipReason> {
        // ---
        match self.fields.get("INDEX_CIT") {
            None => Ok(0.0),
            Some(v) => coerce_f64("INDEX_CIT", v),
        }
    }

    /// `CONSUM` as a float.
    ///
    /// Absent or falsy values (`""`, `0`, `null`, `false`, empty containers)
    /// collapse to `0.0` without being coerced.
    pub fn consumption(&self) -> Result<f64, SkipReason> {
        // ---
        match self.fields.get("CONSUM") {
            Some(v) if !is_falsy(v) => coerce_f64("CONSUM", v),
            _ => Ok(0.0),
        }
    }

    fn text(&self, key: &str) -> String {
        self.fields.get(key).map(stringify).unwrap_or_default()
    }
}

impl WaterPoint {
    // ---
    /// Build a point from a raw reading, or report why it cannot be stored.
    pub fn from_raw(raw: &RawReading<'_>) -> Result<Self, SkipReason> {
        // ---
        let timestamp = raw.time()?;
        let index_cit = raw.index_cit()?;
        let consumption = raw.consumption()?;

        Ok(Self {
            measurement: MEASUREMENT,
            tags: WaterTags {
                meter_serial: raw.meter_serial(),
                grupmas_id: raw.grupmas_id(),
            },
            timestamp,
            fields: WaterFields {
                index_cit,
                consumption,
                kind: raw.real_medie(),
            },
        })
    }

    /// Canonical ISO-8601 rendering of the timestamp, e.g. `2024-01-15T08:30:00Z`.
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// Permissive string conversion used for tag and label fields.
fn stringify(value: &Value) -> String {
    // ---
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn is_falsy(value: &Value) -> bool {
    // ---
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn coerce_f64(field: &'static str, value: &Value) -> Result<f64, SkipReason> {
    // ---
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    // The store has no representation for NaN or infinities.
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| SkipReason::InvalidNumber {
            field,
            value: stringify(value),
        })
}
