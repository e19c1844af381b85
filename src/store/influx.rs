//! InfluxDB 1.x session over the HTTP API.
//!
//! Points are sent as line protocol in a single `POST /write` per batch.
//! InfluxDB keys a point by measurement, tag set and timestamp, so
//! re-sending a reading with the same identity replaces its fields.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};

use super::{StoreConnector, StoreError, StoreSession};
use crate::{models::WaterPoint, Config};

// ---

/// Escape measurement names, tag keys, tag values and field keys.
///
/// Line protocol requires commas, spaces and equals signs to be escaped
/// with a backslash. Backslashes are doubled so a trailing one cannot
/// escape the separator after it. Newlines would terminate the line.
fn escape_ident(s: &str, out: &mut String) {
    // ---
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
}

/// Quote and escape a string field value.
fn push_string_value(out: &mut String, value: &str) {
    // ---
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
}

/// Tags with empty values are left out; InfluxDB rejects them.
fn push_tag(out: &mut String, key: &str, value: &str) {
    // ---
    if value.is_empty() {
        return;
    }
    out.push(',');
    escape_ident(key, out);
    out.push('=');
    escape_ident(value, out);
}

fn push_field_key(out: &mut String, first: &mut bool, key: &str) {
    // ---
    if *first {
        *first = false;
    } else {
        out.push(',');
    }
    escape_ident(key, out);
    out.push('=');
}

/// Append one point as a line protocol line (without trailing newline).
///
/// Tags and fields are emitted in key order so the series key of a point
/// is stable across uploads. The timestamp is in seconds.
pub(crate) fn write_line(point: &WaterPoint, out: &mut String) {
    // ---
    escape_ident(point.measurement, out);

    push_tag(out, "grupmas_id", &point.tags.grupmas_id);
    push_tag(out, "meter_serial", &point.tags.meter_serial);

    out.push(' ');
    let mut first = true;
    push_field_key(out, &mut first, "consumption");
    out.push_str(&point.fields.consumption.to_string());
    push_field_key(out, &mut first, "index_cit");
    out.push_str(&point.fields.index_cit.to_string());
    push_field_key(out, &mut first, "type");
    push_string_value(out, &point.fields.kind);

    out.push(' ');
    out.push_str(&point.timestamp.timestamp().to_string());
}

/// Encode a batch, one line per point.
pub(crate) fn encode_batch(points: &[WaterPoint]) -> String {
    // ---
    // Heuristic capacity: ~128 bytes per line.
    let mut s = String::with_capacity(points.len().saturating_mul(128));
    for point in points {
        write_line(point, &mut s);
        s.push('\n');
    }
    s
}

/// Connection-level failures mean the store could not be reached at all.
fn transport(e: reqwest::Error) -> StoreError {
    // ---
    if e.is_connect() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Http(e)
    }
}

struct Settings {
    base_url: String,
    database: String,
    username: String,
    password: String,
    timeout: Duration,
}

/// Hands out one HTTP session per store operation.
#[derive(Clone)]
pub struct InfluxConnector {
    settings: Arc<Settings>,
}

impl InfluxConnector {
    pub fn new(config: &Config) -> Self {
        // ---
        Self {
            settings: Arc::new(Settings {
                base_url: config.influx_base_url(),
                database: config.influx_db.clone(),
                username: config.influx_user.clone(),
                password: config.influx_password.clone(),
                timeout: config.influx_timeout,
            }),
        }
    }
}

struct InfluxSession {
    settings: Arc<Settings>,
    client: Option<Client>,
}

impl InfluxSession {
    fn client(&self) -> Result<&Client, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Client("session already closed".to_string()))
    }
}

#[async_trait]
impl StoreConnector for InfluxConnector {
    async fn open(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        // ---
        let client = Client::builder()
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| StoreError::Client(e.to_string()))?;

        Ok(Box::new(InfluxSession {
            settings: Arc::clone(&self.settings),
            client: Some(client),
        }))
    }
}

#[async_trait]
impl StoreSession for InfluxSession {
    async fn write_points(&mut self, points: &[WaterPoint]) -> Result<bool, StoreError> {
        // ---
        let s = &self.settings;
        let body = encode_batch(points);
        tracing::debug!(
            points = points.len(),
            bytes = body.len(),
            "Sending line protocol batch"
        );

        let response = self
            .client()?
            .post(format!("{}/write", s.base_url))
            .query(&[("db", s.database.as_str()), ("precision", "s")])
            .basic_auth(&s.username, Some(&s.password))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(true);
        }
        if status.is_success() {
            tracing::warn!(%status, "InfluxDB answered write without acknowledging it");
            return Ok(false);
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        // ---
        let s = &self.settings;
        let response = self
            .client()?
            .get(format!("{}/ping", s.base_url))
            .basic_auth(&s.username, Some(&s.password))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StoreError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    async fn close(&mut self) {
        // Dropping the client releases its pooled connections.
        self.client = None;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{IngestBatch, RawReading};
    use crate::transform::transform;
    use serde_json::json;

    fn point(value: serde_json::Value) -> WaterPoint {
        let raw = RawReading::try_from(&value).unwrap();
        WaterPoint::from_raw(&raw).unwrap()
    }

    #[test]
    fn test_escape_ident_escapes_commas_spaces_and_equals() {
        // ---
        let mut out = String::new();
        escape_ident("a b,c=d", &mut out);
        assert_eq!(out, "a\\ b\\,c\\=d");
    }

    #[test]
    fn test_escape_ident_doubles_backslashes() {
        // ---
        let mut out = String::new();
        escape_ident("a\\b\\", &mut out);
        assert_eq!(out, "a\\\\b\\\\");
    }

    #[test]
    fn test_trailing_backslash_keeps_tag_and_field_sets_apart() {
        // ---
        let p = point(json!({
            "TIME": "01.01.2024 00:00:00",
            "METERSERIAL": "SN\\",
            "GRUPMAS_ID": "G"
        }));

        let mut line = String::new();
        write_line(&p, &mut line);

        assert_eq!(
            line,
            "water_consumption,grupmas_id=G,meter_serial=SN\\\\ \
             consumption=0,index_cit=0,type=\"\" 1704067200"
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        // ---
        // Port 9 on loopback has no listener in test environments.
        let cfg = Config {
            influx_host: "127.0.0.1".to_string(),
            influx_port: 9,
            ..Config::default()
        };
        let mut session = InfluxConnector::new(&cfg).open().await.unwrap();

        let err = session.ping().await.unwrap_err();
        session.close().await;
        assert!(matches!(err, StoreError::Unavailable(_)), "got {:?}", err);
    }

    #[test]
    fn test_line_has_sorted_tags_fields_and_seconds() {
        // ---
        let p = point(json!({
            "TIME": "15.01.2024 08:30:00",
            "METERSERIAL": "SN 42",
            "GRUPMAS_ID": 7,
            "INDEX_CIT": "1234.5",
            "CONSUM": "12.5",
            "REAL_MEDIE": "cold \"water\""
        }));

        let mut line = String::new();
        write_line(&p, &mut line);

        assert_eq!(
            line,
            "water_consumption,grupmas_id=7,meter_serial=SN\\ 42 \
             consumption=12.5,index_cit=1234.5,type=\"cold \\\"water\\\"\" 1705307400"
        );
    }

    #[test]
    fn test_empty_tags_are_omitted() {
        // ---
        let p = point(json!({"TIME": "01.01.2024 00:00:00"}));

        let mut line = String::new();
        write_line(&p, &mut line);

        assert!(line.starts_with("water_consumption consumption=0,index_cit=0,type=\"\" "));
    }

    #[test]
    fn test_null_serial_shares_series_with_absent_serial() {
        // ---
        let series = |value| {
            let mut line = String::new();
            write_line(&point(value), &mut line);
            line.split(' ').next().unwrap().to_string()
        };

        let null = series(json!({"TIME": "01.01.2024 00:00:00", "METERSERIAL": null, "GRUPMAS_ID": true}));
        let absent = series(json!({"TIME": "01.01.2024 00:00:00", "GRUPMAS_ID": true}));

        assert_eq!(null, "water_consumption,grupmas_id=true");
        assert_eq!(null, absent);
    }

    #[test]
    fn test_same_identity_encodes_same_series_and_time() {
        // ---
        let out = transform(&IngestBatch::from_json(json!({"data": [
            {"TIME": "05.05.2024 10:00:00", "METERSERIAL": "M", "GRUPMAS_ID": "G", "INDEX_CIT": 10},
            {"TIME": "05.05.2024 10:00:00", "METERSERIAL": "M", "GRUPMAS_ID": "G", "INDEX_CIT": 11}
        ]})));

        let batch = encode_batch(&out.points);
        let lines: Vec<&str> = batch.lines().collect();
        assert_eq!(lines.len(), 2);

        let series = |l: &str| l.split(' ').next().unwrap().to_string();
        let time = |l: &str| l.rsplit(' ').next().unwrap().to_string();
        assert_eq!(series(lines[0]), series(lines[1]));
        assert_eq!(time(lines[0]), time(lines[1]));
        assert_ne!(lines[0], lines[1]);
    }

    #[tokio::test]
    async fn test_closed_session_refuses_requests() {
        // ---
        let connector = InfluxConnector::new(&Config::default());
        let mut session = connector.open().await.unwrap();
        session.close().await;

        let err = session.ping().await.unwrap_err();
        assert!(matches!(err, StoreError::Client(_)));
    }
}
