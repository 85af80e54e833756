use crate::{InfluxConfig, MergedRecord, SinkError};
use async_trait::async_trait;
use register_map::DecodedValue;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info};

/// Destination for merged records. Called sequentially from the poll task.
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    async fn write(&self, record: &MergedRecord) -> Result<(), SinkError>;
}

const MEASUREMENT_SPECIALS: &[char] = &[',', ' '];
const KEY_SPECIALS: &[char] = &[',', '=', ' '];

fn escape(s: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn field_value(v: &DecodedValue) -> Option<String> {
    match v {
        DecodedValue::NoData => None,
        DecodedValue::Signed(i) => Some(format!("{i}i")),
        DecodedValue::Unsigned(u) => Some(match i64::try_from(*u) {
            Ok(i) => format!("{i}i"),
            Err(_) => format!("{u}u"),
        }),
        DecodedValue::Float(f) if f.is_finite() => Some(format!("{f}")),
        DecodedValue::Float(_) => None,
        DecodedValue::Text(s) => Some(format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"")
        )),
    }
}

/// Encode a record as one InfluxDB line (nanosecond timestamp).
///
/// Line protocol has no null, so `NoData` fields are left off the line.
pub fn to_line_protocol(record: &MergedRecord) -> Result<String, SinkError> {
    let mut line = escape(&record.measurement, MEASUREMENT_SPECIALS);
    for (k, v) in &record.tags {
        if v.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape(k, KEY_SPECIALS));
        line.push('=');
        line.push_str(&escape(v, KEY_SPECIALS));
    }
    let fields: Vec<String> = record
        .fields
        .iter()
        .filter_map(|(k, v)| field_value(v).map(|val| format!("{}={}", escape(k, KEY_SPECIALS), val)))
        .collect();
    if fields.is_empty() {
        return Err(SinkError::EmptyRecord(record.measurement.clone()));
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&record.time.unix_timestamp_nanos().to_string());
    Ok(line)
}

/// InfluxDB 1.x HTTP write endpoint.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: Url,
    user: String,
    password: String,
}

impl InfluxSink {
    pub fn new(cfg: &InfluxConfig, timeout: Duration) -> Result<Self, SinkError> {
        let scheme = if cfg.ssl { "https" } else { "http" };
        let write_url = Url::parse_with_params(
            &format!("{scheme}://{}:{}/write", cfg.host, cfg.port),
            &[("db", cfg.database.as_str()), ("precision", "ns")],
        )
        .map_err(|e| SinkError::Config(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!cfg.verify_ssl)
            .build()?;
        Ok(Self {
            client,
            write_url,
            user: cfg.user.clone(),
            password: cfg.password.clone(),
        })
    }
}

#[async_trait]
impl MeasurementSink for InfluxSink {
    async fn write(&self, record: &MergedRecord) -> Result<(), SinkError> {
        let line = to_line_protocol(record)?;
        let mut req = self.client.post(self.write_url.clone()).body(line);
        if !self.user.is_empty() {
            req = req.basic_auth(&self.user, Some(&self.password));
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("sent {} to influxdb", record.measurement);
        Ok(())
    }
}

/// Logs each record as JSON instead of storing it.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl MeasurementSink for LogSink {
    async fn write(&self, record: &MergedRecord) -> Result<(), SinkError> {
        let json =
            serde_json::to_string(record).map_err(|e| SinkError::Rejected(e.to_string()))?;
        info!("{}", json);
        Ok(())
    }
}
