//! Top-level gatherer configuration (JSON).

use anyhow::{bail, Context, Result};
use modbus_transport::{Endpoint, TransportConfig, UnitId};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::UtcOffset;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GathererConfig {
    pub arrays: Vec<ArrayConfig>,
    pub influx: InfluxConfig,
    pub location: LocationConfig,
    pub weather_api_key: String,
    /// Overrides the OpenWeatherMap endpoint, e.g. for a local proxy.
    #[serde(default)]
    pub weather_url: Option<String>,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayConfig {
    pub name: String,
    pub inverter: InverterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    pub ip_address: String,
    #[serde(default = "default_modbus_port")]
    pub ip_port: u16,
    pub slave: u8,
    pub config_model: String,
}

impl InverterConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.ip_address.clone(),
            port: self.ip_port,
        }
    }

    pub fn unit(&self) -> UnitId {
        UnitId(self.slave)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "yes")]
    pub verify_ssl: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub zip: String,
    pub country: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub address_one: String,
}

/// What to do when the environmental reading cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvFailurePolicy {
    /// Log, skip this cycle's sweeps, try again at the next tick.
    #[default]
    Abandon,
    /// Log and stop the poll loop with an error.
    Terminate,
}

impl FromStr for EnvFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abandon" => Ok(EnvFailurePolicy::Abandon),
            "terminate" => Ok(EnvFailurePolicy::Terminate),
            other => Err(format!("unknown policy: {other} (expected abandon|terminate)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub on_weather_failure: EnvFailurePolicy,
    /// Modbus request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra Modbus attempts on timeout or empty response.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Timeout for weather and InfluxDB HTTP calls.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Offset for the `Timestamp` field, as `+HH:MM` or `-HH:MM`. UTC when absent.
    #[serde(default)]
    pub timestamp_offset: Option<String>,
}

const OFFSET_FORMAT: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            on_weather_failure: EnvFailurePolicy::default(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            http_timeout_secs: default_http_timeout_secs(),
            timestamp_offset: None,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn stamp_offset(&self) -> Result<UtcOffset> {
        match self.timestamp_offset.as_deref() {
            None => Ok(UtcOffset::UTC),
            Some(raw) => UtcOffset::parse(raw.trim(), OFFSET_FORMAT)
                .with_context(|| format!("poll.timestamp_offset '{raw}' is not +HH:MM")),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            retries: self.retries,
        }
    }
}

fn default_modbus_port() -> u16 {
    502
}
fn default_interval_secs() -> u64 {
    15
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_retries() -> u32 {
    3
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn yes() -> bool {
    true
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

impl GathererConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw =
            fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: GathererConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        cfg.validate()
            .with_context(|| format!("validating config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.arrays.is_empty() {
            bail!("no arrays configured");
        }
        let mut names = HashSet::new();
        for a in &self.arrays {
            if a.name.trim().is_empty() {
                bail!("array with empty name");
            }
            if !names.insert(a.name.as_str()) {
                bail!("duplicate array name: {}", a.name);
            }
        }
        if self.poll.interval_secs == 0 {
            bail!("poll.interval_secs must be positive");
        }
        if self.poll.timeout_secs == 0 || self.poll.http_timeout_secs == 0 {
            bail!("timeouts must be positive");
        }
        self.poll.stamp_offset()?;
        Ok(())
    }

    pub fn array(&self, name: &str) -> Option<&ArrayConfig> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "arrays": [
            {"name": "Garage Roof", "inverter": {"ip_address": "192.168.1.50", "ip_port": 502, "slave": 3, "config_model": "sb5000"}},
            {"name": "Barn", "inverter": {"ip_address": "192.168.1.51", "slave": 3, "config_model": "stp"}}
        ],
        "influx": {"host": "influx.local", "port": 8086, "user": "solar", "password": "pw",
                   "database": "solar", "ssl": false, "verify_ssl": false},
        "location": {"zip": 97201, "country": "us", "type": "residential", "address_one": "1 Main St"},
        "weather_api_key": "abc123"
    }"#;

    #[test]
    fn test_parse_sample_with_defaults() {
        let cfg: GathererConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.arrays.len(), 2);
        assert_eq!(cfg.arrays[1].inverter.ip_port, 502);
        assert_eq!(cfg.arrays[0].inverter.unit(), UnitId(3));
        assert_eq!(cfg.location.zip, "97201");
        assert_eq!(cfg.location.kind, "residential");
        assert_eq!(cfg.poll.interval(), Duration::from_secs(15));
        assert_eq!(cfg.poll.on_weather_failure, EnvFailurePolicy::Abandon);
        assert_eq!(cfg.poll.transport(), TransportConfig::default());
        assert!(!cfg.influx.verify_ssl);
        assert!(cfg.array("Barn").is_some());
    }

    #[test]
    fn test_poll_overrides() {
        let mut v: serde_json::Value = serde_json::from_str(SAMPLE).unwrap();
        v["poll"] = serde_json::json!({"interval_secs": 60, "on_weather_failure": "terminate", "retries": 0});
        let cfg: GathererConfig = serde_json::from_value(v).unwrap();
        assert_eq!(cfg.poll.interval_secs, 60);
        assert_eq!(cfg.poll.on_weather_failure, EnvFailurePolicy::Terminate);
        assert_eq!(cfg.poll.retries, 0);
        assert_eq!(cfg.poll.timeout_secs, 30);
        assert_eq!(cfg.poll.stamp_offset().unwrap(), UtcOffset::UTC);
    }

    #[test]
    fn test_timestamp_offset() {
        let mut cfg: GathererConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.poll.timestamp_offset = Some("-07:00".to_string());
        cfg.validate().unwrap();
        assert_eq!(
            cfg.poll.stamp_offset().unwrap(),
            UtcOffset::from_hms(-7, 0, 0).unwrap()
        );
        cfg.poll.timestamp_offset = Some("+05:30".to_string());
        assert_eq!(
            cfg.poll.stamp_offset().unwrap(),
            UtcOffset::from_hms(5, 30, 0).unwrap()
        );
        cfg.poll.timestamp_offset = Some("PST".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicates() {
        let mut cfg: GathererConfig = serde_json::from_str(SAMPLE).unwrap();
        cfg.arrays[1].name = "Garage Roof".to_string();
        assert!(cfg.validate().is_err());
        cfg.arrays.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arrays.json");
        fs::write(&path, SAMPLE).unwrap();
        let cfg = GathererConfig::load(&path).unwrap();
        assert_eq!(cfg.weather_api_key, "abc123");
        assert!(GathererConfig::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Terminate".parse::<EnvFailurePolicy>().unwrap(), EnvFailurePolicy::Terminate);
        assert!("exit".parse::<EnvFailurePolicy>().is_err());
    }
}
