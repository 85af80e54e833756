use crate::{EnvironmentReading, LocationConfig};
use indexmap::IndexMap;
use register_map::{DecodedValue, SweepResult};
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub const CLOUDINESS_FIELD: &str = "Cloudiness (%)";
pub const TEMPERATURE_FIELD: &str = "Temperature (F)";
pub const LOCATION_TYPE_FIELD: &str = "Location type";

/// One device's sweep joined with the cycle's weather, ready for the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: IndexMap<String, DecodedValue>,
    #[serde(skip)]
    pub time: OffsetDateTime,
}

/// Build the record for `sweep`: its fields, then weather and location type.
pub fn merge(
    sweep: SweepResult,
    env: &EnvironmentReading,
    location: &LocationConfig,
) -> MergedRecord {
    let mut fields = sweep.fields;
    fields.insert(
        CLOUDINESS_FIELD.to_string(),
        DecodedValue::Signed(env.cloudiness),
    );
    fields.insert(
        TEMPERATURE_FIELD.to_string(),
        DecodedValue::Float(env.temperature),
    );
    fields.insert(
        LOCATION_TYPE_FIELD.to_string(),
        DecodedValue::Text(location.kind.clone()),
    );
    let mut tags = BTreeMap::new();
    tags.insert("location".to_string(), location.address_one.clone());
    MergedRecord {
        measurement: sweep.device,
        tags,
        fields,
        time: sweep.captured_at,
    }
}
