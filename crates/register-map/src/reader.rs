use crate::decode::{decode_register, DecodeError, DecodedValue};
use crate::{RegisterMap, SweepMetrics};
use indexmap::IndexMap;
use modbus_transport::{RegisterBus, TransportError, UnitId};
use std::sync::Arc;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, error, warn};

/// Field under which every sweep records its capture time.
pub const TIMESTAMP_FIELD: &str = "Timestamp";

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Capture time as stored in the `Timestamp` field (whole seconds, in the offset `ts` carries).
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

#[derive(Debug)]
pub enum SweepOutcome {
    Complete,
    /// A transport fault at `address` ended the sweep early.
    Aborted {
        address: u16,
        error: TransportError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRegister {
    pub address: u16,
    pub display_name: String,
    pub error: DecodeError,
}

/// Result of one pass over a device's register map.
#[derive(Debug)]
pub struct SweepResult {
    pub device: String,
    pub captured_at: OffsetDateTime,
    /// Decoded fields in map order, plus [`TIMESTAMP_FIELD`].
    pub fields: IndexMap<String, DecodedValue>,
    pub outcome: SweepOutcome,
    pub skipped: Vec<SkippedRegister>,
}

impl SweepResult {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, SweepOutcome::Complete)
    }
}

/// Owns one device connection and the register map it is swept against.
pub struct DeviceReader {
    name: String,
    unit: UnitId,
    bus: Box<dyn RegisterBus>,
    map: Arc<RegisterMap>,
    metrics: Option<SweepMetrics>,
    stamp_offset: UtcOffset,
}

impl DeviceReader {
    pub fn new(
        name: impl Into<String>,
        bus: Box<dyn RegisterBus>,
        unit: UnitId,
        map: Arc<RegisterMap>,
    ) -> Self {
        Self {
            name: name.into(),
            unit,
            bus,
            map,
            metrics: None,
            stamp_offset: UtcOffset::UTC,
        }
    }

    /// Offset the `Timestamp` field is rendered in. Defaults to UTC.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.stamp_offset = offset;
        self
    }

    pub fn with_metrics(mut self, metrics: SweepMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// Read and decode every register in map order.
    ///
    /// A transport fault stops the sweep and keeps what was decoded so far; a decode
    /// fault drops only that register. Neither is returned as an error.
    pub async fn sweep(&mut self) -> SweepResult {
        let mut fields = IndexMap::with_capacity(self.map.len() + 1);
        let mut skipped = Vec::new();
        let mut outcome = SweepOutcome::Complete;
        if let Some(m) = &self.metrics {
            m.sweeps.with_label_values(&[self.name.as_str()]).inc();
        }

        for def in self.map.iter() {
            let words = match self
                .bus
                .read_input_registers(def.address, def.encoding.word_count(), self.unit)
                .await
            {
                Ok(words) => words,
                Err(e) => {
                    error!(
                        "{}: connection not possible via {} at register {} ({}): {}",
                        self.name,
                        self.bus.name(),
                        def.address,
                        def.display_name,
                        e
                    );
                    outcome = SweepOutcome::Aborted {
                        address: def.address,
                        error: e,
                    };
                    break;
                }
            };
            match decode_register(def, &words) {
                Ok(value) => {
                    debug!("{}: {} = {:?}", self.name, def.display_name, value);
                    fields.insert(def.display_name.clone(), value);
                }
                Err(e) => {
                    warn!(
                        "{}: unable to process register {} ({}): {}",
                        self.name, def.address, def.display_name, e
                    );
                    skipped.push(SkippedRegister {
                        address: def.address,
                        display_name: def.display_name.clone(),
                        error: e,
                    });
                }
            }
        }

        let captured_at = OffsetDateTime::now_utc();
        fields.insert(
            TIMESTAMP_FIELD.to_string(),
            DecodedValue::Text(format_timestamp(captured_at.to_offset(self.stamp_offset))),
        );

        if let Some(m) = &self.metrics {
            let label = [self.name.as_str()];
            if !matches!(outcome, SweepOutcome::Complete) {
                m.aborted_sweeps.with_label_values(&label).inc();
            }
            m.decode_faults
                .with_label_values(&label)
                .inc_by(skipped.len() as u64);
            m.fields_decoded
                .with_label_values(&label)
                .inc_by(fields.len().saturating_sub(1) as u64);
        }

        SweepResult {
            device: self.name.clone(),
            captured_at,
            fields,
            outcome,
            skipped,
        }
    }
}
