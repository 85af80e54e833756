use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Per-device sweep counters, labelled by device name.
#[derive(Clone)]
pub struct SweepMetrics {
    pub sweeps: IntCounterVec,
    pub aborted_sweeps: IntCounterVec,
    pub decode_faults: IntCounterVec,
    pub fields_decoded: IntCounterVec,
    pub maps_loaded: IntGauge,
}

fn device_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec, String> {
    let c = IntCounterVec::new(Opts::new(name, help), &["device"])
        .map_err(|e| format!("metrics init error: {e}"))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| format!("metrics register error: {e}"))?;
    Ok(c)
}

impl SweepMetrics {
    /// Create the sweep counters and register them with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, String> {
        let maps_loaded = IntGauge::new("gather_register_maps_loaded", "Register maps loaded")
            .map_err(|e| format!("metrics init error: {e}"))?;
        registry
            .register(Box::new(maps_loaded.clone()))
            .map_err(|e| format!("metrics register error: {e}"))?;
        Ok(Self {
            sweeps: device_counter(registry, "gather_sweeps_total", "Register sweeps started")?,
            aborted_sweeps: device_counter(
                registry,
                "gather_sweeps_aborted_total",
                "Sweeps cut short by a transport fault",
            )?,
            decode_faults: device_counter(
                registry,
                "gather_decode_faults_total",
                "Registers skipped because their payload could not be decoded",
            )?,
            fields_decoded: device_counter(
                registry,
                "gather_fields_decoded_total",
                "Register fields decoded successfully",
            )?,
            maps_loaded,
        })
    }
}
