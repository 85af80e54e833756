use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use register_map::SweepMetrics;

/// Poll-cycle counters.
#[derive(Clone)]
pub struct PollMetrics {
    pub cycles: IntCounter,
    pub abandoned_cycles: IntCounter,
    pub environment_failures: IntCounter,
    pub sink_writes: IntCounter,
    pub sink_failures: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, String> {
    let c = IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| format!("metrics register error: {e}"))?;
    Ok(c)
}

impl PollMetrics {
    pub fn register(registry: &Registry) -> Result<Self, String> {
        Ok(Self {
            cycles: counter(registry, "gather_poll_cycles_total", "Poll cycles started")?,
            abandoned_cycles: counter(
                registry,
                "gather_poll_cycles_abandoned_total",
                "Poll cycles abandoned before any sweep",
            )?,
            environment_failures: counter(
                registry,
                "gather_environment_failures_total",
                "Failed environmental reading fetches",
            )?,
            sink_writes: counter(
                registry,
                "gather_sink_writes_total",
                "Records written to the sink",
            )?,
            sink_failures: counter(registry, "gather_sink_failures_total", "Failed sink writes")?,
        })
    }
}

/// Every gatherer metric behind one registry.
#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub sweep: SweepMetrics,
    pub poll: PollMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let sweep = SweepMetrics::register(&registry)?;
        let poll = PollMetrics::register(&registry)?;
        Ok(Self {
            registry,
            sweep,
            poll,
        })
    }

    /// Prometheus text exposition of the current values.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
