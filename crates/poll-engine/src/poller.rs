use crate::{
    merge, EnvFailurePolicy, EnvironmentError, EnvironmentSource, LocationConfig,
    MeasurementSink, PollError, PollMetrics, SinkError,
};
use register_map::DeviceReader;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// A cycle is in progress.
    Polling,
}

#[derive(Debug)]
pub struct DeviceReport {
    pub device: String,
    /// Fields in the merged record, including weather and timestamp.
    pub fields: usize,
    pub sweep_complete: bool,
    pub skipped_registers: usize,
    pub write: Result<(), SinkError>,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub devices: Vec<DeviceReport>,
}

impl CycleReport {
    pub fn written(&self) -> usize {
        self.devices.iter().filter(|d| d.write.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.devices.len() - self.written()
    }
}

/// Single-task scheduler: one environmental fetch, then every device in order.
pub struct PollLoop<E, S> {
    devices: Vec<DeviceReader>,
    environment: E,
    sink: S,
    location: LocationConfig,
    interval: Duration,
    policy: EnvFailurePolicy,
    state: PollState,
    metrics: Option<PollMetrics>,
}

impl<E: EnvironmentSource, S: MeasurementSink> PollLoop<E, S> {
    pub fn new(
        devices: Vec<DeviceReader>,
        environment: E,
        sink: S,
        location: LocationConfig,
    ) -> Self {
        Self {
            devices,
            environment,
            sink,
            location,
            interval: Duration::from_secs(15),
            policy: EnvFailurePolicy::default(),
            state: PollState::Idle,
            metrics: None,
        }
    }

    /// Delay between the end of one cycle and the start of the next.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: EnvFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: PollMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn devices(&self) -> &[DeviceReader] {
        &self.devices
    }

    /// Run one cycle. Only a failed environmental fetch is returned as an error;
    /// sweep and sink faults are reported per device.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, EnvironmentError> {
        self.state = PollState::Polling;
        let result = self.poll_devices().await;
        self.state = PollState::Idle;
        result
    }

    async fn poll_devices(&mut self) -> Result<CycleReport, EnvironmentError> {
        if let Some(m) = &self.metrics {
            m.cycles.inc();
        }
        let env = match self.environment.fetch().await {
            Ok(env) => env,
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.environment_failures.inc();
                }
                return Err(e);
            }
        };

        let mut report = CycleReport::default();
        for reader in self.devices.iter_mut() {
            let sweep = reader.sweep().await;
            let sweep_complete = sweep.is_complete();
            let skipped_registers = sweep.skipped.len();
            let record = merge(sweep, &env, &self.location);
            debug!("{}: {:?}", record.measurement, record.fields);

            let write = self.sink.write(&record).await;
            match &write {
                Ok(()) => {
                    info!(
                        "{}: wrote {} fields",
                        record.measurement,
                        record.fields.len()
                    );
                    if let Some(m) = &self.metrics {
                        m.sink_writes.inc();
                    }
                }
                Err(e) => {
                    error!("{}: could not write to sink: {}", record.measurement, e);
                    if let Some(m) = &self.metrics {
                        m.sink_failures.inc();
                    }
                }
            }
            report.devices.push(DeviceReport {
                device: record.measurement,
                fields: record.fields.len(),
                sweep_complete,
                skipped_registers,
                write,
            });
        }
        Ok(report)
    }

    /// Cycle until `shutdown` resolves. Shutdown is only observed between cycles.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), PollError>
    where
        F: Future<Output = ()>,
    {
        if self.devices.is_empty() {
            return Err(PollError::NoDevices);
        }
        tokio::pin!(shutdown);
        loop {
            match self.run_cycle().await {
                Ok(report) => info!(
                    "cycle complete: {} written, {} failed",
                    report.written(),
                    report.failed()
                ),
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.abandoned_cycles.inc();
                    }
                    match self.policy {
                        EnvFailurePolicy::Abandon => {
                            warn!("environmental reading unavailable, skipping cycle: {}", e)
                        }
                        EnvFailurePolicy::Terminate => {
                            error!("environmental reading unavailable, stopping: {}", e);
                            return Err(e.into());
                        }
                    }
                }
            }
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, poll loop stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Cycle forever (until the terminate policy fires).
    pub async fn run(&mut self) -> Result<(), PollError> {
        self.run_until(std::future::pending()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemorySink, StaticEnvironment};
    use crate::{MetricsHub, CLOUDINESS_FIELD, LOCATION_TYPE_FIELD, TEMPERATURE_FIELD};
    use modbus_transport::{MockBus, ReadLog, UnitId};
    use register_map::{
        DecodedValue, Encoding, RegisterDefinition, RegisterMap, ScalingFormat,
    };
    use std::sync::Arc;

    fn location() -> LocationConfig {
        LocationConfig {
            zip: "97201".to_string(),
            country: "us".to_string(),
            kind: "residential".to_string(),
            address_one: "1 Main St".to_string(),
        }
    }

    fn map() -> Arc<RegisterMap> {
        Arc::new(RegisterMap::new(vec![
            RegisterDefinition {
                address: 30775,
                display_name: "AC Power (W)".to_string(),
                encoding: Encoding::S32,
                format: ScalingFormat::None,
            },
            RegisterDefinition {
                address: 30803,
                display_name: "Grid Freq (Hz)".to_string(),
                encoding: Encoding::U32,
                format: ScalingFormat::Fix2,
            },
        ]))
    }

    fn healthy(name: &str) -> (DeviceReader, ReadLog) {
        let bus = MockBus::new(name)
            .with_words(30775, &[0x0000, 0x0906])
            .with_words(30803, &[0x0000, 0x1388]);
        let log = bus.read_log();
        (DeviceReader::new(name, Box::new(bus), UnitId(3), map()), log)
    }

    fn offline(name: &str) -> (DeviceReader, ReadLog) {
        let bus = MockBus::new(name).offline();
        let log = bus.read_log();
        (DeviceReader::new(name, Box::new(bus), UnitId(3), map()), log)
    }

    #[tokio::test]
    async fn test_cycle_merges_weather_and_tags() {
        let (reader, _) = healthy("Garage Roof");
        let sink = MemorySink::new();
        let mut poller = PollLoop::new(
            vec![reader],
            StaticEnvironment::new(71.6, 20),
            sink.clone(),
            location(),
        );
        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.written(), 1);
        assert_eq!(poller.state(), PollState::Idle);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.measurement, "Garage Roof");
        assert_eq!(rec.tags["location"], "1 Main St");
        assert_eq!(rec.fields["AC Power (W)"], DecodedValue::Signed(2310));
        assert_eq!(rec.fields["Grid Freq (Hz)"], DecodedValue::Float(50.0));
        assert_eq!(rec.fields[CLOUDINESS_FIELD], DecodedValue::Signed(20));
        assert_eq!(rec.fields[TEMPERATURE_FIELD], DecodedValue::Float(71.6));
        assert_eq!(
            rec.fields[LOCATION_TYPE_FIELD],
            DecodedValue::Text("residential".to_string())
        );
        assert!(rec.fields.contains_key("Timestamp"));
    }

    #[tokio::test]
    async fn test_failing_device_does_not_block_the_next() {
        let (a, _) = offline("A");
        let (b, b_log) = healthy("B");
        let sink = MemorySink::new().rejecting("A");
        let mut poller = PollLoop::new(
            vec![a, b],
            StaticEnvironment::new(60.0, 90),
            sink.clone(),
            location(),
        );
        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.devices.len(), 2);
        assert_eq!(report.devices[0].device, "A");
        assert!(!report.devices[0].sweep_complete);
        assert!(report.devices[0].write.is_err());
        assert!(report.devices[1].sweep_complete);
        assert!(report.devices[1].write.is_ok());
        assert_eq!(b_log.requests().len(), 2);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].measurement, "B");
    }

    #[tokio::test]
    async fn test_partial_sweep_is_still_written() {
        let (a, _) = offline("A");
        let sink = MemorySink::new();
        let mut poller = PollLoop::new(
            vec![a],
            StaticEnvironment::new(60.0, 90),
            sink.clone(),
            location(),
        );
        poller.run_cycle().await.unwrap();
        let rec = &sink.records()[0];
        let keys: Vec<&str> = rec.fields.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["Timestamp", CLOUDINESS_FIELD, TEMPERATURE_FIELD, LOCATION_TYPE_FIELD]
        );
    }

    #[tokio::test]
    async fn test_environment_failure_abandons_cycle() {
        let (reader, log) = healthy("A");
        let sink = MemorySink::new();
        let mut poller = PollLoop::new(
            vec![reader],
            StaticEnvironment::failing(),
            sink.clone(),
            location(),
        );
        assert!(matches!(
            poller.run_cycle().await,
            Err(EnvironmentError::Status { status: 401, .. })
        ));
        assert_eq!(poller.state(), PollState::Idle);
        assert!(log.requests().is_empty());
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_policy_stops_loop() {
        let (reader, _) = healthy("A");
        let mut poller = PollLoop::new(
            vec![reader],
            StaticEnvironment::failing(),
            MemorySink::new(),
            location(),
        )
        .with_policy(EnvFailurePolicy::Terminate)
        .with_interval(Duration::from_millis(1));
        assert!(matches!(
            poller.run().await,
            Err(PollError::Environment(_))
        ));
    }

    #[tokio::test]
    async fn test_abandon_policy_keeps_cycling_until_shutdown() {
        let (reader, log) = healthy("A");
        let env = StaticEnvironment::failing();
        let mut poller = PollLoop::new(vec![reader], env.clone(), MemorySink::new(), location())
            .with_interval(Duration::from_millis(5));
        poller
            .run_until(tokio::time::sleep(Duration::from_millis(60)))
            .await
            .unwrap();
        assert!(env.fetch_count() >= 2);
        assert!(log.requests().is_empty());
    }

    #[tokio::test]
    async fn test_no_devices_is_an_error() {
        let mut poller = PollLoop::new(
            Vec::new(),
            StaticEnvironment::new(1.0, 1),
            MemorySink::new(),
            location(),
        );
        assert!(matches!(poller.run().await, Err(PollError::NoDevices)));
    }

    #[tokio::test]
    async fn test_metrics_track_cycles_and_sink_outcomes() {
        let hub = MetricsHub::new().unwrap();
        let (a, _) = healthy("A");
        let (b, _) = healthy("B");
        let mut poller = PollLoop::new(
            vec![a, b],
            StaticEnvironment::new(50.0, 0),
            MemorySink::new().rejecting("B"),
            location(),
        )
        .with_metrics(hub.poll.clone());
        poller.run_cycle().await.unwrap();
        assert_eq!(hub.poll.cycles.get(), 1);
        assert_eq!(hub.poll.sink_writes.get(), 1);
        assert_eq!(hub.poll.sink_failures.get(), 1);
    }
}
