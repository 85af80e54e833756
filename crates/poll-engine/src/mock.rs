use crate::{
    EnvironmentError, EnvironmentReading, EnvironmentSource, MeasurementSink, MergedRecord,
    SinkError,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory sink. Clones share the same record list.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MergedRecord>>>,
    reject: HashSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every record for `measurement`.
    pub fn rejecting(mut self, measurement: &str) -> Self {
        self.reject.insert(measurement.to_string());
        self
    }

    pub fn records(&self) -> Vec<MergedRecord> {
        match self.records.lock() {
            Ok(r) => r.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl MeasurementSink for MemorySink {
    async fn write(&self, record: &MergedRecord) -> Result<(), SinkError> {
        if self.reject.contains(&record.measurement) {
            return Err(SinkError::Rejected(format!(
                "mock sink refuses {}",
                record.measurement
            )));
        }
        if let Ok(mut r) = self.records.lock() {
            r.push(record.clone());
        }
        Ok(())
    }
}

/// Environment source returning a fixed reading, or always failing.
#[derive(Clone)]
pub struct StaticEnvironment {
    reading: Option<EnvironmentReading>,
    fetches: Arc<AtomicUsize>,
}

impl StaticEnvironment {
    pub fn new(temperature: f64, cloudiness: i64) -> Self {
        Self {
            reading: Some(EnvironmentReading {
                temperature,
                cloudiness,
            }),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every fetch fails as if the service answered 401.
    pub fn failing() -> Self {
        Self {
            reading: None,
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentSource for StaticEnvironment {
    async fn fetch(&self) -> Result<EnvironmentReading, EnvironmentError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.reading.clone().ok_or(EnvironmentError::Status {
            status: 401,
            body: "mock environment unavailable".to_string(),
        })
    }
}
