//! poll-engine: the scheduling side of the gatherer
//!
//! [`PollLoop`] fetches one environmental reading per cycle, sweeps every configured
//! device through its [`register_map::DeviceReader`], merges the two into a
//! [`MergedRecord`] and hands it to a [`MeasurementSink`]. Faults on one device never
//! stop the others; a failed environmental fetch abandons the cycle or terminates the
//! loop, depending on [`EnvFailurePolicy`].

mod error;
pub use error::{EnvironmentError, PollError, SinkError};

pub mod config;
pub use config::{
    ArrayConfig, EnvFailurePolicy, GathererConfig, InfluxConfig, InverterConfig, LocationConfig,
    PollConfig,
};

mod environment;
pub use environment::{EnvironmentReading, EnvironmentSource, OpenWeatherSource};

mod record;
pub use record::{merge, MergedRecord, CLOUDINESS_FIELD, LOCATION_TYPE_FIELD, TEMPERATURE_FIELD};

mod sink;
pub use sink::{to_line_protocol, InfluxSink, LogSink, MeasurementSink};

mod metrics;
pub use metrics::{MetricsHub, PollMetrics};

mod poller;
pub use poller::{CycleReport, DeviceReport, PollLoop, PollState};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(test)]
mod testing;
