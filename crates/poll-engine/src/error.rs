use thiserror::Error;

/// Environmental (weather) fetch failed; the cycle cannot be merged.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("weather request failed: {0}")]
    Request(String),
    #[error("weather service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed weather body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for EnvironmentError {
    fn from(e: reqwest::Error) -> Self {
        EnvironmentError::Request(e.to_string())
    }
}

/// Writing one record to the time-series store failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Request(String),
    #[error("sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("record for {0} has no writable fields")]
    EmptyRecord(String),
    #[error("invalid sink configuration: {0}")]
    Config(String),
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Request(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("no devices configured")]
    NoDevices,
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}
