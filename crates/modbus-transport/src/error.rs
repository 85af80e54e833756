use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("no response after {0} attempts")]
    NoResponse(u32),
    #[error("connection closed by peer")]
    Closed,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("device exception 0x{code:02X} for function 0x{function:02X}")]
    Exception { function: u8, code: u8 },
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            std::io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        }
    }
}
