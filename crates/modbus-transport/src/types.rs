use core::fmt;
use std::time::Duration;

/// Largest register count a single read-input-registers request may carry.
pub const MAX_READ_WORDS: u16 = 125;

/// Modbus unit (slave) identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct UnitId(pub u8);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}", self.0)
    }
}

/// One read-input-registers request, validated against protocol limits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadRequest {
    pub address: u16,
    pub count: u16,
    pub unit: UnitId,
}

impl ReadRequest {
    pub fn new(address: u16, count: u16, unit: UnitId) -> Option<Self> {
        if count == 0 || count > MAX_READ_WORDS {
            return None;
        }
        // The span must stay inside the 16-bit register space.
        if u32::from(address) + u32::from(count) > 0x1_0000 {
            return None;
        }
        Some(Self {
            address,
            count,
            unit,
        })
    }
}

impl fmt::Display for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{unit} register {address} x{count}",
            unit = self.unit,
            address = self.address,
            count = self.count
        )
    }
}

/// Network location of a Modbus TCP device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-connection timeout and retry budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransportConfig {
    pub timeout: Duration,
    /// Extra attempts after a request times out or comes back empty.
    pub retries: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_limits() {
        assert!(ReadRequest::new(30513, 4, UnitId(3)).is_some());
        assert!(ReadRequest::new(0, 0, UnitId(3)).is_none());
        assert!(ReadRequest::new(0, MAX_READ_WORDS + 1, UnitId(3)).is_none());
        assert!(ReadRequest::new(0xFFFF, 1, UnitId(3)).is_some());
        assert!(ReadRequest::new(0xFFFF, 2, UnitId(3)).is_none());
    }

    #[test]
    fn test_display() {
        let req = ReadRequest::new(30775, 2, UnitId(3)).unwrap();
        assert_eq!(req.to_string(), "unit 3 register 30775 x2");
        let ep = Endpoint {
            host: "192.168.1.20".into(),
            port: 502,
        };
        assert_eq!(ep.to_string(), "192.168.1.20:502");
    }
}
