use crate::{Result, UnitId};
use async_trait::async_trait;

/// A minimal register-read interface over one long-lived device connection.
#[async_trait]
pub trait RegisterBus: Send {
    /// Human-readable name of the connection, used in log lines.
    fn name(&self) -> &str;

    /// Read `count` input registers starting at `address` from `unit`.
    ///
    /// Implementations bound every call by a timeout; on success exactly `count`
    /// words are returned, most-significant word first as sent by the device.
    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: UnitId,
    ) -> Result<Vec<u16>>;
}
