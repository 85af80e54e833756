//! modbus-transport: register-level access to field devices
//!
//! This crate provides the trait and types for reading input registers from Modbus
//! devices, with feature-gated backends. The default build enables a `mock` backend so
//! that the polling engine can be exercised without hardware, plus a Modbus TCP client built on `tokio-modbus`.

mod types;
pub use types::{Endpoint, ReadRequest, TransportConfig, UnitId, MAX_READ_WORDS};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::RegisterBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, ReadLog};

#[cfg(feature = "tcp")]
mod tcp;

#[cfg(feature = "tcp")]
pub use tcp::TcpBus;
