//! register-map: declarative register maps and the decoding engine behind them
//!
//! A register map lists, in order, every input register an inverter model exposes:
//! its address, its [`Encoding`] (which fixes how many words are read) and the
//! [`ScalingFormat`] applied to the decoded integer. [`decode`] turns raw words into a
//! [`DecodedValue`]; [`DeviceReader`] sweeps a whole map against one device.

mod types;
pub use types::*;

mod loader;
pub use loader::{
    load_register_map_file, load_register_maps_dir, model_from_path, RegisterMapRegistry,
};

mod metrics;
pub use metrics::SweepMetrics;

mod decode;
pub use decode::{decode, DecodeError, DecodedValue, MAX_UNSIGNED, MIN_SIGNED};

mod reader;
pub use reader::{
    format_timestamp, DeviceReader, SkippedRegister, SweepOutcome, SweepResult, TIMESTAMP_FIELD,
};
