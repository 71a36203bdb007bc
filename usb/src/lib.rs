pub use rusb;
pub use slogic_types::SampleRate;

pub mod capture;
pub mod commands;
pub mod device;
pub mod error;
pub mod firmware;
pub mod logic;

// Bus 006 Device 006: ID 0925:3881 Lakeview Research
pub const VID_SALEAE_LOGIC: u16 = 0x0925;
pub const PID_SALEAE_LOGIC: u16 = 0x3881;

// EP1 OUT
pub const COMMAND_OUT_ENDPOINT: u8 = 0x01;
// EP1 IN
pub const COMMAND_IN_ENDPOINT: u8 = 0x81;
// EP2 IN
pub const STREAMING_DATA_IN_ENDPOINT: u8 = 0x82;
// EP6 OUT, unused by the current firmware commands
pub const STREAMING_DATA_OUT_ENDPOINT: u8 = 0x06;
