use clap::{Args, Parser, Subcommand, ValueEnum};
use slogic_types::SampleRate;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(about, version, author)]
pub struct Cli {
    /// Minimum log level to print out
    #[clap(long, value_enum, default_value = "info")]
    pub log_level: LevelFilter,

    #[clap(subcommand)]
    pub command: SubCommands,
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    /// List the supported sample rates
    Rates,

    /// Open the device, uploading firmware if needed, and read its status byte
    Status {
        #[clap(flatten)]
        device: DeviceOptions,
    },

    /// Record raw samples from the device
    Capture {
        /// Rate to sample at
        #[clap(short, long, value_enum)]
        rate: SampleRate,

        /// Number of samples (bytes) to record
        #[clap(short = 'n', long)]
        samples: usize,

        /// Write the raw samples to this file
        #[clap(short, long)]
        output: Option<PathBuf>,

        #[clap(flatten)]
        device: DeviceOptions,
    },
}

#[derive(Args, Debug)]
pub struct DeviceOptions {
    /// Size of each USB transfer buffer, in bytes
    #[clap(short, long)]
    pub buffer_size: Option<usize>,

    /// Number of USB transfers kept in flight
    #[clap(short, long)]
    pub transfers: Option<usize>,

    /// libusb debug level (1-4)
    #[clap(short, long)]
    pub usb_debug: Option<u8>,

    /// How many times to reopen the device after a firmware upload
    #[clap(long, default_value = "3")]
    pub retries: u32,
}

#[repr(usize)]
#[derive(ValueEnum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LevelFilter {
    /// A level lower than all log levels.
    Off,
    /// Corresponds to the `Error` log level.
    Error,
    /// Corresponds to the `Warn` log level.
    Warn,
    /// Corresponds to the `Info` log level.
    Info,
    /// Corresponds to the `Debug` log level.
    Debug,
    /// Corresponds to the `Trace` log level.
    Trace,
}

impl From<LevelFilter> for log::LevelFilter {
    fn from(level: LevelFilter) -> Self {
        match level {
            LevelFilter::Off => log::LevelFilter::Off,
            LevelFilter::Error => log::LevelFilter::Error,
            LevelFilter::Warn => log::LevelFilter::Warn,
            LevelFilter::Info => log::LevelFilter::Info,
            LevelFilter::Debug => log::LevelFilter::Debug,
            LevelFilter::Trace => log::LevelFilter::Trace,
        }
    }
}
