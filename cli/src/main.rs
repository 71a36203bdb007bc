use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};
use slogic_types::SampleRate;
use slogic_usb::device::LibUsbTransport;
use slogic_usb::error::ConnectError;
use slogic_usb::logic::{Logic, Tuning};
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use crate::cli::{Cli, DeviceOptions, SubCommands};

mod cli;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// Time for the device to drop off the bus and re-enumerate with its new firmware.
const REENUMERATION_DELAY: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    CombinedLogger::init(vec![TermLogger::new(
        args.log_level.into(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .context("Could not configure the logger")?;

    match args.command {
        SubCommands::Rates => {
            list_rates();
            Ok(())
        }
        SubCommands::Status { device } => status(&device),
        SubCommands::Capture {
            rate,
            samples,
            output,
            device,
        } => capture(&device, rate, samples, output.as_deref()),
    }
}

fn list_rates() {
    for rate in SampleRate::all() {
        println!(
            "{:>7}  divider {:>3}  {} Hz",
            rate.name(),
            rate.clock_divider(),
            rate.frequency_hz()
        );
    }
}

fn status(options: &DeviceOptions) -> Result<()> {
    let mut logic = open_device(options)?;
    let status = logic.read_byte().context("Unable to read the status byte")?;
    println!("Status: 0x{:02x}", status);
    logic.close();
    Ok(())
}

fn capture(
    options: &DeviceOptions,
    rate: SampleRate,
    samples: usize,
    output: Option<&Path>,
) -> Result<()> {
    if samples == 0 {
        bail!("At least one sample must be requested");
    }

    let mut logic = open_device(options)?;
    let mut buffer = vec![0u8; samples];

    let result = logic.capture(rate, &mut buffer, samples);
    logic.close();
    let outcome = result.context("Capture failed")?;

    if let Some(path) = output {
        std::fs::write(path, &buffer[..outcome.bytes_collected])
            .with_context(|| format!("Unable to write samples to {}", path.display()))?;
        info!("Wrote {} bytes to {}", outcome.bytes_collected, path.display());
    }

    if outcome.failed {
        bail!(
            "Device stopped sending data after {} of {} samples",
            outcome.bytes_collected,
            samples
        );
    }
    Ok(())
}

fn open_device(options: &DeviceOptions) -> Result<Logic<LibUsbTransport>> {
    info!("Starting slogic v{}", VERSION);

    let mut budget = ReopenBudget::new(options.retries);
    let mut logic = loop {
        match Logic::open() {
            Ok(logic) => break logic,
            Err(error) => match budget.next(&error) {
                Some(Retry::AfterUpload) => {
                    info!("Firmware uploaded, waiting for the device to come back..");
                    sleep(REENUMERATION_DELAY);
                }
                Some(Retry::AwaitReenumeration) => {
                    warn!("Device not back yet, retrying..");
                    sleep(REENUMERATION_DELAY);
                }
                None => return Err(error).context("Unable to open the Logic"),
            },
        }
    };

    logic.tune(Tuning {
        transfer_buffer_size: options.buffer_size,
        transfer_count: options.transfers,
        debug_level: options.usb_debug,
    });
    Ok(logic)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Retry {
    AfterUpload,
    AwaitReenumeration,
}

/// Bounds the reopen loop. Firmware uploads and waits for the device to reappear are counted
/// separately, each against `limit`, and every upload gets a fresh re-enumeration window.
#[derive(Debug)]
struct ReopenBudget {
    limit: u32,
    uploads: u32,
    waits: u32,
}

impl ReopenBudget {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            uploads: 0,
            waits: 0,
        }
    }

    fn next(&mut self, error: &ConnectError) -> Option<Retry> {
        match error {
            ConnectError::FirmwareUploaded if self.uploads < self.limit => {
                self.uploads += 1;
                self.waits = 0;
                Some(Retry::AfterUpload)
            }
            // Only expected while the device re-enumerates after an upload.
            ConnectError::DeviceNotFound if self.uploads > 0 && self.waits < self.limit => {
                self.waits += 1;
                Some(Retry::AwaitReenumeration)
            }
            _ => None,
        }
    }
}
