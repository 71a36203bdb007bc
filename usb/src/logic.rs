use crate::commands::Command;
use crate::device::base::Transport;
use crate::device::libusb::device::LibUsbTransport;
use crate::error::{CommandError, ConnectError};
use crate::firmware::{self, FirmwareImage, SALEAE_LOGIC_FIRMWARE};
use crate::{COMMAND_IN_ENDPOINT, COMMAND_OUT_ENDPOINT, PID_SALEAE_LOGIC, VID_SALEAE_LOGIC};
use log::{debug, info};
use std::time::Duration;

const DEFAULT_TRANSFER_BUFFER_SIZE: usize = 4 * 1024;
const DEFAULT_TRANSFER_COUNT: usize = 4;

/// Parameters for a session and the captures it runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Size of each streaming transfer buffer, in bytes.
    pub transfer_buffer_size: usize,

    /// Number of streaming transfers kept in flight during a capture.
    pub transfer_count: usize,

    pub command_timeout: Duration,
    pub transfer_timeout: Duration,
    pub firmware_timeout: Duration,

    /// How long to wait after a firmware upload for the device to reset.
    pub firmware_settle: Duration,

    /// A capture fails once more than this many consecutive transfers arrive empty. The value
    /// is a heuristic carried over from the first working captures, not a device guarantee.
    pub stall_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transfer_buffer_size: DEFAULT_TRANSFER_BUFFER_SIZE,
            transfer_count: DEFAULT_TRANSFER_COUNT,
            command_timeout: Duration::from_millis(100),
            transfer_timeout: Duration::from_millis(4),
            firmware_timeout: Duration::from_millis(100),
            firmware_settle: Duration::from_secs(1),
            stall_threshold: 10,
        }
    }
}

/// Adjustments applied by `Logic::tune`. `None` and zero both leave a setting alone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Tuning {
    pub transfer_buffer_size: Option<usize>,
    pub transfer_count: Option<usize>,
    pub debug_level: Option<u8>,
}

/// An open Logic device with firmware running.
///
/// A session is not thread safe. A capture mutates its state from inside the transport's
/// event handling, so nothing else may touch the session while `capture` is running.
pub struct Logic<T: Transport> {
    transport: T,
    config: SessionConfig,
}

impl Logic<LibUsbTransport> {
    pub fn open() -> Result<Self, ConnectError> {
        Self::open_device(VID_SALEAE_LOGIC, PID_SALEAE_LOGIC)
    }

    pub fn open_device(vendor_id: u16, product_id: u16) -> Result<Self, ConnectError> {
        Self::open_with(
            vendor_id,
            product_id,
            SessionConfig::default(),
            &SALEAE_LOGIC_FIRMWARE,
        )
    }

    pub fn open_with(
        vendor_id: u16,
        product_id: u16,
        config: SessionConfig,
        firmware: &FirmwareImage,
    ) -> Result<Self, ConnectError> {
        let transport = LibUsbTransport::open(vendor_id, product_id)?;
        Self::from_transport(transport, config, firmware)
    }
}

impl<T: Transport> Logic<T> {
    /// Wraps an opened transport, bootstrapping the firmware if it isn't running.
    ///
    /// After an upload the device re-enumerates, so the transport is closed and
    /// `ConnectError::FirmwareUploaded` is returned. Open the device again once it's back.
    pub fn from_transport(
        transport: T,
        config: SessionConfig,
        firmware: &FirmwareImage,
    ) -> Result<Self, ConnectError> {
        let mut logic = Self { transport, config };

        if !logic.is_firmware_present() {
            info!("Found Logic without firmware, uploading..");
            let result = firmware::upload(
                &mut logic.transport,
                firmware,
                logic.config.firmware_timeout,
                logic.config.firmware_settle,
            );
            logic.close();

            result?;
            info!("Firmware uploaded, the device needs to be opened again");
            return Err(ConnectError::FirmwareUploaded);
        }

        debug!("Firmware present, session ready");
        Ok(logic)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Updates the transfer parameters used by the next capture. Captures already running
    /// keep the pool they were created with.
    pub fn tune(&mut self, tuning: Tuning) {
        if let Some(size) = tuning.transfer_buffer_size.filter(|size| *size > 0) {
            self.config.transfer_buffer_size = size;
        }

        if let Some(count) = tuning.transfer_count.filter(|count| *count > 0) {
            self.config.transfer_count = count;
        }

        if let Some(level) = tuning.debug_level.filter(|level| *level > 0) {
            self.transport.set_debug_level(level);
        }

        debug!(
            "Tuned session: {} transfers of {} bytes",
            self.config.transfer_count, self.config.transfer_buffer_size
        );
    }

    pub fn is_firmware_present(&mut self) -> bool {
        firmware::is_firmware_present(&mut self.transport, self.config.command_timeout)
    }

    /// Writes a command to the command endpoint, returning how many bytes the device took.
    pub fn send_command(&mut self, command: Command) -> Result<usize, rusb::Error> {
        self.transport.write_bulk(
            COMMAND_OUT_ENDPOINT,
            &command.to_bytes(),
            self.config.command_timeout,
        )
    }

    pub fn read_byte(&mut self) -> Result<u8, CommandError> {
        if let Err(error) = self.send_command(Command::ReadStatus) {
            debug!("Status request failed (out): {}", error);
            return Err(error.into());
        }

        let mut buffer = [0u8; 1];
        let length = match self.transport.read_bulk(
            COMMAND_IN_ENDPOINT,
            &mut buffer,
            self.config.command_timeout,
        ) {
            Ok(length) => length,
            Err(error) => {
                debug!("Status request failed (in): {}", error);
                return Err(error.into());
            }
        };

        if length == 0 {
            return Err(CommandError::EmptyResponse);
        }
        Ok(buffer[0])
    }

    /// Releases the device and its libusb context.
    pub fn close(self) {
        self.transport.close();
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
