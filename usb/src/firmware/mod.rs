use crate::commands::Command;
use crate::device::base::Transport;
use crate::error::ConnectError;
use crate::COMMAND_OUT_ENDPOINT;
use log::{debug, info};
use rusb::{Direction, Recipient, RequestType};
use std::thread::sleep;
use std::time::Duration;

mod image;

pub use image::{FirmwareCommand, FirmwareImage, SALEAE_LOGIC_FIRMWARE};

// "Firmware Load", handled by the FX2 boot loader itself.
const FIRMWARE_LOAD_REQUEST: u8 = 0xa0;

pub(crate) fn firmware_request_type() -> u8 {
    rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device)
}

/// Attempts a status request on the command endpoint. Without firmware the endpoint isn't
/// serviced and the write fails (usually by timing out), so any error is read as "absent".
///
/// This is a heuristic, a device in a strange state may accept the write and still not be
/// running our firmware.
pub fn is_firmware_present<T: Transport>(transport: &mut T, timeout: Duration) -> bool {
    let result = transport.write_bulk(
        COMMAND_OUT_ENDPOINT,
        &Command::ReadStatus.to_bytes(),
        timeout,
    );
    debug!("Firmware status request result: {:?}", result);
    result.is_ok()
}

/// Replays the image's control writes in table order, then waits for the device to reset.
///
/// The device drops off the bus and re-enumerates once the firmware starts, so the transport
/// used here is no longer valid afterwards. Nothing is read back, a bad upload only shows up
/// when the device is next opened.
pub fn upload<T: Transport>(
    transport: &mut T,
    image: &FirmwareImage,
    timeout: Duration,
    settle: Duration,
) -> Result<(), ConnectError> {
    let segments = image.segments()?;
    info!("Uploading firmware ({} commands)..", segments.len());

    let request_type = firmware_request_type();
    for (command, payload) in segments {
        transport.write_control(
            request_type,
            FIRMWARE_LOAD_REQUEST,
            command.value,
            command.index,
            payload,
            timeout,
        )?;
    }

    // Give the device time to reset and come back.
    sleep(settle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockTransport;

    #[test]
    fn request_type_is_vendor_out_to_device() {
        assert_eq!(firmware_request_type(), 0x40);
    }

    #[test]
    fn presence_check_sends_status_request() {
        let mut mock = MockTransport::new();
        assert!(is_firmware_present(&mut mock, Duration::from_millis(100)));

        let state = mock.state.borrow();
        assert_eq!(state.bulk_writes, vec![(COMMAND_OUT_ENDPOINT, vec![0x05])]);
    }

    #[test]
    fn any_status_write_error_means_absent() {
        for error in [rusb::Error::Timeout, rusb::Error::Pipe, rusb::Error::Io] {
            let mut mock = MockTransport::new();
            mock.state.borrow_mut().bulk_write_error = Some(error);
            assert!(!is_firmware_present(&mut mock, Duration::from_millis(100)));
        }
    }

    #[test]
    fn upload_replays_table_in_order() {
        let commands = [
            FirmwareCommand {
                value: 0xe600,
                index: 0,
                length: 1,
            },
            FirmwareCommand {
                value: 0x0000,
                index: 0,
                length: 4,
            },
            FirmwareCommand {
                value: 0x0004,
                index: 0,
                length: 2,
            },
            FirmwareCommand {
                value: 0xe600,
                index: 0,
                length: 1,
            },
        ];
        let data = [0x01, 0x02, 0x00, 0x06, 0x00, 0xe4, 0xf5, 0x00];
        let image = FirmwareImage::new(&commands, &data);

        let mut mock = MockTransport::new();
        upload(&mut mock, &image, Duration::from_millis(4), Duration::ZERO).unwrap();

        let state = mock.state.borrow();
        let writes = &state.control_writes;
        assert_eq!(writes.len(), 4);
        assert!(writes
            .iter()
            .all(|write| write.request_type == 0x40 && write.request == 0xa0));

        let values: Vec<u16> = writes.iter().map(|write| write.value).collect();
        assert_eq!(values, vec![0xe600, 0x0000, 0x0004, 0xe600]);
        assert_eq!(writes[0].data, vec![0x01]);
        assert_eq!(writes[1].data, vec![0x02, 0x00, 0x06, 0x00]);
        assert_eq!(writes[2].data, vec![0xe4, 0xf5]);
        assert_eq!(writes[3].data, vec![0x00]);
    }

    #[test]
    fn malformed_image_writes_nothing() {
        let commands = [FirmwareCommand {
            value: 0,
            index: 0,
            length: 8,
        }];
        let data = [0u8; 2];
        let image = FirmwareImage::new(&commands, &data);

        let mut mock = MockTransport::new();
        let result = upload(&mut mock, &image, Duration::from_millis(4), Duration::ZERO);

        assert!(matches!(result, Err(ConnectError::MalformedFirmware(0))));
        assert!(mock.state.borrow().control_writes.is_empty());
    }
}
