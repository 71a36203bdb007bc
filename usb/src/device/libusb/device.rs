use crate::device::base::{Completion, SubmitError, TransferRequest, TransferTag, Transport};
use crate::error::ConnectError;
use log::{debug, info, warn};
use rusb::ffi;
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, LogLevel, UsbContext};
use std::collections::VecDeque;
use std::os::raw::{c_int, c_uint, c_void};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// libusb_transfer_status
const TRANSFER_COMPLETED: c_int = 0;
const TRANSFER_ERROR: c_int = 1;
const TRANSFER_TIMED_OUT: c_int = 2;
const TRANSFER_CANCELLED: c_int = 3;
const TRANSFER_STALL: c_int = 4;
const TRANSFER_NO_DEVICE: c_int = 5;
const TRANSFER_OVERFLOW: c_int = 6;

const TRANSFER_TYPE_BULK: u8 = 2;

// How long a single pass of libusb event handling may block.
const EVENT_WAIT: Duration = Duration::from_millis(100);

// A cancelled transfer has to be reaped before its memory can go. Give up (and leak it) rather
// than hang if libusb never calls back.
const CANCEL_ATTEMPTS: usize = 50;

/// A transport backed by libusb.
///
/// Bulk reads are posted with libusb's asynchronous API, so every submitted request is queued
/// with the kernel at the same time and `handle_events` only waits for the first of them to
/// finish. libusb calls back in the order the device filled the transfers, which is submission
/// order for a single endpoint.
///
/// Posted transfers point into buffers owned here, so the transport is neither `Send` nor `Sync`
/// and it cancels and reaps anything still in flight when dropped.
pub struct LibUsbTransport {
    context: Context,
    handle: DeviceHandle<Context>,
    device: Device<Context>,
    device_is_claimed: bool,
    posted: VecDeque<PostedTransfer>,
}

/// A bulk read handed to libusb. The buffer and completion flag must stay put until libusb has
/// called back, both live on the heap so moving this struct around is fine.
struct PostedTransfer {
    tag: TransferTag,
    raw: NonNull<ffi::libusb_transfer>,
    buffer: Vec<u8>,
    done: Box<AtomicBool>,
}

impl PostedTransfer {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Frees the libusb transfer and hands back the buffer along with the outcome. Only valid
    /// once libusb has called back.
    fn finish(self) -> (TransferTag, Vec<u8>, Result<usize, rusb::Error>) {
        let (status, actual_length) = unsafe {
            let transfer = self.raw.as_ptr();
            let outcome = ((*transfer).status, (*transfer).actual_length);
            ffi::libusb_free_transfer(transfer);
            outcome
        };
        (self.tag, self.buffer, transfer_result(status, actual_length))
    }
}

extern "system" fn transfer_callback(transfer: *mut ffi::libusb_transfer) {
    unsafe {
        let done = (*transfer).user_data as *const AtomicBool;
        if let Some(done) = done.as_ref() {
            done.store(true, Ordering::Release);
        }
    }
}

impl LibUsbTransport {
    pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, ConnectError> {
        let mut context = Context::new()?;
        context.set_log_level(log_level(3));

        let (device, descriptor) =
            find_device(&context, vendor_id, product_id).ok_or(ConnectError::DeviceNotFound)?;
        let mut handle = device.open()?;

        info!(
            "Connected to Logic device {:04x}:{:04x} at bus {} address {}",
            descriptor.vendor_id(),
            descriptor.product_id(),
            device.bus_number(),
            device.address()
        );

        if let Err(error) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto detach unavailable: {}", error);
        }
        let device_is_claimed = handle.claim_interface(0).is_ok();
        debug!("Interface 0 claimed: {}", device_is_claimed);

        Ok(Self {
            context,
            handle,
            device,
            device_is_claimed,
            posted: VecDeque::new(),
        })
    }

    /// Runs one pass of libusb event handling, which is where transfer callbacks fire.
    fn pump_events(&mut self) -> Result<(), rusb::Error> {
        let timeout = libc::timeval {
            tv_sec: EVENT_WAIT.as_secs() as _,
            tv_usec: EVENT_WAIT.subsec_micros() as _,
        };
        let result = unsafe {
            ffi::libusb_handle_events_timeout_completed(
                self.context.as_raw(),
                &timeout,
                ptr::null_mut(),
            )
        };
        match result {
            0 => Ok(()),
            code => match usb_error(code) {
                rusb::Error::Interrupted => Ok(()),
                error => Err(error),
            },
        }
    }

    fn cancel_all(&mut self) {
        let tags: Vec<TransferTag> = self.posted.iter().map(|posted| posted.tag).collect();
        if !tags.is_empty() {
            warn!("Cancelling {} transfers still in flight", tags.len());
        }
        for tag in tags {
            self.cancel(tag);
        }
    }
}

impl Transport for LibUsbTransport {
    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle.write_bulk(endpoint, data, timeout)
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle.read_bulk(endpoint, buffer, timeout)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn submit_bulk_in(&mut self, request: TransferRequest) -> Result<(), SubmitError> {
        let TransferRequest {
            tag,
            endpoint,
            mut buffer,
            timeout,
        } = request;

        let length = match c_int::try_from(buffer.len()) {
            Ok(0) | Err(_) => {
                return Err(SubmitError {
                    error: rusb::Error::InvalidParam,
                    buffer,
                })
            }
            Ok(length) => length,
        };

        let Some(raw) = NonNull::new(unsafe { ffi::libusb_alloc_transfer(0) }) else {
            return Err(SubmitError {
                error: rusb::Error::NoMem,
                buffer,
            });
        };

        let done = Box::new(AtomicBool::new(false));
        let result = unsafe {
            let transfer = raw.as_ptr();
            (*transfer).dev_handle = self.handle.as_raw();
            (*transfer).endpoint = endpoint;
            (*transfer).transfer_type = TRANSFER_TYPE_BULK;
            (*transfer).timeout = timeout_millis(timeout);
            (*transfer).buffer = buffer.as_mut_ptr();
            (*transfer).length = length;
            (*transfer).callback = transfer_callback;
            (*transfer).user_data = &*done as *const AtomicBool as *mut c_void;
            ffi::libusb_submit_transfer(transfer)
        };

        if result != 0 {
            unsafe { ffi::libusb_free_transfer(raw.as_ptr()) };
            return Err(SubmitError {
                error: usb_error(result),
                buffer,
            });
        }

        self.posted.push_back(PostedTransfer {
            tag,
            raw,
            buffer,
            done,
        });
        Ok(())
    }

    fn handle_events(&mut self) -> Result<Vec<Completion>, rusb::Error> {
        if self.posted.is_empty() {
            return Ok(Vec::new());
        }

        while !self.posted.iter().any(PostedTransfer::is_done) {
            self.pump_events()?;
        }

        let mut completions = Vec::new();
        let mut index = 0;
        while index < self.posted.len() {
            if !self.posted[index].is_done() {
                index += 1;
                continue;
            }
            let Some(posted) = self.posted.remove(index) else {
                break;
            };
            let (tag, buffer, result) = posted.finish();
            match result {
                Ok(actual_length) => completions.push(Completion {
                    tag,
                    buffer,
                    actual_length,
                }),
                Err(error) => {
                    debug!("Transfer {:?} failed: {}", tag, error);
                    return Err(error);
                }
            }
        }
        Ok(completions)
    }

    fn cancel(&mut self, tag: TransferTag) -> Option<Vec<u8>> {
        let position = self.posted.iter().position(|posted| posted.tag == tag)?;
        let posted = self.posted.remove(position)?;

        if !posted.is_done() {
            // NOT_FOUND here means the transfer finished and is only waiting to be reaped.
            unsafe { ffi::libusb_cancel_transfer(posted.raw.as_ptr()) };
        }

        let mut attempts = 0;
        while !posted.is_done() {
            if attempts == CANCEL_ATTEMPTS {
                warn!("Transfer {:?} never returned from cancellation, leaking it", tag);
                std::mem::forget(posted);
                return None;
            }
            attempts += 1;
            if let Err(error) = self.pump_events() {
                debug!("Event handling failed while cancelling: {}", error);
            }
        }

        let (_, buffer, _) = posted.finish();
        Some(buffer)
    }

    fn outstanding(&self) -> usize {
        self.posted.len()
    }

    fn set_debug_level(&mut self, level: u8) {
        self.context.set_log_level(log_level(level));
    }

    fn close(mut self) {
        self.cancel_all();
        if self.device_is_claimed {
            if let Err(error) = self.handle.release_interface(0) {
                debug!("Unable to release interface: {}", error);
            }
            self.device_is_claimed = false;
        }
        debug!("Closed Logic device at {:?}", self.device);
    }
}

impl Drop for LibUsbTransport {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Maps a finished transfer's status onto what the capture sees. A timed out or cancelled read
/// still reports whatever it managed to fill, usually nothing.
fn transfer_result(status: c_int, actual_length: c_int) -> Result<usize, rusb::Error> {
    match status {
        TRANSFER_COMPLETED | TRANSFER_TIMED_OUT | TRANSFER_CANCELLED => {
            Ok(usize::try_from(actual_length).unwrap_or(0))
        }
        TRANSFER_STALL => Err(rusb::Error::Pipe),
        TRANSFER_NO_DEVICE => Err(rusb::Error::NoDevice),
        TRANSFER_OVERFLOW => Err(rusb::Error::Overflow),
        TRANSFER_ERROR => Err(rusb::Error::Io),
        _ => Err(rusb::Error::Other),
    }
}

// libusb_error codes
fn usb_error(code: c_int) -> rusb::Error {
    match code {
        -1 => rusb::Error::Io,
        -2 => rusb::Error::InvalidParam,
        -3 => rusb::Error::Access,
        -4 => rusb::Error::NoDevice,
        -5 => rusb::Error::NotFound,
        -6 => rusb::Error::Busy,
        -7 => rusb::Error::Timeout,
        -8 => rusb::Error::Overflow,
        -9 => rusb::Error::Pipe,
        -10 => rusb::Error::Interrupted,
        -11 => rusb::Error::NoMem,
        -12 => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    }
}

// libusb treats a zero timeout as "wait forever", clamp everything else to at least 1ms.
fn timeout_millis(timeout: Duration) -> c_uint {
    if timeout.is_zero() {
        return 0;
    }
    c_uint::try_from(timeout.as_millis())
        .unwrap_or(c_uint::MAX)
        .max(1)
}

// Mirrors libusb_set_debug levels, 0 silences the library entirely.
fn log_level(level: u8) -> LogLevel {
    match level {
        0 => LogLevel::None,
        1 => LogLevel::Error,
        2 => LogLevel::Warning,
        3 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

fn find_device(
    context: &Context,
    vendor_id: u16,
    product_id: u16,
) -> Option<(Device<Context>, DeviceDescriptor)> {
    if let Ok(devices) = context.devices() {
        for device in devices.iter() {
            if let Ok(descriptor) = device.device_descriptor() {
                if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
                    return Some((device, descriptor));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_levels_follow_libusb_numbering() {
        assert!(matches!(log_level(0), LogLevel::None));
        assert!(matches!(log_level(1), LogLevel::Error));
        assert!(matches!(log_level(2), LogLevel::Warning));
        assert!(matches!(log_level(3), LogLevel::Info));
        assert!(matches!(log_level(9), LogLevel::Debug));
    }

    #[test]
    fn expired_and_cancelled_reads_are_completions() {
        assert_eq!(transfer_result(TRANSFER_COMPLETED, 4096), Ok(4096));
        assert_eq!(transfer_result(TRANSFER_TIMED_OUT, 0), Ok(0));
        assert_eq!(transfer_result(TRANSFER_TIMED_OUT, 512), Ok(512));
        assert_eq!(transfer_result(TRANSFER_CANCELLED, 0), Ok(0));
    }

    #[test]
    fn failed_transfers_map_to_usb_errors() {
        assert_eq!(transfer_result(TRANSFER_STALL, 0), Err(rusb::Error::Pipe));
        assert_eq!(
            transfer_result(TRANSFER_NO_DEVICE, 0),
            Err(rusb::Error::NoDevice)
        );
        assert_eq!(
            transfer_result(TRANSFER_OVERFLOW, 0),
            Err(rusb::Error::Overflow)
        );
        assert_eq!(transfer_result(TRANSFER_ERROR, 0), Err(rusb::Error::Io));
        assert_eq!(transfer_result(42, 0), Err(rusb::Error::Other));
    }

    #[test]
    fn libusb_error_codes_are_translated() {
        assert_eq!(usb_error(-7), rusb::Error::Timeout);
        assert_eq!(usb_error(-4), rusb::Error::NoDevice);
        assert_eq!(usb_error(-10), rusb::Error::Interrupted);
        assert_eq!(usb_error(-99), rusb::Error::Other);
    }

    #[test]
    fn zero_timeout_waits_forever_and_short_ones_round_up() {
        assert_eq!(timeout_millis(Duration::ZERO), 0);
        assert_eq!(timeout_millis(Duration::from_micros(200)), 1);
        assert_eq!(timeout_millis(Duration::from_millis(4)), 4);
    }

    #[test]
    fn callback_marks_transfer_done() {
        let done = Box::new(AtomicBool::new(false));
        let raw = unsafe { ffi::libusb_alloc_transfer(0) };
        assert!(!raw.is_null());
        unsafe {
            (*raw).user_data = &*done as *const AtomicBool as *mut c_void;
            transfer_callback(raw);
            ffi::libusb_free_transfer(raw);
        }
        assert!(done.load(Ordering::Acquire));
    }
}
