// The capture and firmware code only ever talk to a `Transport`, never to libusb directly, so
// they can be driven by the real device or by a scripted stand-in under test.
pub mod base;
pub mod libusb;

#[cfg(test)]
pub(crate) mod mock;

pub use base::{Completion, SubmitError, TransferRequest, TransferTag, Transport};
pub use libusb::device::LibUsbTransport;
