#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("No Logic device was found")]
    DeviceNotFound,

    #[error("Firmware was uploaded and the device is restarting, open it again")]
    FirmwareUploaded,

    #[error("Firmware image is malformed at command {0}")]
    MalformedFirmware(usize),

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error("Device returned no status byte")]
    EmptyResponse,
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("Capture target must be at least one byte")]
    InvalidTarget,

    #[error("Destination holds {capacity} bytes but {target} were requested")]
    BufferTooSmall { capacity: usize, target: usize },

    #[error("Streaming command was cut short, sent {written} of {expected} bytes")]
    ShortCommandWrite { expected: usize, written: usize },

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),
}
