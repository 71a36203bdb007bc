use std::time::Duration;

/// Identifies one submission of a transfer slot. The slot index is a plain index into the
/// capture's slot table, the sequence number is unique for the lifetime of a capture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransferTag {
    pub slot: usize,
    pub sequence: u64,
}

/// An asynchronous bulk read. The buffer is owned by the transport until the request either
/// completes or is cancelled, at which point it's handed back.
#[derive(Debug)]
pub struct TransferRequest {
    pub tag: TransferTag,
    pub endpoint: u8,
    pub buffer: Vec<u8>,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct Completion {
    pub tag: TransferTag,
    pub buffer: Vec<u8>,
    pub actual_length: usize,
}

/// Returned when a request couldn't be queued, giving the buffer back to the caller.
#[derive(Debug)]
pub struct SubmitError {
    pub error: rusb::Error,
    pub buffer: Vec<u8>,
}

pub trait Transport {
    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn submit_bulk_in(&mut self, request: TransferRequest) -> Result<(), SubmitError>;

    /// Blocks until at least one outstanding request has completed (or timed out) and returns
    /// every completion that was processed. This is the only place a capture waits.
    fn handle_events(&mut self) -> Result<Vec<Completion>, rusb::Error>;

    /// Cancels and frees an outstanding request, returning its buffer. `None` if the tag is not
    /// outstanding.
    fn cancel(&mut self, tag: TransferTag) -> Option<Vec<u8>>;

    fn outstanding(&self) -> usize;

    fn set_debug_level(&mut self, level: u8);

    /// Releases the device and any library context held by the transport.
    fn close(self)
    where
        Self: Sized,
    {
    }
}
