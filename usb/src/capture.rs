// The streaming capture engine.
//
// A capture keeps a fixed pool of bulk reads in flight against the streaming endpoint. Every
// completion is copied into the caller's buffer and, while the recording still needs data, the
// same slot is immediately resubmitted with the same buffer. The loop only waits inside
// `Transport::handle_events`, and all state changes happen while dispatching the completions it
// returns, so a capture is driven entirely from the calling thread.
use crate::commands::Command;
use crate::device::base::{Completion, SubmitError, TransferRequest, TransferTag, Transport};
use crate::error::CaptureError;
use crate::logic::{Logic, SessionConfig};
use crate::STREAMING_DATA_IN_ENDPOINT;
use log::{debug, info, trace, warn};
use slogic_types::SampleRate;
use std::mem;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CaptureState {
    Idle,
    Submitting,
    Streaming,
    Succeeded,
    Failed,
    TornDown,
}

/// What a capture achieved. A capture that stalled still reports the bytes it collected, so
/// check `failed` before trusting the buffer is fully populated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub bytes_collected: usize,
    pub transfer_count: u64,
    pub failed: bool,

    /// Requests still outstanding when the capture finished, cancelled during teardown.
    pub canceled: usize,
}

// A slot's buffer lives in the slot while idle and inside the transport while its request is
// outstanding, so it can't be reused or freed under an active transfer.
#[derive(Debug)]
enum TransferSlot {
    Idle(Vec<u8>),
    InFlight(TransferTag),
    Released,
}

struct Recording<'a> {
    samples: &'a mut [u8],
    bytes_collected: usize,
    transfer_count: u64,

    slots: Vec<TransferSlot>,
    next_sequence: u64,
    transfer_timeout: Duration,

    empty_completions: u32,
    stall_threshold: u32,
    failed: bool,

    state: CaptureState,
}

impl<'a> Recording<'a> {
    fn new(config: &SessionConfig, samples: &'a mut [u8]) -> Self {
        let slots = (0..config.transfer_count.max(1))
            .map(|_| TransferSlot::Idle(vec![0; config.transfer_buffer_size.max(1)]))
            .collect();

        Self {
            samples,
            bytes_collected: 0,
            transfer_count: 0,
            slots,
            next_sequence: 0,
            transfer_timeout: config.transfer_timeout,
            empty_completions: 0,
            stall_threshold: config.stall_threshold,
            failed: false,
            state: CaptureState::Idle,
        }
    }

    fn transition(&mut self, state: CaptureState) {
        debug!("Capture {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn is_finished(&self) -> bool {
        self.failed || self.bytes_collected >= self.samples.len()
    }

    fn run<T: Transport>(
        &mut self,
        logic: &mut Logic<T>,
        rate: SampleRate,
    ) -> Result<(), CaptureError> {
        self.transition(CaptureState::Submitting);
        for slot in 0..self.slots.len() {
            self.submit(logic.transport_mut(), slot)?;
        }

        // Switch the logic to streaming read mode
        let command = Command::StartStreaming(rate.clock_divider());
        let expected = command.to_bytes().len();
        debug!("Entering streaming mode, divider={}", rate.clock_divider());

        let written = logic.send_command(command)?;
        if written != expected {
            return Err(CaptureError::ShortCommandWrite { expected, written });
        }

        self.transition(CaptureState::Streaming);
        while !self.is_finished() {
            let completions = logic.transport_mut().handle_events()?;
            for completion in completions {
                self.complete(logic.transport_mut(), completion)?;
            }
        }

        if self.failed {
            self.transition(CaptureState::Failed);
        } else {
            self.transition(CaptureState::Succeeded);
        }
        Ok(())
    }

    fn submit<T: Transport>(&mut self, transport: &mut T, slot: usize) -> Result<(), rusb::Error> {
        let buffer = match mem::replace(&mut self.slots[slot], TransferSlot::Released) {
            TransferSlot::Idle(buffer) => buffer,
            other => {
                self.slots[slot] = other;
                return Ok(());
            }
        };

        let tag = TransferTag {
            slot,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        let request = TransferRequest {
            tag,
            endpoint: STREAMING_DATA_IN_ENDPOINT,
            buffer,
            timeout: self.transfer_timeout,
        };

        match transport.submit_bulk_in(request) {
            Ok(()) => {
                self.slots[slot] = TransferSlot::InFlight(tag);
                Ok(())
            }
            Err(SubmitError { error, buffer }) => {
                warn!("Unable to submit transfer {}: {}", tag.sequence, error);
                self.slots[slot] = TransferSlot::Idle(buffer);
                Err(error)
            }
        }
    }

    fn complete<T: Transport>(
        &mut self,
        transport: &mut T,
        completion: Completion,
    ) -> Result<(), rusb::Error> {
        let Completion {
            tag,
            buffer,
            actual_length,
        } = completion;

        match self.slots.get(tag.slot) {
            Some(TransferSlot::InFlight(current)) if *current == tag => {}
            _ => {
                warn!("Ignoring completion for unknown transfer {:?}", tag);
                return Ok(());
            }
        }

        self.transfer_count += 1;
        let delivered = actual_length.min(buffer.len());

        // An empty transfer means the device had nothing for us yet, which is fine now and then
        // but means the link has stalled if it keeps happening.
        if delivered == 0 {
            self.empty_completions += 1;
            if self.empty_completions > self.stall_threshold && !self.failed {
                warn!(
                    "{} consecutive empty transfers, giving up",
                    self.empty_completions
                );
                self.failed = true;
            }
        } else {
            self.empty_completions = 0;
        }

        let start = self.bytes_collected;
        let accepted = delivered.min(self.samples.len() - start);
        self.samples[start..start + accepted].copy_from_slice(&buffer[..accepted]);
        self.bytes_collected += accepted;

        if accepted < delivered {
            debug!(
                "Discarded {} bytes past the end of the recording",
                delivered - accepted
            );
        }

        trace!(
            "seq = {}, sample_count = {}, actual_length = {}, done = {:.02}%",
            tag.sequence,
            self.bytes_collected,
            delivered,
            self.bytes_collected as f64 / self.samples.len() as f64 * 100.0
        );

        self.slots[tag.slot] = TransferSlot::Idle(buffer);
        if !self.is_finished() {
            self.submit(transport, tag.slot)?;
        }
        Ok(())
    }

    // Cancel before release, the transport must never complete into a buffer we've dropped.
    fn tear_down<T: Transport>(&mut self, transport: &mut T) -> usize {
        let mut canceled = 0;
        for slot in self.slots.iter_mut() {
            if let TransferSlot::InFlight(tag) = *slot {
                *slot = match transport.cancel(tag) {
                    Some(buffer) => {
                        canceled += 1;
                        TransferSlot::Idle(buffer)
                    }
                    None => {
                        warn!("Transfer {} was not outstanding at teardown", tag.sequence);
                        TransferSlot::Released
                    }
                };
            }
        }

        debug!("Canceled {} outstanding transfers", canceled);
        self.transition(CaptureState::TornDown);
        canceled
    }

    fn outcome(&self, canceled: usize) -> CaptureOutcome {
        CaptureOutcome {
            bytes_collected: self.bytes_collected,
            transfer_count: self.transfer_count,
            failed: self.failed,
            canceled,
        }
    }
}

impl<T: Transport> Logic<T> {
    /// Streams `target` bytes from the device into the start of `destination`.
    ///
    /// Returns once the target has been reached or the link stalls. A stall is not an error,
    /// it's reported through `CaptureOutcome::failed` alongside however much was collected.
    /// Transport failures abort the capture and are returned as-is. Every outstanding request
    /// is cancelled before this returns, whatever the result.
    ///
    /// Bytes land in the order the transport completes requests. That is only the order they
    /// were sampled in because the device delivers the streaming endpoint strictly in sequence.
    pub fn capture(
        &mut self,
        rate: SampleRate,
        destination: &mut [u8],
        target: usize,
    ) -> Result<CaptureOutcome, CaptureError> {
        if target == 0 {
            return Err(CaptureError::InvalidTarget);
        }
        if destination.len() < target {
            return Err(CaptureError::BufferTooSmall {
                capacity: destination.len(),
                target,
            });
        }

        let config = self.config().clone();
        let mut recording = Recording::new(&config, &mut destination[..target]);

        info!("Starting recording for {} samples at {}", target, rate);
        debug!(
            "Transfer buffers={}, buffer size={}",
            recording.slots.len(),
            config.transfer_buffer_size
        );

        let result = recording.run(self, rate);
        if let Err(error) = &result {
            warn!("Capture aborted: {}", error);
            recording.transition(CaptureState::Failed);
        }

        debug!(
            "{} transfers in flight at teardown",
            self.transport_mut().outstanding()
        );
        let canceled = recording.tear_down(self.transport_mut());
        result?;

        let outcome = recording.outcome(canceled);
        if outcome.failed {
            warn!("Capture stalled");
        } else {
            info!("Capture complete");
        }
        info!("Total number of samples read: {}", outcome.bytes_collected);
        info!("Total number of transfers: {}", outcome.transfer_count);

        Ok(outcome)
    }
}
