use crate::device::base::{Completion, SubmitError, TransferRequest, TransferTag, Transport};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ControlWrite {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct MockState {
    // Behaviour
    pub bulk_write_error: Option<rusb::Error>,
    pub bulk_write_limit: Option<usize>,
    pub status_byte: Option<u8>,
    pub completion_lengths: VecDeque<usize>,
    pub default_completion_length: usize,
    pub batch_size: Option<usize>,
    pub fail_submit_after: Option<usize>,
    pub fail_events_after: Option<usize>,

    // Observations
    pub bulk_writes: Vec<(u8, Vec<u8>)>,
    pub control_writes: Vec<ControlWrite>,
    pub submitted: Vec<TransferTag>,
    pub canceled: Vec<TransferTag>,
    pub outstanding_at_wait: Vec<usize>,
    pub event_calls: usize,
    pub debug_level: Option<u8>,
    pub closed: bool,

    pending: VecDeque<TransferRequest>,
}

/// Completes queued bulk reads synchronously, in submission order, according to a script.
/// Requests submitted while a batch is being handed out land in the next batch.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    pub state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completions(lengths: &[usize], default_length: usize) -> Self {
        let mock = Self::new();
        {
            let mut state = mock.state.borrow_mut();
            state.completion_lengths = lengths.iter().copied().collect();
            state.default_completion_length = default_length;
        }
        mock
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

impl Transport for MockTransport {
    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.bulk_write_error {
            return Err(error);
        }
        state.bulk_writes.push((endpoint, data.to_vec()));
        Ok(state.bulk_write_limit.map_or(data.len(), |limit| limit.min(data.len())))
    }

    fn read_bulk(
        &mut self,
        _endpoint: u8,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let state = self.state.borrow();
        match state.status_byte {
            Some(byte) if !buffer.is_empty() => {
                buffer[0] = byte;
                Ok(1)
            }
            Some(_) => Ok(0),
            None => Err(rusb::Error::Timeout),
        }
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.state.borrow_mut().control_writes.push(ControlWrite {
            request_type,
            request,
            value,
            index,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn submit_bulk_in(&mut self, request: TransferRequest) -> Result<(), SubmitError> {
        let mut state = self.state.borrow_mut();
        if let Some(limit) = state.fail_submit_after {
            if state.submitted.len() >= limit {
                return Err(SubmitError {
                    error: rusb::Error::NoDevice,
                    buffer: request.buffer,
                });
            }
        }
        state.submitted.push(request.tag);
        state.pending.push_back(request);
        Ok(())
    }

    fn handle_events(&mut self) -> Result<Vec<Completion>, rusb::Error> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if let Some(limit) = state.fail_events_after {
            if state.event_calls >= limit {
                return Err(rusb::Error::Io);
            }
        }
        state.event_calls += 1;

        let waiting = state.pending.len();
        state.outstanding_at_wait.push(waiting);

        let batch = state.batch_size.unwrap_or(waiting).min(waiting);
        let mut completions = Vec::with_capacity(batch);
        for _ in 0..batch {
            let Some(mut request) = state.pending.pop_front() else {
                break;
            };
            let scripted = state
                .completion_lengths
                .pop_front()
                .unwrap_or(state.default_completion_length);
            let actual_length = scripted.min(request.buffer.len());

            // Stamp the data with its sequence so ordering is observable.
            let stamp = request.tag.sequence as u8;
            request.buffer[..actual_length].fill(stamp);

            completions.push(Completion {
                tag: request.tag,
                buffer: request.buffer,
                actual_length,
            });
        }
        Ok(completions)
    }

    fn cancel(&mut self, tag: TransferTag) -> Option<Vec<u8>> {
        let mut state = self.state.borrow_mut();
        let position = state.pending.iter().position(|request| request.tag == tag)?;
        state.canceled.push(tag);
        state.pending.remove(position).map(|request| request.buffer)
    }

    fn outstanding(&self) -> usize {
        self.pending()
    }

    fn set_debug_level(&mut self, level: u8) {
        self.state.borrow_mut().debug_level = Some(level);
    }

    fn close(self) {
        self.state.borrow_mut().closed = true;
    }
}
