//! State shared by the completion callbacks and the command worker.
//!
//! Cursors and flags of both rings sit in one [`EdptState`] behind one
//! mutex, so every decision about who resubmits a transfer is made under the
//! same guard as the cursor move it depends on. Payload bytes live outside
//! the lock in [`PacketSlots`].
//!
//! The worker has two wait channels on that mutex:
//!
//! - `work_ready`: a callback ran and the worker should look at the rings
//! - `batch_ready`: the request write cursor moved, for the batch lookahead

use dap_shared::{EndpointAddress, EndpointTransport, PacketSlots, RingState};
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{EdptError, EdptResult};

/// The opened bulk endpoint pair
#[derive(Debug, Clone, Copy)]
pub(crate) struct Endpoints<H> {
    pub out_addr: EndpointAddress,
    pub out_handle: H,
    pub in_addr: EndpointAddress,
    pub in_handle: H,
}

/// Everything guarded by the driver lock
pub(crate) struct EdptState<H, const N: usize> {
    pub request: RingState<N>,
    pub response: RingState<N>,
    pub endpoints: Option<Endpoints<H>>,
    pub itf_num: u8,
    /// Set by callbacks, consumed by the worker's wait
    pub work_pending: bool,
    /// Bumped whenever the rings are reset; positions taken in an older
    /// session are stale
    pub session: u32,
    /// A [`CommandWorker`](crate::CommandWorker) exists for this driver
    pub worker_taken: bool,
    /// Times the worker blocked waiting for the end of a batch
    pub batch_waits: u32,
}

impl<H, const N: usize> EdptState<H, N> {
    fn new() -> Self {
        Self {
            request: RingState::new(),
            response: RingState::new(),
            endpoints: None,
            itf_num: 0,
            work_pending: false,
            session: 0,
            worker_taken: false,
            batch_waits: 0,
        }
    }

    /// Reset both rings to their open state and start a new session
    pub fn reset_rings(&mut self) {
        self.request.reset();
        self.response.reset();
        self.work_pending = false;
        self.session = self.session.wrapping_add(1);
    }

    pub fn endpoints(&self) -> EdptResult<&Endpoints<H>> {
        self.endpoints.as_ref().ok_or(EdptError::NotOpen)
    }
}

pub(crate) struct Shared<T: EndpointTransport, const N: usize, const SIZE: usize> {
    pub transport: T,
    pub state: Mutex<EdptState<T::Handle, N>>,
    pub work_ready: Condvar,
    pub batch_ready: Condvar,
    pub requests: PacketSlots<N, SIZE>,
    pub responses: PacketSlots<N, SIZE>,
}

impl<T: EndpointTransport, const N: usize, const SIZE: usize> Shared<T, N, SIZE> {
    const PACKET_LEN: u16 = {
        assert!(SIZE <= u16::MAX as usize, "packet size must fit a transfer length");
        SIZE as u16
    };

    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: Mutex::new(EdptState::new()),
            work_ready: Condvar::new(),
            batch_ready: Condvar::new(),
            requests: PacketSlots::new(),
            responses: PacketSlots::new(),
        }
    }

    /// Queue a full-packet receive into the request write slot
    ///
    /// Takes the guarded state, so it can only run under the lock.
    pub fn prime_receive(&self, state: &EdptState<T::Handle, N>) -> EdptResult<()> {
        let eps = state.endpoints()?;
        let index = state.request.write_index();
        trace!("OUT {} <- slot {}", eps.out_addr, index);

        // SAFETY: the slot at the write cursor belongs to the producer and no
        // other receive is pending; the slots outlive the transport.
        unsafe {
            self.transport.submit_transfer(
                eps.out_handle,
                self.requests.slot_ptr(index),
                Self::PACKET_LEN,
            )?;
        }
        Ok(())
    }

    /// Queue a send of response slot `index` with its recorded length
    pub fn start_send(&self, state: &EdptState<T::Handle, N>, index: usize) -> EdptResult<()> {
        let eps = state.endpoints()?;
        let len = state.response.slot_len(index);
        trace!("IN {} -> slot {} ({} bytes)", eps.in_addr, index, len);

        // SAFETY: the slot is between the response cursors, so the worker no
        // longer writes it until the send completes and the read cursor moves.
        unsafe {
            self.transport
                .submit_transfer(eps.in_handle, self.responses.slot_ptr(index), len)?;
        }
        Ok(())
    }

    /// Wake the worker out of either of its waits
    ///
    /// Call after the guard is dropped; `work_pending` must already be set
    /// or the session bumped.
    pub fn notify_worker(&self, producer_advanced: bool) {
        self.work_ready.notify_one();
        if producer_advanced {
            self.batch_ready.notify_one();
        }
    }
}

/// Log a submission failure; the ring state already moved on
pub(crate) fn log_submit(result: EdptResult<()>) {
    if let Err(e) = result {
        warn!("transfer submission failed: {e}");
    }
}
