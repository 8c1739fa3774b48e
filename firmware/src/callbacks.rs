//! Transfer completion handlers.
//!
//! Both run in the USB stack's completion context. They only hold the lock
//! long enough to move a cursor, decide whether to resubmit and flag the
//! worker; the wake itself happens after the guard is released.

use dap_shared::{EndpointAddress, EndpointTransport};
use log::{debug, trace};

use crate::error::{EdptError, EdptResult};
use crate::state::{log_submit, Shared};

impl<T: EndpointTransport, const N: usize, const SIZE: usize> Shared<T, N, SIZE> {
    fn check_len(&self, ep: EndpointAddress, bytes: u32) -> EdptResult<()> {
        let max = self.requests.packet_size();
        if bytes as usize > max {
            return Err(EdptError::TransferLength { ep, bytes, max });
        }
        Ok(())
    }

    /// Host to device: a receive into the request write slot finished
    ///
    /// With a free slot the write cursor moves and the next receive is
    /// queued straight away. On a full ring the receive is not renewed and
    /// `was_full` tells the worker to do it once it frees a slot.
    pub fn complete_out(&self, ep: EndpointAddress, bytes: u32) -> EdptResult<()> {
        self.check_len(ep, bytes)?;
        {
            let mut state = self.state.lock();
            if state.endpoints()?.out_addr != ep {
                return Err(EdptError::UnknownEndpoint(ep));
            }

            if !state.request.is_full() {
                state.request.advance_write()?;
                log_submit(self.prime_receive(&state));
                state.request.set_was_full(false);
            } else {
                debug!(
                    "request ring full ({} packets), receive deferred",
                    state.request.capacity()
                );
                state.request.set_was_full(true);
            }
            trace!(
                "OUT {} bytes, request w={} r={}",
                bytes,
                state.request.write_cursor(),
                state.request.read_cursor()
            );
            state.work_pending = true;
        }
        self.notify_worker(true);
        Ok(())
    }

    /// Device to host: a send from the response read slot finished
    ///
    /// The slot is released. If the worker queued more responses behind it
    /// (`was_empty` clear), the next one is sent from here; otherwise the
    /// worker sends the next response itself.
    pub fn complete_in(&self, ep: EndpointAddress, bytes: u32) -> EdptResult<()> {
        self.check_len(ep, bytes)?;
        {
            let mut state = self.state.lock();
            if state.endpoints()?.in_addr != ep {
                return Err(EdptError::UnknownEndpoint(ep));
            }

            state.response.advance_read()?;
            if !state.response.was_empty() && !state.response.is_empty() {
                let index = state.response.read_index();
                log_submit(self.start_send(&state, index));
                // Only the send just queued is left in the ring
                let drained = state.response.len() == 1;
                state.response.set_was_empty(drained);
            }
            trace!(
                "IN {} bytes, response w={} r={}",
                bytes,
                state.response.write_cursor(),
                state.response.read_cursor()
            );
            state.work_pending = true;
        }
        self.notify_worker(false);
        Ok(())
    }
}
