//! # Command Worker
//!
//! The worker drains the request ring one packet at a time: it runs the
//! batch lookahead, hands the packet to the [`CommandEngine`], stores the
//! response in the response ring and keeps both endpoints supplied with
//! transfers.
//!
//! ## Per-packet Sequence
//!
//! ```text
//!  wait for work ──► request ring empty? ──yes──► wait for work
//!                          │ no
//!                          ▼
//!                  batch lookahead (may wait for the batch end)
//!                          │
//!                  wait for a free response slot
//!                          │
//!                  execute into response write slot
//!                          │
//!   lock: release request slot, renew deferred receive,
//!         publish response and send it if the IN side is idle
//! ```
//!
//! Every packet is executed on its own and in cursor order; a
//! `QueueCommands` batch only decides when the worker may start on it.
//! Positions are tagged with the ring session, so a reset by `open`,
//! `init` or `deinit` during any wait sends the worker back to the top.

use std::sync::Arc;

use dap_shared::{CommandEngine, CommandId, CommandLabel, EndpointTransport, RingState};
use log::{debug, warn};

use crate::error::EdptResult;
use crate::state::{log_submit, Shared};

/// Single consumer of the request ring and producer of the response ring
///
/// Obtained from [`DapEdpt::worker`](crate::DapEdpt::worker), which hands
/// out one worker per driver at a time. Dropping the worker releases the
/// claim.
pub struct CommandWorker<T: EndpointTransport, E, const N: usize, const SIZE: usize> {
    shared: Arc<Shared<T, N, SIZE>>,
    engine: E,
}

/// Where the worker stands in the request ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    session: u32,
    cursor: u32,
}

enum Step {
    Executed,
    /// The rings were reset while the worker was away from the lock
    Stale,
}

impl<T, E, const N: usize, const SIZE: usize> CommandWorker<T, E, N, SIZE>
where
    T: EndpointTransport,
    E: CommandEngine,
{
    pub(crate) fn new(shared: Arc<Shared<T, N, SIZE>>, engine: E) -> Self {
        Self { shared, engine }
    }

    /// Serve requests for the rest of the interface's life
    pub fn run(mut self) -> ! {
        loop {
            self.wait_for_work();
            self.service();
        }
    }

    /// Block until a completion callback has run since the last call
    pub fn wait_for_work(&self) {
        let mut state = self.shared.state.lock();
        while !state.work_pending {
            self.shared.work_ready.wait(&mut state);
        }
        state.work_pending = false;
    }

    /// Execute every request that is ready, returning how many ran
    pub fn service(&mut self) -> usize {
        let mut executed = 0;
        while self.service_one() {
            executed += 1;
        }
        executed
    }

    /// Execute the oldest unread request, if there is one
    pub fn service_one(&mut self) -> bool {
        loop {
            let Some(pos) = self.next_request() else {
                return false;
            };
            match self.process(pos) {
                Ok(Step::Executed) => return true,
                Ok(Step::Stale) => debug!("rings reset during wait, rescanning"),
                Err(e) => {
                    warn!("command worker: {e}");
                    return true;
                }
            }
        }
    }

    fn next_request(&self) -> Option<Position> {
        let state = self.shared.state.lock();
        (!state.request.is_empty()).then(|| Position {
            session: state.session,
            cursor: state.request.read_cursor(),
        })
    }

    fn process(&mut self, pos: Position) -> EdptResult<Step> {
        if !self.await_batch_end(pos) || !self.await_response_slot(pos.session) {
            return Ok(Step::Stale);
        }
        self.execute(pos)
    }

    /// Relabel a run of `QueueCommands` packets starting at `start`
    ///
    /// Returns once a packet with another identifier is found. While the
    /// scan sits on the write cursor it waits for the host to send more,
    /// unless the ring is full and nothing more can arrive. Returns false if
    /// the rings were reset in the meantime.
    fn await_batch_end(&self, start: Position) -> bool {
        let mut cursor = start.cursor;
        let mut state = self.shared.state.lock();
        loop {
            if state.session != start.session {
                return false;
            }
            let index = RingState::<N>::index_of(cursor);
            // SAFETY: the lock is held and the session is unchanged, so the
            // cursor lies between the request read and write cursors and the
            // slot is the worker's until the read cursor passes it.
            let slot = unsafe { self.shared.requests.slot_mut(index) };
            if slot.first() != Some(&(CommandId::QueueCommands as u8)) {
                return true;
            }
            debug!(
                "DAP queued cmd {} len {:#04x}",
                CommandLabel::of(slot),
                slot.get(1).copied().unwrap_or(0)
            );
            slot[0] = CommandId::ExecuteCommands as u8;
            cursor = cursor.wrapping_add(1);

            while cursor == state.request.write_cursor() {
                if state.session != start.session {
                    return false;
                }
                if state.request.was_full() {
                    debug!("DAP batch fills the request ring, executing queued packets");
                    return true;
                }
                debug!("DAP wait");
                state.batch_waits = state.batch_waits.wrapping_add(1);
                self.shared.batch_ready.wait(&mut state);
            }
        }
    }

    /// Wait until the response write slot has no send in flight
    fn await_response_slot(&self, session: u32) -> bool {
        let mut state = self.shared.state.lock();
        while state.response.is_full() {
            if state.session != session {
                return false;
            }
            debug!("response ring full, waiting for IN completion");
            self.shared.work_ready.wait(&mut state);
        }
        state.session == session
    }

    fn execute(&mut self, pos: Position) -> EdptResult<Step> {
        let (req_index, resp_index) = {
            let state = self.shared.state.lock();
            if state.session != pos.session || state.request.is_empty() {
                return Ok(Step::Stale);
            }
            (state.request.read_index(), state.response.write_index())
        };

        let len = {
            // SAFETY: the request slot is unread and owned by the worker; the
            // response slot sits at the write cursor of a ring that is not
            // full, so no send is using it.
            let request = unsafe { self.shared.requests.slot(req_index) };
            let response = unsafe { self.shared.responses.slot_mut(resp_index) };
            debug!(
                "{} DAP cmd {} len {:#04x}",
                pos.cursor,
                CommandLabel::of(request),
                request.get(1).copied().unwrap_or(0)
            );
            let raw = self.engine.execute(request, response);
            let len = response_len(raw, SIZE);
            debug!("DAP resp {} len {}", CommandLabel::of(response), len);
            len
        };

        let mut state = self.shared.state.lock();
        if state.session != pos.session {
            debug!("rings reset during execution, response dropped");
            return Ok(Step::Executed);
        }
        state.request.advance_read()?;
        if state.request.was_full() {
            // The callback skipped this receive because the ring was full
            state.request.advance_write()?;
            log_submit(self.shared.prime_receive(&state));
            state.request.set_was_full(false);
        }

        state.response.set_slot_len(resp_index, len);
        if state.response.is_empty() {
            state.response.advance_write()?;
            let index = state.response.read_index();
            log_submit(self.shared.start_send(&state, index));
        } else {
            state.response.advance_write()?;
            // A send is in flight; its completion picks this one up
            state.response.set_was_empty(false);
        }
        Ok(Step::Executed)
    }
}

impl<T: EndpointTransport, E, const N: usize, const SIZE: usize> Drop
    for CommandWorker<T, E, N, SIZE>
{
    fn drop(&mut self) {
        self.shared.state.lock().worker_taken = false;
    }
}

/// Response length from the engine's return value
///
/// The engine reports the length in the low 16 bits; it can never exceed a
/// slot.
fn response_len(raw: u32, packet_size: usize) -> u16 {
    let len = (raw & 0xFFFF) as u16;
    if len as usize > packet_size {
        warn!("engine returned {len} bytes for a {packet_size} byte packet");
        return packet_size as u16;
    }
    len
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use dap_shared::usb::CLASS_VENDOR_SPECIFIC;
    use dap_shared::{ClassDriver, CommandId, DAP_PACKET_COUNT, DAP_PACKET_SIZE};
    use parking_lot::Mutex;

    use super::*;
    use crate::mock::{
        dap_descriptors, host_receive, host_send, open_driver, wait_until, MockTransport, IN_EP,
        OUT_EP,
    };

    /// Engine that records every request and echoes its first two bytes
    fn recording_engine() -> (
        impl FnMut(&[u8], &mut [u8]) -> u32 + Send + 'static,
        Arc<Mutex<Vec<Vec<u8>>>>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let engine = move |req: &[u8], resp: &mut [u8]| {
            log.lock().push(req[..4].to_vec());
            resp[0] = req[0];
            resp[1] = req[1];
            2
        };
        (engine, seen)
    }

    #[test]
    fn test_response_len_truncates_and_clamps() {
        assert_eq!(response_len(0x0003_0005, 64), 5);
        assert_eq!(response_len(0x0000_0040, 64), 64);
        assert_eq!(response_len(0x0000_0041, 64), 64);
        assert_eq!(response_len(0x0001_0000, 64), 0);
    }

    #[test]
    fn test_single_packet_round_trip() {
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let mut worker = edpt.worker(engine).unwrap();

        assert!(host_send(&edpt, &mock, &[CommandId::Info as u8, 0x04]));
        assert_eq!(worker.service(), 1);

        assert_eq!(seen.lock().len(), 1);
        let sends = mock.submissions_on(IN_EP);
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].len, 2);

        assert_eq!(host_receive(&edpt, &mock), Some(vec![0x00, 0x04]));
        let status = edpt.ring_status();
        assert!(status.request.is_empty());
        assert!(status.response.is_empty());
    }

    #[test]
    fn test_requests_execute_once_in_order() {
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let mut worker = edpt.worker(engine).unwrap();

        for round in 0..5u8 {
            for i in 0..3u8 {
                assert!(host_send(&edpt, &mock, &[CommandId::Transfer as u8, round * 3 + i]));
            }
            assert_eq!(worker.service(), 3);
            for _ in 0..3 {
                assert!(host_receive(&edpt, &mock).is_some());
            }
        }

        let seqs: Vec<u8> = seen.lock().iter().map(|req| req[1]).collect();
        assert_eq!(seqs, (0..15).collect::<Vec<u8>>());
        assert_eq!(host_receive(&edpt, &mock), None);
    }

    #[test]
    fn test_responses_chain_through_in_callback() {
        let (edpt, mock) = open_driver();
        let (engine, _) = recording_engine();
        let mut worker = edpt.worker(engine).unwrap();

        for i in 0..3u8 {
            host_send(&edpt, &mock, &[CommandId::Transfer as u8, i]);
        }
        assert_eq!(worker.service(), 3);

        // The worker sent the first response; later ones queue behind it
        assert_eq!(mock.submissions_on(IN_EP).len(), 1);
        assert!(!edpt.ring_status().response.was_empty);

        assert_eq!(host_receive(&edpt, &mock), Some(vec![0x05, 0]));
        assert_eq!(mock.submissions_on(IN_EP).len(), 2);
        assert!(!edpt.ring_status().response.was_empty);

        assert_eq!(host_receive(&edpt, &mock), Some(vec![0x05, 1]));
        assert!(edpt.ring_status().response.was_empty);

        assert_eq!(host_receive(&edpt, &mock), Some(vec![0x05, 2]));
        assert_eq!(mock.submissions_on(IN_EP).len(), 3);
        assert_eq!(host_receive(&edpt, &mock), None);
    }

    #[test]
    fn test_full_ring_receive_renewed_by_worker() {
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let mut worker = edpt.worker(engine).unwrap();

        // Three packets fill the usable slots, the fourth lands in the
        // held-back slot and finds the ring full.
        for i in 0..3u8 {
            assert!(host_send(&edpt, &mock, &[CommandId::Transfer as u8, i]));
            assert!(!edpt.ring_status().request.was_full);
        }
        assert!(host_send(&edpt, &mock, &[CommandId::Transfer as u8, 3]));
        let status = edpt.ring_status().request;
        assert!(status.was_full);
        assert_eq!(status.len(), 3);
        // Initial receive plus three renewals, none for the full ring
        assert_eq!(mock.submissions_on(OUT_EP).len(), 4);
        assert!(mock.pending_on(OUT_EP).is_none());

        // Drain a single slot: the worker renews the receive exactly once
        assert!(worker.service_one());
        assert_eq!(seen.lock().len(), 1);
        let status = edpt.ring_status().request;
        assert!(!status.was_full);
        assert_eq!(status.len(), 3);
        assert_eq!(mock.submissions_on(OUT_EP).len(), 5);
        assert!(mock.pending_on(OUT_EP).is_some());
        assert_eq!(host_receive(&edpt, &mock), Some(vec![0x05, 0]));

        // The parked packet is now visible and runs after the others
        assert_eq!(worker.service(), 3);
        let seqs: Vec<u8> = seen.lock().iter().map(|req| req[1]).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_batch_relabelled_and_executed_individually() {
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let mut worker = edpt.worker(engine).unwrap();

        host_send(&edpt, &mock, &[CommandId::QueueCommands as u8, 0xA0]);
        host_send(&edpt, &mock, &[CommandId::QueueCommands as u8, 0xA1]);
        host_send(&edpt, &mock, &[CommandId::Transfer as u8, 0xA2]);
        assert_eq!(worker.service(), 3);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(&seen[0][..2], &[CommandId::ExecuteCommands as u8, 0xA0]);
        assert_eq!(&seen[1][..2], &[CommandId::ExecuteCommands as u8, 0xA1]);
        assert_eq!(&seen[2][..2], &[CommandId::Transfer as u8, 0xA2]);
    }

    #[test]
    fn test_batch_waits_for_terminator() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let edpt = Arc::new(edpt);
        edpt.spawn_worker(engine).unwrap();

        host_send(&edpt, &mock, &[CommandId::QueueCommands as u8, 1]);
        host_send(&edpt, &mock, &[CommandId::QueueCommands as u8, 2]);
        thread::sleep(Duration::from_millis(50));
        assert!(seen.lock().is_empty(), "batch must not start before its end arrives");
        // One wait per packet that left the scan on the write cursor
        let waits = edpt.ring_status().batch_waits;
        assert!((1..=2).contains(&waits), "worker woke {waits} times without the batch end");
        thread::sleep(Duration::from_millis(50));
        assert_eq!(edpt.ring_status().batch_waits, waits);

        host_send(&edpt, &mock, &[CommandId::SwjSequence as u8, 3]);
        assert!(wait_until(|| seen.lock().len() == 3));
        let ids: Vec<u8> = seen.lock().iter().map(|req| req[0]).collect();
        assert_eq!(
            ids,
            vec![
                CommandId::ExecuteCommands as u8,
                CommandId::ExecuteCommands as u8,
                CommandId::SwjSequence as u8
            ]
        );
    }

    #[test]
    fn test_reopen_mid_batch_starts_fresh_session() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let edpt = Arc::new(edpt);
        edpt.spawn_worker(engine).unwrap();

        assert!(host_send(&edpt, &mock, &[CommandId::Info as u8, 0]));
        assert!(wait_until(|| host_receive(&edpt, &mock).is_some()));

        // Leave the worker parked in the lookahead of an unfinished batch
        host_send(&edpt, &mock, &[CommandId::QueueCommands as u8, 1]);
        host_send(&edpt, &mock, &[CommandId::QueueCommands as u8, 2]);
        assert!(wait_until(|| edpt.ring_status().batch_waits >= 1));

        mock.cancel_pending();
        let desc = dap_descriptors(CLASS_VENDOR_SPECIFIC);
        assert_eq!(edpt.open(0, &desc, desc.len() as u16), desc.len() as u16);
        assert!(host_send(&edpt, &mock, &[CommandId::Transfer as u8, 0x33]));

        let mut reply = None;
        assert!(wait_until(|| {
            reply = host_receive(&edpt, &mock);
            reply.is_some()
        }));
        assert_eq!(reply, Some(vec![CommandId::Transfer as u8, 0x33]));

        thread::sleep(Duration::from_millis(50));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2, "old batch must not run after the reopen");
        assert_eq!(&seen[1][..2], &[CommandId::Transfer as u8, 0x33]);
        let status = edpt.ring_status().request;
        assert_eq!((status.write_cursor, status.read_cursor), (1, 1));
    }

    #[test]
    fn test_batch_larger_than_ring_does_not_stall() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (edpt, mock) = open_driver();
        let (engine, seen) = recording_engine();
        let edpt = Arc::new(edpt);
        edpt.spawn_worker(engine).unwrap();

        let host_edpt = Arc::clone(&edpt);
        let host_mock = mock.clone();
        let host = thread::spawn(move || {
            let mut sent = 0u8;
            let mut received = 0;
            while received < 6 {
                if sent < 6 {
                    let id = if sent < 5 { CommandId::QueueCommands } else { CommandId::Transfer };
                    if host_send(&host_edpt, &host_mock, &[id as u8, sent]) {
                        sent += 1;
                    }
                }
                if host_receive(&host_edpt, &host_mock).is_some() {
                    received += 1;
                }
                thread::yield_now();
            }
        });

        assert!(wait_until(|| host.is_finished()));
        let seqs: Vec<u8> = seen.lock().iter().map(|req| req[1]).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_threaded_pipeline_with_default_geometry() {
        let mock = MockTransport::default();
        let edpt = Arc::new(crate::mock::open_with::<DAP_PACKET_COUNT, DAP_PACKET_SIZE>(&mock));
        let (engine, seen) = recording_engine();
        edpt.spawn_worker(engine).unwrap();

        let mut sent = 0u8;
        let mut replies = Vec::new();
        while replies.len() < 40 {
            if sent < 40 && host_send(&edpt, &mock, &[CommandId::Transfer as u8, sent]) {
                sent += 1;
            }
            if let Some(reply) = host_receive(&edpt, &mock) {
                replies.push(reply[1]);
            }
            thread::yield_now();
        }

        assert_eq!(replies, (0..40).collect::<Vec<u8>>());
        assert_eq!(seen.lock().len(), 40);
        let status = edpt.ring_status();
        assert!(status.request.len() < DAP_PACKET_COUNT);
    }
}
