//! Interface lifecycle and the class driver entry points.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dap_shared::{
    ClassDriver, CommandEngine, ControlRequest, ControlStage, DescriptorError, Direction,
    EndpointAddress, EndpointTransport, InterfaceBlock, InterfaceDescriptor, RingSnapshot,
    XferResult, DAP_PACKET_COUNT, DAP_PACKET_SIZE,
};
use log::{debug, info, trace, warn};

use crate::config::DriverConfig;
use crate::error::{EdptError, EdptResult};
use crate::state::{Endpoints, Shared};
use crate::worker::CommandWorker;

/// Cursor and flag snapshot of both rings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub request: RingSnapshot,
    pub response: RingSnapshot,
    /// Times the worker has blocked waiting for the end of a batch
    pub batch_waits: u32,
}

/// CMSIS-DAP bulk endpoint class driver
///
/// Owns both packet rings, the lock around their cursors and the transport.
/// `N` slots of `SIZE` bytes per ring; `N` must be a power of two.
pub struct DapEdpt<
    T: EndpointTransport,
    const N: usize = DAP_PACKET_COUNT,
    const SIZE: usize = DAP_PACKET_SIZE,
> {
    shared: Arc<Shared<T, N, SIZE>>,
    config: DriverConfig,
}

impl<T: EndpointTransport, const N: usize, const SIZE: usize> DapEdpt<T, N, SIZE> {
    pub fn new(transport: T, config: DriverConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(transport)),
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Build the command worker around `engine`
    ///
    /// Run it with [`CommandWorker::run`] on a context that may block. There
    /// is at most one worker per driver; a second call fails with
    /// [`EdptError::WorkerTaken`] until the first worker is dropped.
    pub fn worker<E: CommandEngine>(
        &self,
        engine: E,
    ) -> EdptResult<CommandWorker<T, E, N, SIZE>> {
        {
            let mut state = self.shared.state.lock();
            if state.worker_taken {
                return Err(EdptError::WorkerTaken);
            }
            state.worker_taken = true;
        }
        Ok(CommandWorker::new(Arc::clone(&self.shared), engine))
    }

    /// Start the command worker on its own thread
    pub fn spawn_worker<E>(&self, engine: E) -> EdptResult<JoinHandle<()>>
    where
        T: Send + Sync + 'static,
        T::Handle: Send,
        E: CommandEngine + Send + 'static,
    {
        let worker = self.worker(engine)?;
        let handle = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || {
                worker.run();
            })?;
        Ok(handle)
    }

    /// Snapshot both rings' cursors and flags
    pub fn ring_status(&self) -> RingStatus {
        let state = self.shared.state.lock();
        RingStatus {
            request: state.request.snapshot(),
            response: state.response.snapshot(),
            batch_waits: state.batch_waits,
        }
    }

    /// Interface number claimed by the last successful `open`
    pub fn interface_number(&self) -> Option<u8> {
        let state = self.shared.state.lock();
        state.endpoints.is_some().then_some(state.itf_num)
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().endpoints.is_some()
    }

    fn try_open(&self, descriptors: &[u8], max_len: u16) -> EdptResult<u16> {
        let itf = InterfaceDescriptor::parse(descriptors)?;
        if !self.config.interface.matches(&itf) {
            return Err(DescriptorError::ClassMismatch {
                class: itf.interface_class,
                subclass: itf.interface_subclass,
                protocol: itf.interface_protocol,
            }
            .into());
        }

        let drv_len = itf.driver_len();
        if max_len < drv_len {
            return Err(DescriptorError::BufferTooSmall {
                required: drv_len,
                available: max_len,
            }
            .into());
        }

        let block = InterfaceBlock::parse(descriptors)?;
        let (out_desc, in_desc) = block.bulk_pair()?;
        let out_handle = self.shared.transport.open_endpoint(&out_desc)?;
        let in_handle = self.shared.transport.open_endpoint(&in_desc)?;

        let primed = {
            let mut state = self.shared.state.lock();
            state.reset_rings();
            state.itf_num = itf.interface_number;
            state.endpoints = Some(Endpoints {
                out_addr: out_desc.address,
                out_handle,
                in_addr: in_desc.address,
                in_handle,
            });

            // The OUT endpoint needs a buffer before the host can send
            // anything. The IN endpoint stays idle until the worker has a
            // response.
            let primed = self.shared.prime_receive(&state);
            if primed.is_err() {
                state.endpoints = None;
            }
            primed
        };
        // A worker parked on the old session has to rescan
        self.shared.notify_worker(true);
        primed?;

        info!(
            "DAP interface {} open: OUT ep{} IN ep{}",
            itf.interface_number,
            out_desc.address.number(),
            in_desc.address.number()
        );
        Ok(drv_len)
    }

    fn complete(&self, ep: EndpointAddress, result: XferResult, bytes: u32) -> EdptResult<()> {
        if result != XferResult::Success {
            debug!("transfer on {} finished with {:?}", ep, result);
        }
        match ep.direction() {
            Direction::Out => self.shared.complete_out(ep, bytes),
            Direction::In => self.shared.complete_in(ep, bytes),
        }
    }
}

impl<T: EndpointTransport, const N: usize, const SIZE: usize> ClassDriver for DapEdpt<T, N, SIZE> {
    const NAME: &'static str = "DAP ENDPOINT";

    fn init(&self) {
        self.shared.state.lock().reset_rings();
        self.shared.notify_worker(true);
        debug!("{} init", Self::NAME);
    }

    fn deinit(&self) -> bool {
        {
            let mut state = self.shared.state.lock();
            state.reset_rings();
            state.request.clear();
            state.response.clear();
            state.endpoints = None;
            // SAFETY: the stack calls deinit after closing the endpoints, so
            // no transfer is pending, and the worker has nothing unread to
            // touch.
            unsafe {
                self.shared.requests.zero();
                self.shared.responses.zero();
            }
        }
        self.shared.notify_worker(true);
        info!("{} deinit", Self::NAME);
        true
    }

    fn reset(&self, rhport: u8) {
        self.shared.state.lock().itf_num = 0;
        info!("{} reset on port {}", Self::NAME, rhport);
    }

    fn open(&self, rhport: u8, descriptors: &[u8], max_len: u16) -> u16 {
        match self.try_open(descriptors, max_len) {
            Ok(len) => len,
            Err(EdptError::Descriptor(e @ DescriptorError::ClassMismatch { .. })) => {
                debug!("port {}: {}", rhport, e);
                0
            }
            Err(e) => {
                warn!("port {}: DAP interface rejected: {}", rhport, e);
                0
            }
        }
    }

    fn control_xfer_cb(&self, _rhport: u8, stage: ControlStage, request: &ControlRequest) -> bool {
        trace!("declining control request {:?} at {:?}", request, stage);
        false
    }

    fn xfer_cb(
        &self,
        _rhport: u8,
        ep_addr: EndpointAddress,
        result: XferResult,
        xferred_bytes: u32,
    ) -> bool {
        match self.complete(ep_addr, result, xferred_bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("completion rejected: {}", e);
                false
            }
        }
    }
}
