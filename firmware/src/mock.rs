//! Mock USB transport and host helpers for tests.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dap_shared::usb::CLASS_VENDOR_SPECIFIC;
use dap_shared::{
    ClassDriver, Direction, EndpointAddress, EndpointDescriptor, EndpointTransport,
    InterfaceDescriptor, TransportError, TransportResult, XferResult,
};
use parking_lot::Mutex;

use crate::{DapEdpt, DriverConfig};

pub(crate) const OUT_EP: EndpointAddress = EndpointAddress::new(1, Direction::Out);
pub(crate) const IN_EP: EndpointAddress = EndpointAddress::new(1, Direction::In);

pub(crate) type TestEdpt = DapEdpt<MockTransport, 4, 64>;

/// One `submit_transfer` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Submission {
    pub ep: EndpointAddress,
    addr: usize,
    pub len: u16,
}

impl Submission {
    /// Play the controller receiving `data` into the buffer
    ///
    /// # Safety
    ///
    /// The transfer must still be pending.
    pub unsafe fn fill(&self, data: &[u8]) {
        assert!(data.len() <= self.len as usize);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.addr as *mut u8, data.len());
    }

    /// Play the controller reading the buffer out
    ///
    /// # Safety
    ///
    /// The transfer must still be pending.
    pub unsafe fn read(&self) -> Vec<u8> {
        std::slice::from_raw_parts(self.addr as *const u8, self.len as usize).to_vec()
    }
}

#[derive(Default)]
struct MockInner {
    opened: Vec<EndpointDescriptor>,
    submissions: Vec<Submission>,
    pending: VecDeque<Submission>,
    fail_submit: Option<TransportError>,
}

/// Transport that records calls; clones share the same record
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn opened(&self) -> Vec<EndpointDescriptor> {
        self.inner.lock().opened.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().submissions.clone()
    }

    pub fn submissions_on(&self, ep: EndpointAddress) -> Vec<Submission> {
        self.submissions().into_iter().filter(|s| s.ep == ep).collect()
    }

    /// Transfer queued on `ep` that has not completed yet
    pub fn pending_on(&self, ep: EndpointAddress) -> Option<Submission> {
        self.inner.lock().pending.iter().find(|s| s.ep == ep).copied()
    }

    fn take_pending(&self, ep: EndpointAddress) -> Option<Submission> {
        let mut inner = self.inner.lock();
        let pos = inner.pending.iter().position(|s| s.ep == ep)?;
        inner.pending.remove(pos)
    }

    /// Drop every pending transfer, as a bus reset does
    pub fn cancel_pending(&self) {
        self.inner.lock().pending.clear();
    }

    pub fn set_fail_submit(&self, error: Option<TransportError>) {
        self.inner.lock().fail_submit = error;
    }
}

impl EndpointTransport for MockTransport {
    type Handle = EndpointAddress;

    fn open_endpoint(&self, descriptor: &EndpointDescriptor) -> TransportResult<EndpointAddress> {
        self.inner.lock().opened.push(*descriptor);
        Ok(descriptor.address)
    }

    unsafe fn submit_transfer(
        &self,
        handle: EndpointAddress,
        buffer: NonNull<u8>,
        len: u16,
    ) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.fail_submit {
            return Err(e);
        }
        let sub = Submission {
            ep: handle,
            addr: buffer.as_ptr() as usize,
            len,
        };
        inner.submissions.push(sub);
        inner.pending.push_back(sub);
        Ok(())
    }
}

/// Interface descriptor number 2 with the OUT/IN bulk pair
pub(crate) fn dap_descriptors(class: u8) -> Vec<u8> {
    let itf = InterfaceDescriptor {
        interface_number: 2,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: class,
        interface_subclass: 0,
        interface_protocol: 0,
        interface_string: 0,
    };
    let mut bytes = itf.to_bytes().to_vec();
    bytes.extend_from_slice(&EndpointDescriptor::bulk(OUT_EP, 64).to_bytes());
    bytes.extend_from_slice(&EndpointDescriptor::bulk(IN_EP, 64).to_bytes());
    bytes
}

pub(crate) fn open_with<const N: usize, const SIZE: usize>(
    mock: &MockTransport,
) -> DapEdpt<MockTransport, N, SIZE> {
    let edpt = DapEdpt::new(mock.clone(), DriverConfig::default());
    edpt.init();
    let desc = dap_descriptors(CLASS_VENDOR_SPECIFIC);
    assert_eq!(edpt.open(0, &desc, desc.len() as u16), desc.len() as u16);
    edpt
}

/// Driver with four 64-byte slots per ring, interface already open
pub(crate) fn open_driver() -> (TestEdpt, MockTransport) {
    let mock = MockTransport::default();
    (open_with(&mock), mock)
}

/// Host sends `packet`; false when no receive is pending
pub(crate) fn host_send<const N: usize, const SIZE: usize>(
    edpt: &DapEdpt<MockTransport, N, SIZE>,
    mock: &MockTransport,
    packet: &[u8],
) -> bool {
    let Some(sub) = mock.take_pending(OUT_EP) else {
        return false;
    };
    unsafe { sub.fill(packet) };
    assert!(edpt.xfer_cb(0, OUT_EP, XferResult::Success, packet.len() as u32));
    true
}

/// Host reads the pending response, if one is being sent
pub(crate) fn host_receive<const N: usize, const SIZE: usize>(
    edpt: &DapEdpt<MockTransport, N, SIZE>,
    mock: &MockTransport,
) -> Option<Vec<u8>> {
    let sub = mock.take_pending(IN_EP)?;
    let bytes = unsafe { sub.read() };
    assert!(edpt.xfer_cb(0, IN_EP, XferResult::Success, sub.len as u32));
    Some(bytes)
}

/// Poll `cond` for up to five seconds
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
