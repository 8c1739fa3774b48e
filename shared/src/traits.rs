//! # Transport, Engine & Class Driver Abstractions
//!
//! This module defines the seams between the DAP endpoint driver and the
//! code around it:
//!
//! - **[`EndpointTransport`]**: the USB device stack's endpoint primitives
//! - **[`CommandEngine`]**: the DAP interpreter executing one packet
//! - **[`ClassDriver`]**: the entry points a USB stack calls on a class driver
//!
//! ## Design Rationale
//!
//! Keeping the USB stack and the interpreter behind traits lets the ring
//! protocol be driven by a mock transport in tests and by a real controller
//! driver on target, without changing the driver logic.

use core::fmt;
use core::ptr::NonNull;

use serde::{Deserialize, Serialize};

use crate::usb::{
    ControlRequest, ControlStage, EndpointAddress, EndpointDescriptor, InterfaceDescriptor,
    XferResult, CLASS_VENDOR_SPECIFIC,
};

/// Errors reported by the USB transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// The device is not configured or was detached
    Disconnected,
    /// A transfer is already pending on the endpoint
    EndpointBusy,
    /// The endpoint was never opened or does not exist
    InvalidEndpoint,
    /// The endpoint is halted
    Stalled,
    /// Any other controller-level failure
    UsbError,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TransportError::Disconnected => "device disconnected",
            TransportError::EndpointBusy => "endpoint busy",
            TransportError::InvalidEndpoint => "invalid endpoint",
            TransportError::Stalled => "endpoint stalled",
            TransportError::UsbError => "usb controller error",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TransportError {}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Endpoint primitives of a USB device stack
///
/// Every successful [`submit_transfer`](Self::submit_transfer) must be
/// followed by exactly one completion delivered to the class driver's
/// `xfer_cb`, otherwise the ring protocol stalls. Completions must not be
/// delivered from inside `submit_transfer` itself: the driver submits while
/// holding its lock.
pub trait EndpointTransport {
    /// Token identifying an opened endpoint
    type Handle: Copy + fmt::Debug;

    /// Open an endpoint described by `descriptor`
    fn open_endpoint(&self, descriptor: &EndpointDescriptor) -> TransportResult<Self::Handle>;

    /// Start an asynchronous transfer of `len` bytes
    ///
    /// For an OUT endpoint the controller writes received bytes to `buffer`,
    /// for an IN endpoint it sends `len` bytes from `buffer`.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for reads and writes of `len` bytes until the
    /// matching completion is delivered, and nothing else may write it in
    /// the meantime.
    unsafe fn submit_transfer(
        &self,
        handle: Self::Handle,
        buffer: NonNull<u8>,
        len: u16,
    ) -> TransportResult<()>;
}

/// The DAP command interpreter
///
/// `execute` reads one request packet and writes the response into
/// `response`. The return value carries the response length in its low 16
/// bits; anything above is ignored.
pub trait CommandEngine {
    fn execute(&mut self, request: &[u8], response: &mut [u8]) -> u32;
}

impl<F> CommandEngine for F
where
    F: FnMut(&[u8], &mut [u8]) -> u32,
{
    fn execute(&mut self, request: &[u8], response: &mut [u8]) -> u32 {
        self(request, response)
    }
}

/// Entry points a USB device stack calls on a class driver
///
/// All methods take `&self` because completions arrive from the controller's
/// context while the worker runs elsewhere.
pub trait ClassDriver {
    /// Name shown in stack debug output
    const NAME: &'static str;

    /// Prepare driver state before enumeration
    fn init(&self);

    /// Tear the driver state down; returns `true` when done
    fn deinit(&self) -> bool;

    /// Bus reset on root hub port `rhport`
    fn reset(&self, rhport: u8);

    /// Claim the interface starting at `descriptors`
    ///
    /// Returns the number of descriptor bytes consumed, or 0 when the
    /// interface is not ours or does not fit in `max_len`.
    fn open(&self, rhport: u8, descriptors: &[u8], max_len: u16) -> u16;

    /// Handle a control request addressed to the interface
    fn control_xfer_cb(&self, rhport: u8, stage: ControlStage, request: &ControlRequest) -> bool;

    /// Handle completion of a transfer on one of the driver's endpoints
    fn xfer_cb(
        &self,
        rhport: u8,
        ep_addr: EndpointAddress,
        result: XferResult,
        xferred_bytes: u32,
    ) -> bool;
}

/// Interface identity the endpoint driver claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct EdptConfig {
    /// Expected `bInterfaceClass`
    pub interface_class: u8,
    /// Expected `bInterfaceSubClass`
    pub interface_subclass: u8,
    /// Expected `bInterfaceProtocol`
    pub interface_protocol: u8,
}

impl EdptConfig {
    /// Check whether an interface descriptor is the DAP interface
    pub fn matches(&self, itf: &InterfaceDescriptor) -> bool {
        itf.interface_class == self.interface_class
            && itf.interface_subclass == self.interface_subclass
            && itf.interface_protocol == self.interface_protocol
    }
}

impl Default for EdptConfig {
    fn default() -> Self {
        Self {
            interface_class: CLASS_VENDOR_SPECIFIC,
            interface_subclass: 0x00,
            interface_protocol: 0x00,
        }
    }
}
