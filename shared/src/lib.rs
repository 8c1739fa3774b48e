//! # Shared DAP Transport Library
//!
//! This crate provides the core abstractions for the CMSIS-DAP bulk endpoint
//! transport of a USB debug probe:
//!
//! - **Packet Rings**: Fixed-slot circular buffers for requests and responses
//! - **Protocol**: CMSIS-DAP command identifiers and packet geometry
//! - **USB Types**: Interface/endpoint descriptors and completion results
//! - **Traits**: The USB transport and the DAP command engine the driver talks to
//!
//! ## Architecture
//!
//! ```text
//! OUT Endpoint ─────► Request Ring ─────► Command Engine
//!                                               │
//!                                               ▼
//! IN Endpoint  ◄───── Response Ring ◄───────────┘
//! ```
//!
//! The rings are split in two halves: [`RingState`] carries the cursors and
//! sticky flags (always mutated under one lock), while [`PacketSlots`] carries
//! the payload bytes, which the USB controller reads and writes directly.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod buffer;
pub mod protocol;
pub mod traits;
pub mod usb;

// Re-export main types for convenience
pub use buffer::{BufferError, PacketSlots, RingSnapshot, RingState};
pub use protocol::{CommandId, CommandLabel, DAP_PACKET_COUNT, DAP_PACKET_SIZE};
pub use traits::{
    ClassDriver, CommandEngine, EdptConfig, EndpointTransport, TransportError, TransportResult,
};
pub use usb::{
    ControlRequest, ControlStage, DescriptorError, Direction, EndpointAddress, EndpointDescriptor,
    InterfaceBlock, InterfaceDescriptor, XferResult,
};

/// Library version for protocol compatibility checks
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
