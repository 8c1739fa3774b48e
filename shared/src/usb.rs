//! # USB Descriptor and Transfer Types
//!
//! The subset of USB 2.0 chapter 9 the DAP interface needs: interface and
//! endpoint descriptors as handed to a class driver's `open`, endpoint
//! addresses, control requests and transfer completion codes.
//!
//! Descriptors are parsed from the raw configuration descriptor bytes,
//! starting at the interface descriptor. Endpoint descriptors are expected
//! to follow it back to back.

use core::fmt;

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Descriptor type code of an interface descriptor
pub const DESC_TYPE_INTERFACE: u8 = 0x04;
/// Descriptor type code of an endpoint descriptor
pub const DESC_TYPE_ENDPOINT: u8 = 0x05;

/// Vendor-specific interface class
pub const CLASS_VENDOR_SPECIFIC: u8 = 0xFF;

/// Most endpoints a DAP interface descriptor may declare
pub const MAX_INTERFACE_ENDPOINTS: usize = 4;

/// Transfer direction, relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Endpoint address as it appears in `bEndpointAddress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    const DIR_IN: u8 = 0x80;

    pub const fn new(number: u8, direction: Direction) -> Self {
        match direction {
            Direction::Out => Self(number & 0x0F),
            Direction::In => Self((number & 0x0F) | Self::DIR_IN),
        }
    }

    #[inline]
    pub const fn direction(self) -> Direction {
        if self.0 & Self::DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    #[inline]
    pub const fn number(self) -> u8 {
        self.0 & 0x0F
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Errors while parsing or matching descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorError {
    /// Descriptor bytes end before the descriptor does
    TooShort,
    /// `bDescriptorType` is not the expected one
    WrongType { expected: u8, found: u8 },
    /// Class, subclass or protocol differ from the DAP interface
    ClassMismatch { class: u8, subclass: u8, protocol: u8 },
    /// The caller's descriptor budget cannot hold interface plus endpoints
    BufferTooSmall { required: u16, available: u16 },
    /// More endpoints than a DAP interface uses
    TooManyEndpoints(u8),
    /// No bulk endpoint in the given direction
    MissingEndpoint(Direction),
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::TooShort => f.write_str("descriptor truncated"),
            DescriptorError::WrongType { expected, found } => {
                write!(f, "descriptor type {found:#04x}, expected {expected:#04x}")
            }
            DescriptorError::ClassMismatch { class, subclass, protocol } => write!(
                f,
                "interface {class:#04x}/{subclass:#04x}/{protocol:#04x} is not a DAP interface"
            ),
            DescriptorError::BufferTooSmall { required, available } => {
                write!(f, "descriptor needs {required} bytes, {available} available")
            }
            DescriptorError::TooManyEndpoints(n) => write!(f, "{n} endpoints declared"),
            DescriptorError::MissingEndpoint(dir) => write!(f, "no {dir:?} endpoint"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DescriptorError {}

/// Standard interface descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterfaceDescriptor {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_string: u8,
}

impl InterfaceDescriptor {
    /// Encoded size in bytes
    pub const LEN: usize = 9;

    /// Parse from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < Self::LEN {
            return Err(DescriptorError::TooShort);
        }
        if bytes[1] != DESC_TYPE_INTERFACE {
            return Err(DescriptorError::WrongType {
                expected: DESC_TYPE_INTERFACE,
                found: bytes[1],
            });
        }
        Ok(Self {
            interface_number: bytes[2],
            alternate_setting: bytes[3],
            num_endpoints: bytes[4],
            interface_class: bytes[5],
            interface_subclass: bytes[6],
            interface_protocol: bytes[7],
            interface_string: bytes[8],
        })
    }

    /// Encode into the 9-byte wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [
            Self::LEN as u8,
            DESC_TYPE_INTERFACE,
            self.interface_number,
            self.alternate_setting,
            self.num_endpoints,
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            self.interface_string,
        ]
    }

    /// Bytes a driver consumes: this descriptor plus its endpoints
    pub const fn driver_len(&self) -> u16 {
        (Self::LEN + self.num_endpoints as usize * EndpointDescriptor::LEN) as u16
    }
}

/// Standard endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub attributes: u8,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Encoded size in bytes
    pub const LEN: usize = 7;

    /// Bulk transfer type in `bmAttributes`
    pub const ATTR_BULK: u8 = 0x02;

    /// Describe a bulk endpoint
    pub const fn bulk(address: EndpointAddress, max_packet_size: u16) -> Self {
        Self {
            address,
            attributes: Self::ATTR_BULK,
            max_packet_size,
            interval: 0,
        }
    }

    /// Parse from the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() < Self::LEN {
            return Err(DescriptorError::TooShort);
        }
        if bytes[1] != DESC_TYPE_ENDPOINT {
            return Err(DescriptorError::WrongType {
                expected: DESC_TYPE_ENDPOINT,
                found: bytes[1],
            });
        }
        Ok(Self {
            address: EndpointAddress(bytes[2]),
            attributes: bytes[3],
            max_packet_size: u16::from_le_bytes([bytes[4], bytes[5]]),
            interval: bytes[6],
        })
    }

    /// Encode into the 7-byte wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mps = self.max_packet_size.to_le_bytes();
        [
            Self::LEN as u8,
            DESC_TYPE_ENDPOINT,
            self.address.0,
            self.attributes,
            mps[0],
            mps[1],
            self.interval,
        ]
    }

    #[inline]
    pub const fn direction(&self) -> Direction {
        self.address.direction()
    }
}

/// An interface descriptor with the endpoint descriptors that follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBlock {
    pub interface: InterfaceDescriptor,
    pub endpoints: Vec<EndpointDescriptor, MAX_INTERFACE_ENDPOINTS>,
}

impl InterfaceBlock {
    /// Parse an interface descriptor and its trailing endpoint descriptors
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let interface = InterfaceDescriptor::parse(bytes)?;
        if interface.num_endpoints as usize > MAX_INTERFACE_ENDPOINTS {
            return Err(DescriptorError::TooManyEndpoints(interface.num_endpoints));
        }

        let mut endpoints = Vec::new();
        let mut rest = &bytes[InterfaceDescriptor::LEN..];
        for _ in 0..interface.num_endpoints {
            let endpoint = EndpointDescriptor::parse(rest)?;
            // Capacity was checked against num_endpoints above
            let _ = endpoints.push(endpoint);
            rest = &rest[EndpointDescriptor::LEN..];
        }

        Ok(Self { interface, endpoints })
    }

    /// First OUT and first IN endpoint, in that order
    pub fn bulk_pair(&self) -> Result<(EndpointDescriptor, EndpointDescriptor), DescriptorError> {
        let find = |dir: Direction| {
            self.endpoints
                .iter()
                .find(|ep| ep.direction() == dir)
                .copied()
                .ok_or(DescriptorError::MissingEndpoint(dir))
        };
        Ok((find(Direction::Out)?, find(Direction::In)?))
    }
}

/// Completion status reported with a finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferResult {
    Success,
    Failed,
    Stalled,
    Timeout,
    Invalid,
}

/// Stage of a control transfer a class driver is called for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlStage {
    Setup,
    Data,
    Ack,
}

/// Eight-byte SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    pub fn from_bytes(setup: &[u8; 8]) -> Self {
        Self {
            request_type: setup[0],
            request: setup[1],
            value: u16::from_le_bytes([setup[2], setup[3]]),
            index: u16::from_le_bytes([setup[4], setup[5]]),
            length: u16::from_le_bytes([setup[6], setup[7]]),
        }
    }
}
