//! # CMSIS-DAP Packet Definitions
//!
//! This module defines the packet geometry and the command identifiers of
//! the CMSIS-DAP v2 bulk protocol.
//!
//! ## Packet Format
//!
//! ```text
//! ┌────────────┬──────────────────────────────────────────┐
//! │ Command ID │          Command-specific payload        │
//! │   1 byte   │   up to DAP_PACKET_SIZE - 1 bytes        │
//! └────────────┴──────────────────────────────────────────┘
//! ```
//!
//! One packet travels per bulk transfer in either direction. A response
//! echoes the command identifier in its first byte.
//!
//! ## Atomic Commands
//!
//! A packet whose identifier is [`CommandId::QueueCommands`] belongs to a
//! batch ending at the next packet with any other identifier. The endpoint
//! worker relabels queued packets to [`CommandId::ExecuteCommands`] before
//! handing them to the engine.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Bytes per DAP packet, shared by both directions
///
/// Matches the full-speed bulk endpoint size.
pub const DAP_PACKET_SIZE: usize = 64;

/// Slots per packet ring (one is held back, so 7 packets can be buffered)
pub const DAP_PACKET_COUNT: usize = 8;

/// CMSIS-DAP command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandId {
    Info = 0x00,
    HostStatus = 0x01,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    TransferBlock = 0x06,
    TransferAbort = 0x07,
    WriteAbort = 0x08,
    Delay = 0x09,
    ResetTarget = 0x0A,
    SwjPins = 0x10,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
    JtagSequence = 0x14,
    JtagConfigure = 0x15,
    JtagIdcode = 0x16,
    SwoTransport = 0x17,
    SwoMode = 0x18,
    SwoBaudrate = 0x19,
    SwoControl = 0x1A,
    SwoStatus = 0x1B,
    SwoData = 0x1C,
    SwdSequence = 0x1D,
    SwoExtendedStatus = 0x1E,
    /// Queue the packet as part of an atomic batch
    QueueCommands = 0x7E,
    /// Execute the packet immediately
    ExecuteCommands = 0x7F,
}

impl CommandId {
    /// Name used in command traces
    pub const fn name(self) -> &'static str {
        match self {
            CommandId::Info => "DAP_Info",
            CommandId::HostStatus => "DAP_HostStatus",
            CommandId::Connect => "DAP_Connect",
            CommandId::Disconnect => "DAP_Disconnect",
            CommandId::TransferConfigure => "DAP_TransferConfigure",
            CommandId::Transfer => "DAP_Transfer",
            CommandId::TransferBlock => "DAP_TransferBlock",
            CommandId::TransferAbort => "DAP_TransferAbort",
            CommandId::WriteAbort => "DAP_WriteABORT",
            CommandId::Delay => "DAP_Delay",
            CommandId::ResetTarget => "DAP_ResetTarget",
            CommandId::SwjPins => "DAP_SWJ_Pins",
            CommandId::SwjClock => "DAP_SWJ_Clock",
            CommandId::SwjSequence => "DAP_SWJ_Sequence",
            CommandId::SwdConfigure => "DAP_SWD_Configure",
            CommandId::JtagSequence => "DAP_JTAG_Sequence",
            CommandId::JtagConfigure => "DAP_JTAG_Configure",
            CommandId::JtagIdcode => "DAP_JTAG_IDCODE",
            CommandId::SwoTransport => "DAP_SWO_Transport",
            CommandId::SwoMode => "DAP_SWO_Mode",
            CommandId::SwoBaudrate => "DAP_SWO_Baudrate",
            CommandId::SwoControl => "DAP_SWO_Control",
            CommandId::SwoStatus => "DAP_SWO_Status",
            CommandId::SwoData => "DAP_SWO_Data",
            CommandId::SwdSequence => "DAP_SWD_Sequence",
            CommandId::SwoExtendedStatus => "DAP_SWO_ExtendedStatus",
            CommandId::QueueCommands => "DAP_QueueCommands",
            CommandId::ExecuteCommands => "DAP_ExecuteCommands",
        }
    }
}

impl TryFrom<u8> for CommandId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Info),
            0x01 => Ok(Self::HostStatus),
            0x02 => Ok(Self::Connect),
            0x03 => Ok(Self::Disconnect),
            0x04 => Ok(Self::TransferConfigure),
            0x05 => Ok(Self::Transfer),
            0x06 => Ok(Self::TransferBlock),
            0x07 => Ok(Self::TransferAbort),
            0x08 => Ok(Self::WriteAbort),
            0x09 => Ok(Self::Delay),
            0x0A => Ok(Self::ResetTarget),
            0x10 => Ok(Self::SwjPins),
            0x11 => Ok(Self::SwjClock),
            0x12 => Ok(Self::SwjSequence),
            0x13 => Ok(Self::SwdConfigure),
            0x14 => Ok(Self::JtagSequence),
            0x15 => Ok(Self::JtagConfigure),
            0x16 => Ok(Self::JtagIdcode),
            0x17 => Ok(Self::SwoTransport),
            0x18 => Ok(Self::SwoMode),
            0x19 => Ok(Self::SwoBaudrate),
            0x1A => Ok(Self::SwoControl),
            0x1B => Ok(Self::SwoStatus),
            0x1C => Ok(Self::SwoData),
            0x1D => Ok(Self::SwdSequence),
            0x1E => Ok(Self::SwoExtendedStatus),
            0x7E => Ok(Self::QueueCommands),
            0x7F => Ok(Self::ExecuteCommands),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Printable label for a raw identifier byte
///
/// Vendor commands and garbage print as hex instead of a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLabel(pub u8);

impl CommandLabel {
    /// Label for the first byte of a packet (empty packets read as `Info`)
    pub fn of(packet: &[u8]) -> Self {
        Self(packet.first().copied().unwrap_or(CommandId::Info as u8))
    }
}

impl fmt::Display for CommandLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match CommandId::try_from(self.0) {
            Ok(id) => f.write_str(id.name()),
            Err(()) => write!(f, "DAP_Unknown({:#04x})", self.0),
        }
    }
}
