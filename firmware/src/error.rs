use dap_shared::{BufferError, DescriptorError, EndpointAddress, TransportError};
use thiserror::Error;

/// Errors that can occur in the endpoint driver
#[derive(Error, Debug)]
pub enum EdptError {
    #[error("completion on {ep} reported {bytes} bytes, packet size is {max}")]
    TransferLength {
        ep: EndpointAddress,
        bytes: u32,
        max: usize,
    },
    #[error("completion on {0}, which the interface does not own")]
    UnknownEndpoint(EndpointAddress),
    #[error("interface is not open")]
    NotOpen,
    #[error("a command worker already exists for this driver")]
    WorkerTaken,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("ring error: {0}")]
    Ring(#[from] BufferError),
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type alias for driver operations
pub type EdptResult<T> = Result<T, EdptError>;
