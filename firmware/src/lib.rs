//! # DAP Endpoint Driver
//!
//! This crate is the command transport of a CMSIS-DAP v2 debug probe. It
//! moves packets between a USB bulk endpoint pair and the DAP command
//! engine:
//!
//! - **Completion callbacks**: the USB stack reports finished transfers
//!   through [`ClassDriver::xfer_cb`](dap_shared::ClassDriver::xfer_cb)
//! - **Command worker**: [`CommandWorker`] executes requests and queues
//!   responses
//! - **Lifecycle**: [`DapEdpt`] claims the interface and owns the rings
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              DapEdpt                             │
//! │                                                                  │
//! │   OUT complete ──► Request Ring ──► CommandWorker ──► Engine     │
//! │        ▲   (was_full)                    │                       │
//! │        └──── renew receive ◄─────────────┤                       │
//! │                                          ▼                       │
//! │   IN complete ◄── Response Ring ◄── response + length            │
//! │        │   (was_empty)                                           │
//! │        └──── send next response                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both rings' cursors sit behind one `parking_lot` mutex. The callbacks
//! never wait on anything but that lock; the worker blocks on two condition
//! variables, one for new work and one for the end of a `QueueCommands`
//! batch.
//!
//! ## Example
//!
//! ```ignore
//! let edpt = Arc::new(DapEdpt::new(usb, DriverConfig::default()));
//! edpt.spawn_worker(|req: &[u8], resp: &mut [u8]| dap.execute(req, resp))?;
//! usb_stack.register(edpt.clone());
//! ```

mod callbacks;
pub mod config;
mod driver;
pub mod error;
#[cfg(test)]
mod mock;
mod state;
pub mod worker;

pub use config::DriverConfig;
pub use driver::{DapEdpt, RingStatus};
pub use error::{EdptError, EdptResult};
pub use worker::CommandWorker;

pub use dap_shared as shared;
