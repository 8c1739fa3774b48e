//! Driver configuration.
//!
//! Packet size and ring depth are compile-time parameters of
//! [`DapEdpt`](crate::DapEdpt); everything that may differ between probe
//! builds lives here and can be loaded from JSON.

use dap_shared::EdptConfig;
use serde::{Deserialize, Serialize};

use crate::error::EdptResult;

/// Configuration of the endpoint driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Interface identity to claim in `open`
    pub interface: EdptConfig,
    /// Name given to the command worker thread
    pub worker_name: String,
}

impl DriverConfig {
    /// Parse a configuration, defaulting every missing field
    pub fn from_json(json: &str) -> EdptResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interface: EdptConfig::default(),
            worker_name: "dap-worker".into(),
        }
    }
}
