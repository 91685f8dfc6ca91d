//! Port enumeration seam.
//!
//! Listing serial ports or network adapters is platform work left to the
//! application; transports only consume the result.

use serde::{Deserialize, Serialize};
use servolink_errors::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortInfo {
    /// Name used to open the port, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    pub description: Option<String>,
}

impl PortInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortInfo>>;
}
