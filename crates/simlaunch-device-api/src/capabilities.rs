//! Device adapter capabilities model

use serde::{Deserialize, Serialize};

/// Describes what a device adapter can do
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Can launch a companion (watch) app
    pub can_launch_companion: bool,

    /// Can force-stop the whole simulated device
    pub can_shutdown_device: bool,

    /// Can enumerate runtimes, device types and installed apps
    pub can_list: bool,
}

impl DeviceCapabilities {
    /// Create minimal capabilities (launch and observe only)
    pub fn minimal() -> Self {
        Self {
            can_launch_companion: false,
            can_shutdown_device: false,
            can_list: false,
        }
    }

    /// Everything on; what the simctl backend and the mock offer
    pub fn full() -> Self {
        Self {
            can_launch_companion: true,
            can_shutdown_device: true,
            can_list: true,
        }
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::minimal()
    }
}
