//! Device handle abstraction

use serde::{Deserialize, Serialize};

/// Opaque handle to a simulated device
///
/// Created by the device adapter when a device is acquired. The core passes
/// it back to the adapter and never looks inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Human-readable device name (for logging)
    pub name: String,

    /// Platform-specific payload (opaque to core)
    payload: DeviceHandlePayload,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, payload: DeviceHandlePayload) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn payload(&self) -> &DeviceHandlePayload {
        &self.payload
    }
}

/// Platform-specific handle payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DeviceHandlePayload {
    /// CoreSimulator device driven through `xcrun simctl`
    Simctl {
        udid: String,
        device_type_id: String,
        runtime_id: String,
    },

    /// Mock for testing
    Mock {
        id: u64,
    },
}

impl DeviceHandlePayload {
    /// Get the device UDID if applicable
    pub fn udid(&self) -> Option<&str> {
        match self {
            DeviceHandlePayload::Simctl { udid, .. } => Some(udid),
            DeviceHandlePayload::Mock { .. } => None,
        }
    }
}

/// Exit status of a process inside the simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,

    /// Whether the process was signaled
    pub signaled: bool,

    /// Signal number if signaled
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            signaled: false,
            signal: None,
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signaled: false,
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signaled: true,
            signal: Some(signal),
        }
    }

    /// The process is gone but the backend cannot say how it ended
    pub fn unknown() -> Self {
        Self {
            code: None,
            signaled: false,
            signal: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// True only when the status positively indicates failure.
    ///
    /// An unknown status is not a failure.
    pub fn is_failure(&self) -> bool {
        self.signaled || matches!(self.code, Some(code) if code != 0)
    }
}
