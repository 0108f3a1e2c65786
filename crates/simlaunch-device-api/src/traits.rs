//! Device adapter traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    DeviceCapabilities, DeviceHandle, DeviceTypeInfo, ExitStatus, InstalledApp, RuntimeInfo,
};

/// Errors from device adapter operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No available device of type {device_type_id} (runtime: {runtime})")]
    NoMatchingDevice {
        device_type_id: String,
        runtime: String,
    },

    #[error("Session start failed: {0}")]
    StartFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Device shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error("Unsupported by this device backend: {0}")]
    Unsupported(String),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("Could not parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Stop mode for session termination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Ask the app to terminate, give up waiting after `timeout`
    Graceful { timeout: Duration },
    /// Terminate immediately
    Force,
    /// Stop observing the session but leave the app running
    Detach,
}

impl Default for StopMode {
    fn default() -> Self {
        Self::Graceful {
            timeout: Duration::from_secs(5),
        }
    }
}

/// How a companion watch app participates in a launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchLaunchMode {
    /// Launch only the primary app
    #[default]
    None,
    /// Launch the primary app and its watch companion
    Alongside,
    /// Launch only the watch companion
    Exclusively,
}

impl WatchLaunchMode {
    pub fn wants_companion(self) -> bool {
        !matches!(self, WatchLaunchMode::None)
    }
}

impl FromStr for WatchLaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(WatchLaunchMode::None),
            "alongside" => Ok(WatchLaunchMode::Alongside),
            "exclusively" | "only" => Ok(WatchLaunchMode::Exclusively),
            other => Err(format!(
                "unknown watch launch mode '{}' (expected none, alongside or exclusively)",
                other
            )),
        }
    }
}

impl fmt::Display for WatchLaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchLaunchMode::None => "none",
            WatchLaunchMode::Alongside => "alongside",
            WatchLaunchMode::Exclusively => "exclusively",
        };
        f.write_str(s)
    }
}

/// External display attached to the simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalDisplayType {
    Watch,
    WatchRegular,
    WatchCompact,
    Carplay,
}

impl FromStr for ExternalDisplayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "watch" => Ok(ExternalDisplayType::Watch),
            "watch-regular" => Ok(ExternalDisplayType::WatchRegular),
            "watch-compact" => Ok(ExternalDisplayType::WatchCompact),
            "carplay" => Ok(ExternalDisplayType::Carplay),
            other => Err(format!(
                "unknown external display type '{}' (expected watch, watch-regular, watch-compact or carplay)",
                other
            )),
        }
    }
}

impl fmt::Display for ExternalDisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExternalDisplayType::Watch => "watch",
            ExternalDisplayType::WatchRegular => "watch-regular",
            ExternalDisplayType::WatchCompact => "watch-compact",
            ExternalDisplayType::Carplay => "carplay",
        };
        f.write_str(s)
    }
}

/// Which device to acquire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelector {
    /// Full device type identifier
    pub device_type_id: String,

    /// Full runtime identifier; `None` picks the newest matching runtime
    pub runtime_id: Option<String>,
}

/// Companion app part of a launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionLaunch {
    pub app_path: PathBuf,
    pub bundle_id: Option<String>,
    /// Launch only the companion, not the primary app
    pub exclusive: bool,
    /// JSON notification delivered to the companion once it is running
    pub notification_payload: Option<String>,
}

/// Everything the device layer needs to start a session and launch the app
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Bundle to install before launching (absent: launch an installed app)
    pub app_path: Option<PathBuf>,

    /// Bundle identifier to launch
    pub bundle_id: Option<String>,

    /// Argument vector passed to the launched process
    pub args: Vec<String>,

    /// Child environment, including the stdio FIFO path variables
    pub environment: BTreeMap<String, String>,

    /// FIFO the app's stdout must be written to
    pub stdout_path: PathBuf,

    /// FIFO the app's stderr must be written to
    pub stderr_path: PathBuf,

    pub external_display: Option<ExternalDisplayType>,

    pub companion: Option<CompanionLaunch>,
}

/// Lifecycle callbacks from the device layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The session is up; carries the simulator's own pid when known
    SessionStarted { simulator_pid: Option<u32> },

    /// The session could not be started
    SessionFailed { reason: String },

    /// The app is running
    AppLaunched { pid: u32 },

    /// The app could not be launched
    AppLaunchFailed { reason: String },

    /// A process tied to the session died
    ProcessDied { pid: u32, status: ExitStatus },
}

/// Device adapter trait - implemented by device backends
///
/// `start_session` only requests work; its outcome arrives later as
/// [`DeviceEvent`]s on the receiver returned by `subscribe`.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Get the capabilities of this adapter
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Resolve a selector to a concrete device
    async fn acquire_device(&self, selector: &DeviceSelector) -> DeviceResult<DeviceHandle>;

    /// Request a session on `device` and the launch described by `request`
    async fn start_session(&self, device: &DeviceHandle, request: LaunchRequest)
    -> DeviceResult<()>;

    /// Stop the session's app. Calling on a stopped session is a no-op.
    async fn stop_session(&self, device: &DeviceHandle, mode: StopMode) -> DeviceResult<()>;

    /// Force-stop the whole simulated device
    async fn shutdown_device(&self, device: &DeviceHandle) -> DeviceResult<()>;

    /// Take the event receiver. Only the first call succeeds.
    fn subscribe(&self) -> DeviceResult<mpsc::UnboundedReceiver<DeviceEvent>>;

    /// Optional: list installed runtimes
    async fn list_runtimes(&self) -> DeviceResult<Vec<RuntimeInfo>> {
        Err(DeviceError::Unsupported("list runtimes".into()))
    }

    /// Optional: list device types
    async fn list_device_types(&self) -> DeviceResult<Vec<DeviceTypeInfo>> {
        Err(DeviceError::Unsupported("list device types".into()))
    }

    /// Optional: list apps installed on a device
    async fn list_installed_apps(&self, _device: &DeviceHandle) -> DeviceResult<Vec<InstalledApp>> {
        Err(DeviceError::Unsupported("list installed apps".into()))
    }

    /// Optional: check if the adapter is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}
