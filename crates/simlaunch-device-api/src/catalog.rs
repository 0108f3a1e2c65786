//! Read-only catalog types returned by the listing operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An installed simulator runtime (SDK)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// e.g. `com.apple.CoreSimulator.SimRuntime.iOS-17-2`
    pub identifier: String,
    /// e.g. `iOS 17.2`
    pub name: String,
    pub version: String,
    pub available: bool,
}

/// A device type that simulated devices can be created from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTypeInfo {
    /// e.g. `com.apple.CoreSimulator.SimDeviceType.iPhone-15`
    pub identifier: String,
    pub name: String,
}

/// An application installed on a simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub bundle_id: String,
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    /// `User` or `System`
    pub app_type: Option<String>,
}
