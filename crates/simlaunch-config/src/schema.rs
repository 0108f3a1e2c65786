//! Raw configuration schema (TOML defaults and CLI input)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw defaults file as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Values used when the CLI does not supply them
    #[serde(default)]
    pub defaults: LaunchDefaults,
}

/// Per-user launch defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LaunchDefaults {
    /// Device type, short (`iPhone-15`) or full identifier
    pub device_type_id: Option<String>,

    /// Runtime version (`17.2`) or full runtime identifier
    pub sdk: Option<String>,

    /// Default timeout; 0 means wait forever
    pub timeout_seconds: Option<f64>,

    pub kill_sim_on_error: Option<bool>,

    /// Log filter used when neither RUST_LOG nor --log-level is given
    pub log_level: Option<String>,
}

/// Unvalidated launch input, as collected from the command line
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// App bundle to install and launch
    pub app_path: Option<PathBuf>,

    /// Bundle identifier to launch (required to launch an installed app)
    pub launch_bundle_id: Option<String>,

    /// `KEY=VALUE` pairs
    pub env: Vec<String>,

    /// Arguments for the launched process
    pub args: Vec<String>,

    /// Device type, optionally suffixed with `, <runtime version>`
    pub device_type_id: Option<String>,

    pub sdk: Option<String>,
    pub external_display_type: Option<String>,
    pub watch_launch_mode: Option<String>,

    /// JSON file with a notification for the watch companion
    pub watch_notification_payload: Option<PathBuf>,

    pub timeout_seconds: Option<f64>,
    pub keepalive: bool,
    pub exit_on_startup: bool,
    pub kill_sim_on_error: bool,
    pub show_installed_apps: bool,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}
