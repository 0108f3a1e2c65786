//! Command-line definition

use clap::{Args, Parser, Subcommand};
use simlaunch_config::LaunchOptions;
use simlaunch_util::SIMLAUNCH_CONFIG_ENV;
use std::path::PathBuf;

/// simlaunch - launch apps in the iOS Simulator
#[derive(Parser, Debug)]
#[command(name = "simlaunch", version)]
#[command(about = "Launch apps in the iOS Simulator and stream their output", long_about = None)]
pub struct Cli {
    /// Defaults file (default: ~/.config/simlaunch/config.toml)
    #[arg(short, long, global = true, env = SIMLAUNCH_CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install and launch an app, supervising it until it exits
    Launch(LaunchArgs),

    /// List available simulator runtimes
    Showsdks,

    /// List device types usable with --devicetypeid
    #[command(alias = "list-devices")]
    Showdevicetypes,

    /// List apps installed on the selected device
    Showinstalledapps(DeviceArgs),
}

/// Which simulated device to use
#[derive(Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    /// Device type, e.g. `iPhone-15` or `iPhone-15, 17.2`
    #[arg(long = "devicetypeid", value_name = "IDENT")]
    pub device_type_id: Option<String>,

    /// Runtime version or identifier, e.g. `17.2`
    #[arg(long, value_name = "VERSION")]
    pub sdk: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// App bundle to install and launch
    pub app_path: Option<PathBuf>,

    /// Bundle identifier to launch (alone: an app already installed)
    #[arg(long = "bundle-id", value_name = "ID")]
    pub bundle_id: Option<String>,

    #[command(flatten)]
    pub device: DeviceArgs,

    /// Environment for the app (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Write the app's stdout here instead of ours
    #[arg(long, value_name = "PATH")]
    pub stdout: Option<PathBuf>,

    /// Write the app's stderr here instead of ours
    #[arg(long, value_name = "PATH")]
    pub stderr: Option<PathBuf>,

    /// Give up after this many seconds (0: never)
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Exit as soon as the app is running
    #[arg(long = "exit")]
    pub exit_on_startup: bool,

    /// Keep running after the app exits
    #[arg(long)]
    pub keepalive: bool,

    /// Shut the whole simulator down if the run fails
    #[arg(long)]
    pub kill_sim_on_error: bool,

    /// none, alongside or exclusively
    #[arg(long = "launch-watch-app", value_name = "MODE")]
    pub watch_launch_mode: Option<String>,

    /// JSON notification to deliver to the watch app after it launches
    #[arg(long = "watch-notification-payload", value_name = "PATH")]
    pub watch_notification_payload: Option<PathBuf>,

    /// watch, watch-regular, watch-compact or carplay
    #[arg(long = "external-display-type", value_name = "TYPE")]
    pub external_display_type: Option<String>,

    /// Print the installed apps before launching
    #[arg(long = "showinstalledapps")]
    pub show_installed_apps: bool,

    /// Arguments for the app; consumes everything after it
    #[arg(long, num_args = 1.., allow_hyphen_values = true, value_name = "ARG")]
    pub args: Vec<String>,
}

impl LaunchArgs {
    pub fn into_options(self) -> LaunchOptions {
        LaunchOptions {
            app_path: self.app_path,
            launch_bundle_id: self.bundle_id,
            env: self.env,
            args: self.args,
            device_type_id: self.device.device_type_id,
            sdk: self.device.sdk,
            external_display_type: self.external_display_type,
            watch_launch_mode: self.watch_launch_mode,
            watch_notification_payload: self.watch_notification_payload,
            timeout_seconds: self.timeout,
            keepalive: self.keepalive,
            exit_on_startup: self.exit_on_startup,
            kill_sim_on_error: self.kill_sim_on_error,
            show_installed_apps: self.show_installed_apps,
            stdout_path: self.stdout,
            stderr_path: self.stderr,
        }
    }
}
