//! simlaunch - launch apps in the iOS Simulator
//!
//! Wires the CLI to the device adapter, the launch pipeline and the host
//! signal handlers, and maps the outcome to the process exit code.

use anyhow::Result;
use clap::Parser;
use simlaunch::cli::{Cli, Command, LaunchArgs};
use simlaunch::launch::Launch;
use simlaunch::signals::HostSignals;
use simlaunch::{commands, logging};
use simlaunch_config::{LaunchDefaults, PlutilInspector, SessionConfig, load_defaults};
use simlaunch_device_api::DeviceAdapter;
use simlaunch_host_simctl::SimctlDevice;
use simlaunch_util::{FailureKind, config_path_without_env, default_stdio_dir};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};

async fn run_launch(adapter: Arc<dyn DeviceAdapter>, args: LaunchArgs, defaults: &LaunchDefaults) -> i32 {
    let config = match SessionConfig::build(args.into_options(), defaults, &PlutilInspector) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return FailureKind::Config.exit_code();
        }
    };

    let mut signals = match HostSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!("{:#}", e);
            return FailureKind::Io.exit_code();
        }
    };

    let prepared = signals
        .until_signal(Launch::prepare(adapter, config, &default_stdio_dir()))
        .await;
    let launch = match prepared {
        Ok(Ok(launch)) => launch,
        Ok(Err(e)) => {
            error!("{}", e);
            return e.exit_code();
        }
        Err(name) => {
            info!("Received {} during setup", name);
            return FailureKind::Interrupted.exit_code();
        }
    };

    let forwarder = tokio::spawn(signals.forward(launch.interrupt_handle()));
    let report = launch.run().await;
    forwarder.abort();

    debug!(?report, "Launch finished");
    report.exit_code
}

fn listing_exit(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            FailureKind::Io.exit_code()
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (config_path_without_env(), false),
    };
    let defaults = load_defaults(&config_path, required);

    let default_level = defaults.as_ref().ok().and_then(|d| d.log_level.clone());
    logging::init(&logging::filter_directive(
        cli.verbose,
        cli.log_level.as_deref(),
        default_level.as_deref(),
    ));

    let defaults = match defaults {
        Ok(defaults) => defaults,
        Err(e) => {
            error!(path = %config_path.display(), "{}", e);
            return exit_code(FailureKind::Config.exit_code());
        }
    };

    let adapter: Arc<dyn DeviceAdapter> = Arc::new(SimctlDevice::new());

    let mut out = std::io::stdout();
    let code = match cli.command {
        Command::Launch(args) => run_launch(adapter, args, &defaults).await,
        Command::Showsdks => listing_exit(commands::show_sdks(adapter.as_ref(), &mut out).await),
        Command::Showdevicetypes => {
            listing_exit(commands::show_device_types(adapter.as_ref(), &mut out).await)
        }
        Command::Showinstalledapps(device) => listing_exit(
            commands::show_installed_apps(adapter.as_ref(), &device, &defaults, &mut out).await,
        ),
    };

    exit_code(code)
}
