//! The `launch` pipeline: device, stdio bridge, session, supervisor

use simlaunch_config::{ConfigError, SessionConfig};
use simlaunch_core::{
    InterruptHandle, SessionSupervisor, SimulatorSession, StdioBridge, StdioDestination,
    SupervisorReport,
};
use simlaunch_device_api::{DeviceAdapter, DeviceError, DeviceEvent};
use simlaunch_util::FailureKind;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::commands::format_installed_app;

/// Failures before a session exists; nothing needs tearing down
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not prepare device: {0}")]
    Device(#[source] DeviceError),

    #[error("Could not set up stdio bridge: {0}")]
    Stdio(#[from] io::Error),
}

impl SetupError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SetupError::Config(_) => FailureKind::Config,
            SetupError::Device(_) => FailureKind::Session,
            SetupError::Stdio(_) => FailureKind::Io,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code()
    }
}

/// A launch ready to run
pub struct Launch {
    supervisor: SessionSupervisor,
    events: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl Launch {
    /// Acquire the device and open the stdio bridge under `stdio_dir`
    pub async fn prepare(
        adapter: Arc<dyn DeviceAdapter>,
        config: SessionConfig,
        stdio_dir: &Path,
    ) -> Result<Self, SetupError> {
        let events = adapter.subscribe().map_err(SetupError::Device)?;

        let device = adapter
            .acquire_device(&config.device_selector())
            .await
            .map_err(SetupError::Device)?;
        info!(device = %device.name, "Acquired device");

        if config.show_installed_apps && !adapter.capabilities().can_list {
            warn!("This device backend cannot list installed apps");
        } else if config.show_installed_apps {
            match adapter.list_installed_apps(&device).await {
                Ok(apps) => {
                    for app in &apps {
                        println!("{}", format_installed_app(app));
                    }
                }
                Err(e) => warn!(error = %e, "Could not list installed apps"),
            }
        }

        let bridge = StdioBridge::open_in(
            stdio_dir,
            StdioDestination::from_path(config.stdout_path.clone()),
            StdioDestination::from_path(config.stderr_path.clone()),
        )
        .await?;

        let session = SimulatorSession::new(adapter, device, config);
        Ok(Self {
            supervisor: SessionSupervisor::new(session, bridge),
            events,
        })
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.supervisor.interrupt_handle()
    }

    /// Run to completion
    pub async fn run(mut self) -> SupervisorReport {
        self.supervisor.run(&mut self.events).await
    }
}
