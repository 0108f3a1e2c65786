//! One simulator session: the device, the launch and its teardown

use simlaunch_config::SessionConfig;
use simlaunch_device_api::{
    CompanionLaunch, DeviceAdapter, DeviceError, DeviceHandle, DeviceResult, LaunchRequest,
    StopMode, WatchLaunchMode,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{STDERR_PATH_ENV, STDOUT_PATH_ENV, StdioPaths};

/// Owns an acquired device and the launch running on it
///
/// `start` may be called once. `stop` is idempotent and does nothing if the
/// session never started.
pub struct SimulatorSession {
    adapter: Arc<dyn DeviceAdapter>,
    device: Option<DeviceHandle>,
    config: SessionConfig,
    started: bool,
    stopped: bool,
}

impl SimulatorSession {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, device: DeviceHandle, config: SessionConfig) -> Self {
        Self {
            adapter,
            device: Some(device),
            config,
            started: false,
            stopped: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The acquired device, until [`SimulatorSession::release`]
    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Build the request handed to the device layer
    ///
    /// The FIFO variables are inserted after the user environment, so they
    /// win over a user-supplied key of the same name.
    pub fn launch_request(&self, stdio: &StdioPaths) -> LaunchRequest {
        let mut environment = self.config.environment.clone();
        environment.insert(
            STDOUT_PATH_ENV.to_string(),
            stdio.stdout.to_string_lossy().into_owned(),
        );
        environment.insert(
            STDERR_PATH_ENV.to_string(),
            stdio.stderr.to_string_lossy().into_owned(),
        );

        let companion = match (&self.config.companion, self.config.watch_launch_mode) {
            (Some(app), mode) if mode.wants_companion() => Some(CompanionLaunch {
                app_path: app.app_path.clone(),
                bundle_id: app.bundle_id.clone(),
                exclusive: mode == WatchLaunchMode::Exclusively,
                notification_payload: app.notification_payload.clone(),
            }),
            _ => None,
        };

        LaunchRequest {
            app_path: self.config.app_path.clone(),
            bundle_id: self.config.bundle_id().map(str::to_string),
            args: self.config.args.clone(),
            environment,
            stdout_path: stdio.stdout.clone(),
            stderr_path: stdio.stderr.clone(),
            external_display: self.config.external_display,
            companion,
        }
    }

    /// Ask the device layer to start the session and launch the app
    pub async fn start(&mut self, stdio: &StdioPaths) -> DeviceResult<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| DeviceError::Internal("session already released".into()))?;

        if self.started {
            return Err(DeviceError::Internal("session already started".into()));
        }

        let request = self.launch_request(stdio);
        if request.companion.is_some() && !self.adapter.capabilities().can_launch_companion {
            return Err(DeviceError::Unsupported("companion app launch".into()));
        }

        info!(
            device = %device.name,
            bundle_id = ?request.bundle_id,
            "Starting simulator session"
        );

        self.adapter.start_session(device, request).await?;
        self.started = true;
        Ok(())
    }

    /// Stop the app; safe to call more than once
    pub async fn stop(&mut self, mode: StopMode) -> DeviceResult<()> {
        if !self.started || self.stopped {
            return Ok(());
        }
        let Some(device) = self.device.as_ref() else {
            return Ok(());
        };

        self.stopped = true;
        debug!(device = %device.name, ?mode, "Stopping simulator session");
        self.adapter.stop_session(device, mode).await
    }

    /// Force-stop the whole device
    pub async fn shutdown_device(&mut self) -> DeviceResult<()> {
        match self.device.as_ref() {
            Some(_) if !self.adapter.capabilities().can_shutdown_device => {
                Err(DeviceError::Unsupported("device shutdown".into()))
            }
            Some(device) => {
                warn!(device = %device.name, "Shutting down simulated device");
                self.adapter.shutdown_device(device).await
            }
            None => Ok(()),
        }
    }

    /// Drop our hold on the device
    pub fn release(&mut self) -> Option<DeviceHandle> {
        self.device.take()
    }
}
