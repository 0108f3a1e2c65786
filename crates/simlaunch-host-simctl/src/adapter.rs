//! CoreSimulator device adapter driven through `xcrun simctl`

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use simlaunch_device_api::{
    DeviceAdapter, DeviceCapabilities, DeviceError, DeviceEvent, DeviceHandle,
    DeviceHandlePayload, DeviceResult, DeviceSelector, DeviceTypeInfo, ExitStatus, InstalledApp,
    LaunchRequest, RuntimeInfo, StopMode,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{
    SimState, parse_device_types, parse_devices, parse_installed_apps, parse_launch_pid,
    parse_pairs, parse_runtimes, select_device,
};
use crate::process::{Simctl, plist_to_json, process_alive};

const BOOT_TIMEOUT: Duration = Duration::from_secs(120);
const BOOT_POLL: Duration = Duration::from_millis(500);
const LIVENESS_POLL: Duration = Duration::from_millis(100);

const ALREADY_BOOTED: &[&str] = &["current state: Booted"];
const ALREADY_SHUTDOWN: &[&str] = &["current state: Shutdown"];
const NOT_RUNNING: &[&str] = &["found nothing to terminate", "not running"];

/// An app we launched and may have to terminate
#[derive(Debug, Clone)]
struct LaunchedApp {
    udid: String,
    bundle_id: String,
    pid: u32,
}

/// Per-device session bookkeeping
#[derive(Default)]
struct SessionSlot {
    worker: Option<JoinHandle<()>>,
    launched: Vec<LaunchedApp>,
}

type Sessions = Arc<Mutex<HashMap<String, SessionSlot>>>;

/// `xcrun simctl` device adapter
pub struct SimctlDevice {
    capabilities: DeviceCapabilities,
    simctl: Simctl,
    boot_poll: Duration,
    liveness_poll: Duration,
    sessions: Sessions,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
}

impl SimctlDevice {
    pub fn new() -> Self {
        Self::with_simctl(Simctl::new())
    }

    pub fn with_simctl(simctl: Simctl) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            capabilities: DeviceCapabilities::full(),
            simctl,
            boot_poll: BOOT_POLL,
            liveness_poll: LIVENESS_POLL,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
        }
    }

    /// Override the boot and liveness polling intervals
    pub fn with_poll_intervals(mut self, boot: Duration, liveness: Duration) -> Self {
        self.boot_poll = boot;
        self.liveness_poll = liveness;
        self
    }

    fn worker(&self, session_udid: String) -> SessionWorker {
        SessionWorker {
            session_udid,
            simctl: self.simctl.clone(),
            sessions: self.sessions.clone(),
            event_tx: self.event_tx.clone(),
            boot_poll: self.boot_poll,
            liveness_poll: self.liveness_poll,
        }
    }
}

impl Default for SimctlDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn udid_of(device: &DeviceHandle) -> DeviceResult<&str> {
    device
        .payload()
        .udid()
        .ok_or_else(|| DeviceError::Internal(format!("{} is not a simctl device", device.name)))
}

#[async_trait]
impl DeviceAdapter for SimctlDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    async fn acquire_device(&self, selector: &DeviceSelector) -> DeviceResult<DeviceHandle> {
        let json = self.simctl.run(&["list", "devices", "-j"]).await?;
        let devices = parse_devices(&json)?;

        let device = select_device(
            &devices,
            &selector.device_type_id,
            selector.runtime_id.as_deref(),
        )
        .ok_or_else(|| DeviceError::NoMatchingDevice {
            device_type_id: selector.device_type_id.clone(),
            runtime: selector
                .runtime_id
                .clone()
                .unwrap_or_else(|| "newest".into()),
        })?;

        info!(
            udid = %device.udid,
            name = %device.name,
            runtime = %device.runtime_id,
            state = ?device.state,
            "Selected simulator"
        );

        Ok(DeviceHandle::new(
            device.name.clone(),
            DeviceHandlePayload::Simctl {
                udid: device.udid.clone(),
                device_type_id: selector.device_type_id.clone(),
                runtime_id: device.runtime_id.clone(),
            },
        ))
    }

    async fn start_session(&self, device: &DeviceHandle, request: LaunchRequest) -> DeviceResult<()> {
        let udid = udid_of(device)?.to_string();

        let mut sessions = self.sessions.lock().unwrap();
        let busy = sessions
            .get(&udid)
            .and_then(|s| s.worker.as_ref())
            .is_some_and(|w| !w.is_finished());
        if busy {
            return Err(DeviceError::StartFailed(format!(
                "a session is already active on {}",
                udid
            )));
        }

        if let Some(ext_display) = request.external_display {
            warn!(display = %ext_display, "External displays are not supported by simctl; ignoring");
        }

        let worker = self.worker(udid.clone());
        let handle = tokio::spawn(worker.run(request));

        sessions.entry(udid).or_default().worker = Some(handle);
        Ok(())
    }

    async fn stop_session(&self, device: &DeviceHandle, mode: StopMode) -> DeviceResult<()> {
        let udid = udid_of(device)?;

        let Some(slot) = self.sessions.lock().unwrap().remove(udid) else {
            debug!(udid, "No active session to stop");
            return Ok(());
        };

        if let Some(worker) = slot.worker {
            worker.abort();
        }

        match mode {
            StopMode::Detach => {
                info!(udid, "Detaching; app keeps running");
                Ok(())
            }
            StopMode::Force => {
                for app in &slot.launched {
                    kill_pid(app.pid, Signal::SIGKILL);
                    self.terminate(app).await?;
                }
                Ok(())
            }
            StopMode::Graceful { timeout } => {
                for app in &slot.launched {
                    self.terminate(app).await?;
                    if !wait_for_exit(app.pid, timeout, self.liveness_poll).await {
                        warn!(pid = app.pid, "App did not exit in time, killing");
                        kill_pid(app.pid, Signal::SIGKILL);
                    }
                }
                Ok(())
            }
        }
    }

    async fn shutdown_device(&self, device: &DeviceHandle) -> DeviceResult<()> {
        let udid = udid_of(device)?;
        info!(udid, "Shutting down simulator");
        self.simctl
            .run_tolerating(&["shutdown", udid], ALREADY_SHUTDOWN)
            .await
            .map(|_| ())
            .map_err(|e| DeviceError::ShutdownFailed(e.to_string()))
    }

    fn subscribe(&self) -> DeviceResult<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DeviceError::Internal("subscribe() can only be called once".into()))
    }

    async fn list_runtimes(&self) -> DeviceResult<Vec<RuntimeInfo>> {
        let json = self.simctl.run(&["list", "runtimes", "-j"]).await?;
        parse_runtimes(&json)
    }

    async fn list_device_types(&self) -> DeviceResult<Vec<DeviceTypeInfo>> {
        let json = self.simctl.run(&["list", "devicetypes", "-j"]).await?;
        parse_device_types(&json)
    }

    async fn list_installed_apps(&self, device: &DeviceHandle) -> DeviceResult<Vec<InstalledApp>> {
        let udid = udid_of(device)?;
        let plist = self.simctl.run(&["listapps", udid]).await?;
        let json = plist_to_json(&plist).await?;
        parse_installed_apps(&json)
    }
}

impl SimctlDevice {
    async fn terminate(&self, app: &LaunchedApp) -> DeviceResult<()> {
        debug!(udid = %app.udid, bundle_id = %app.bundle_id, "Terminating app");
        self.simctl
            .run_tolerating(&["terminate", &app.udid, &app.bundle_id], NOT_RUNNING)
            .await
            .map(|_| ())
            .map_err(|e| DeviceError::StopFailed(e.to_string()))
    }
}

fn kill_pid(pid: u32, sig: Signal) {
    if let Ok(raw) = i32::try_from(pid)
        && let Err(e) = signal::kill(Pid::from_raw(raw), sig)
    {
        debug!(pid, error = %e, "kill failed");
    }
}

async fn wait_for_exit(pid: u32, timeout: Duration, poll: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
    true
}

/// Background half of a session: boot, install, launch, then watch the pid
struct SessionWorker {
    /// The device the session was started on; the watch of a pair is not it
    session_udid: String,
    simctl: Simctl,
    sessions: Sessions,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
    boot_poll: Duration,
    liveness_poll: Duration,
}

impl SessionWorker {
    fn emit(&self, event: DeviceEvent) {
        debug!(?event, "Device event");
        let _ = self.event_tx.send(event);
    }

    async fn run(self, request: LaunchRequest) {
        let udid = self.session_udid.clone();
        if let Err(e) = self.boot(&udid).await {
            self.emit(DeviceEvent::SessionFailed {
                reason: e.to_string(),
            });
            return;
        }
        self.emit(DeviceEvent::SessionStarted {
            simulator_pid: None,
        });

        let pid = match self.launch(&udid, &request).await {
            Ok(pid) => pid,
            Err(e) => {
                self.emit(DeviceEvent::AppLaunchFailed {
                    reason: e.to_string(),
                });
                return;
            }
        };
        self.emit(DeviceEvent::AppLaunched { pid });

        self.monitor(pid).await;
    }

    async fn boot(&self, udid: &str) -> DeviceResult<()> {
        info!(udid, "Booting simulator");
        self.simctl
            .run_tolerating(&["boot", udid], ALREADY_BOOTED)
            .await?;

        let deadline = tokio::time::Instant::now() + BOOT_TIMEOUT;
        loop {
            let json = self.simctl.run(&["list", "devices", "-j"]).await?;
            let booted = parse_devices(&json)?
                .iter()
                .any(|d| d.udid == udid && d.state == SimState::Booted);
            if booted {
                debug!(udid, "Simulator booted");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DeviceError::StartFailed(format!(
                    "{} did not finish booting within {}s",
                    udid,
                    BOOT_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(self.boot_poll).await;
        }
    }

    /// Install and launch; returns the pid to watch
    async fn launch(&self, udid: &str, request: &LaunchRequest) -> DeviceResult<u32> {
        if let Some(app_path) = &request.app_path {
            let path = app_path.to_string_lossy();
            info!(udid, app = %path, "Installing app");
            self.simctl.run(&["install", udid, &path]).await?;
        }

        let mut watched = None;

        if !request.companion.as_ref().is_some_and(|c| c.exclusive) {
            let bundle_id = request.bundle_id.as_deref().ok_or_else(|| {
                DeviceError::StartFailed("bundle identifier of the app is unknown".into())
            })?;
            watched = Some(self.launch_app(udid, bundle_id, request).await?);
        }

        if let Some(companion) = &request.companion {
            let watch_udid = self.paired_watch(udid).await?;
            self.boot(&watch_udid).await?;

            let path = companion.app_path.to_string_lossy();
            info!(udid = %watch_udid, app = %path, "Installing watch app");
            self.simctl.run(&["install", &watch_udid, &path]).await?;

            let bundle_id = companion.bundle_id.as_deref().ok_or_else(|| {
                DeviceError::StartFailed("bundle identifier of the watch app is unknown".into())
            })?;
            let pid = self.launch_app(&watch_udid, bundle_id, request).await?;

            if let Some(payload) = &companion.notification_payload {
                info!(udid = %watch_udid, bundle_id, "Pushing notification to watch app");
                self.simctl
                    .run_with_input(&["push", &watch_udid, bundle_id, "-"], payload)
                    .await?;
            }
            watched = watched.or(Some(pid));
        }

        watched.ok_or_else(|| DeviceError::StartFailed("nothing was launched".into()))
    }

    async fn launch_app(
        &self,
        udid: &str,
        bundle_id: &str,
        request: &LaunchRequest,
    ) -> DeviceResult<u32> {
        let stdout = format!("--stdout={}", request.stdout_path.display());
        let stderr = format!("--stderr={}", request.stderr_path.display());

        let mut args = vec![
            "launch",
            "--terminate-running-process",
            stdout.as_str(),
            stderr.as_str(),
            udid,
            bundle_id,
        ];
        args.extend(request.args.iter().map(String::as_str));

        info!(udid, bundle_id, "Launching app");
        let output = self
            .simctl
            .output_with_env(&args, &request.environment)
            .await?;
        if !output.success {
            return Err(DeviceError::ToolFailed {
                tool: "simctl launch".into(),
                message: output.stderr.trim().to_string(),
            });
        }

        let pid = parse_launch_pid(&output.stdout).ok_or_else(|| DeviceError::Parse {
            what: "simctl launch output".into(),
            message: output.stdout.trim().to_string(),
        })?;

        if let Some(slot) = self.sessions.lock().unwrap().get_mut(&self.session_udid) {
            slot.launched.push(LaunchedApp {
                udid: udid.to_string(),
                bundle_id: bundle_id.to_string(),
                pid,
            });
        }

        Ok(pid)
    }

    async fn paired_watch(&self, phone_udid: &str) -> DeviceResult<String> {
        let json = self.simctl.run(&["list", "pairs", "-j"]).await?;
        parse_pairs(&json)?
            .into_iter()
            .find(|p| p.phone_udid == phone_udid)
            .map(|p| p.watch_udid)
            .ok_or_else(|| {
                DeviceError::StartFailed(format!("no watch simulator is paired with {}", phone_udid))
            })
    }

    async fn monitor(&self, pid: u32) {
        let mut interval = tokio::time::interval(self.liveness_poll);
        loop {
            interval.tick().await;
            if !process_alive(pid) {
                info!(pid, "App process exited");
                self.emit(DeviceEvent::ProcessDied {
                    pid,
                    status: ExitStatus::unknown(),
                });
                return;
            }
        }
    }
}
