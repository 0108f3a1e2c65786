//! Session supervisor: the launch state machine
//!
//! All transitions run on one control loop. The only state shared with the
//! outside is [`SharedFlags`], which a signal task reaches through an
//! [`InterruptHandle`].

use simlaunch_device_api::{DeviceEvent, ExitStatus, StopMode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::{
    SimulatorSession, StdioBridge, SupervisorEvent, SupervisorReport, SupervisorState,
    TerminationReason,
};

const NO_PID: i64 = -1;

/// Flags and pids written from both the control loop and the signal path
#[derive(Debug)]
struct SharedFlags {
    die: AtomicBool,
    has_started: AtomicBool,
    kill_on_startup: AtomicBool,
    torn_down: AtomicBool,
    simulator_pid: AtomicI64,
    app_pid: AtomicI64,
    interrupt: Notify,
}

impl SharedFlags {
    fn new(kill_on_startup: bool) -> Self {
        Self {
            die: AtomicBool::new(false),
            has_started: AtomicBool::new(false),
            kill_on_startup: AtomicBool::new(kill_on_startup),
            torn_down: AtomicBool::new(false),
            simulator_pid: AtomicI64::new(NO_PID),
            app_pid: AtomicI64::new(NO_PID),
            interrupt: Notify::new(),
        }
    }
}

fn load_pid(pid: &AtomicI64) -> Option<u32> {
    u32::try_from(pid.load(Ordering::SeqCst)).ok()
}

/// Cloneable handle for delivering a host interrupt to a supervisor
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flags: Arc<SharedFlags>,
}

impl InterruptHandle {
    /// Request teardown. Returns false if the supervisor is already dying.
    pub fn interrupt(&self) -> bool {
        if self.flags.die.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.flags.interrupt.notify_one();
        true
    }

    pub fn is_dying(&self) -> bool {
        self.flags.die.load(Ordering::SeqCst)
    }

    /// Pid of the launched app, once known
    pub fn app_pid(&self) -> Option<u32> {
        load_pid(&self.flags.app_pid)
    }

    pub fn has_started(&self) -> bool {
        self.flags.has_started.load(Ordering::SeqCst)
    }
}

/// Drives one [`SimulatorSession`] from start to a single teardown
pub struct SessionSupervisor {
    session: SimulatorSession,
    bridge: StdioBridge,
    state: SupervisorState,
    flags: Arc<SharedFlags>,
    deadline: Option<Instant>,
    reason: Option<TerminationReason>,
    exit_code: i32,
}

impl SessionSupervisor {
    pub fn new(session: SimulatorSession, bridge: StdioBridge) -> Self {
        let flags = Arc::new(SharedFlags::new(session.config().exit_on_startup));
        Self {
            session,
            bridge,
            state: SupervisorState::Idle,
            flags,
            deadline: None,
            reason: None,
            exit_code: 0,
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flags: Arc::clone(&self.flags),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn report(&self) -> SupervisorReport {
        SupervisorReport {
            state: self.state,
            reason: self.reason.clone(),
            exit_code: self.exit_code,
            simulator_pid: load_pid(&self.flags.simulator_pid),
            app_pid: load_pid(&self.flags.app_pid),
        }
    }

    fn transition(&mut self, to: SupervisorState) {
        if self.state != to {
            debug!(from = ?self.state, to = ?to, "Supervisor transition");
            self.state = to;
        }
    }

    fn timeout(&self) -> Duration {
        self.session.config().timeout
    }

    /// Idle -> SessionStarting: arm the timer and request the session
    pub async fn start(&mut self) {
        if self.state != SupervisorState::Idle {
            return;
        }

        let timeout = self.timeout();
        if !timeout.is_zero() {
            self.deadline = Instant::now().checked_add(timeout);
            match self.deadline {
                Some(_) => debug!(timeout_secs = timeout.as_secs_f64(), "Timeout armed"),
                None => warn!(timeout_secs = timeout.as_secs_f64(), "Timeout out of range, not armed"),
            }
        }
        self.transition(SupervisorState::SessionStarting);

        let paths = self.bridge.paths().clone();
        if let Err(e) = self.session.start(&paths).await {
            self.terminate(TerminationReason::SessionFailed {
                reason: e.to_string(),
            })
            .await;
        }
    }

    /// Run until Terminated or Failed.
    ///
    /// Starts the session if that has not happened yet. Safe to call again
    /// after the returned future was dropped early.
    pub async fn run(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> SupervisorReport {
        if self.state == SupervisorState::Idle {
            self.start().await;
        }

        let flags = Arc::clone(&self.flags);
        while !self.state.is_finished() {
            let deadline = self.deadline;
            let event = tokio::select! {
                biased;
                _ = flags.interrupt.notified() => SupervisorEvent::Interrupt,
                _ = wait_deadline(deadline) => SupervisorEvent::TimeoutExpired,
                event = events.recv() => match event {
                    Some(event) => SupervisorEvent::Device(event),
                    None => {
                        self.terminate(TerminationReason::SessionFailed {
                            reason: "device event channel closed".into(),
                        })
                        .await;
                        break;
                    }
                },
            };
            self.handle_event(event).await;
        }

        self.report()
    }

    /// Apply one event. Events after teardown began are ignored.
    pub async fn handle_event(&mut self, event: SupervisorEvent) {
        if self.state == SupervisorState::Terminating || self.state.is_finished() {
            debug!(?event, state = ?self.state, "Ignoring late event");
            return;
        }

        match event {
            SupervisorEvent::Interrupt => {
                self.flags.die.store(true, Ordering::SeqCst);
                info!("Interrupted");
                self.terminate(TerminationReason::Interrupted).await;
            }
            SupervisorEvent::TimeoutExpired => {
                if self.state == SupervisorState::Idle || self.timeout().is_zero() {
                    return;
                }
                self.terminate(TerminationReason::TimedOut {
                    after: self.timeout(),
                })
                .await;
            }
            SupervisorEvent::Device(event) => self.handle_device_event(event).await,
        }
    }

    async fn handle_device_event(&mut self, event: DeviceEvent) {
        use SupervisorState::*;

        match (self.state, event) {
            (SessionStarting, DeviceEvent::SessionStarted { simulator_pid }) => {
                if let Some(pid) = simulator_pid {
                    self.flags.simulator_pid.store(pid as i64, Ordering::SeqCst);
                }
                info!(simulator_pid = ?simulator_pid, "Simulator session started");
                self.transition(AppLaunching);
            }
            (SessionStarting | AppLaunching | Running, DeviceEvent::SessionFailed { reason }) => {
                self.terminate(TerminationReason::SessionFailed { reason })
                    .await;
            }
            (SessionStarting | AppLaunching, DeviceEvent::AppLaunched { pid }) => {
                self.flags.app_pid.store(pid as i64, Ordering::SeqCst);
                self.flags.has_started.store(true, Ordering::SeqCst);
                info!(pid, "App launched");
                self.transition(Running);

                if self.flags.kill_on_startup.load(Ordering::SeqCst) {
                    self.terminate(TerminationReason::StartupConfirmed { pid })
                        .await;
                }
            }
            (SessionStarting | AppLaunching, DeviceEvent::AppLaunchFailed { reason }) => {
                self.terminate(TerminationReason::LaunchFailed { reason })
                    .await;
            }
            (state, DeviceEvent::ProcessDied { pid, status }) => {
                self.handle_process_died(state, pid, status).await;
            }
            (state, event) => {
                debug!(?state, ?event, "Event has no effect in this state");
            }
        }
    }

    async fn handle_process_died(&mut self, state: SupervisorState, pid: u32, status: ExitStatus) {
        if load_pid(&self.flags.simulator_pid) == Some(pid) {
            self.terminate(TerminationReason::SessionFailed {
                reason: format!("simulator process {} died", pid),
            })
            .await;
            return;
        }

        if state != SupervisorState::Running || load_pid(&self.flags.app_pid) != Some(pid) {
            debug!(pid, "Ignoring exit of unknown process");
            return;
        }

        if self.session.config().keepalive {
            info!(pid, code = ?status.code, signal = ?status.signal, "App exited, keepalive set");
            return;
        }

        let reason = if status.is_failure() {
            TerminationReason::AppCrashed { pid, status }
        } else {
            TerminationReason::AppExited { pid, status }
        };
        self.terminate(reason).await;
    }

    /// The single teardown path. Only the first call does anything.
    async fn terminate(&mut self, reason: TerminationReason) {
        if self.flags.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flags.die.store(true, Ordering::SeqCst);
        self.deadline = None;
        self.transition(SupervisorState::Terminating);

        let mode = match reason {
            TerminationReason::StartupConfirmed { .. } => StopMode::Detach,
            _ => StopMode::default(),
        };
        if let Err(e) = self.session.stop(mode).await {
            warn!(error = %e, "Failed to stop session");
        }

        if let Err(e) = self.bridge.close().await {
            warn!(error = %e, "Failed to close stdio bridge");
        }

        let exit_code = reason.exit_code();
        let is_error = reason.is_error();

        if is_error
            && self.session.config().kill_sim_on_error
            && let Err(e) = self.session.shutdown_device().await
        {
            warn!(error = %e, "Failed to shut down simulated device");
        }

        self.session.release();

        if is_error {
            error!(exit_code, "{}", reason);
        } else {
            info!(exit_code, "{}", reason);
        }

        self.exit_code = exit_code;
        self.reason = Some(reason);
        self.transition(if is_error {
            SupervisorState::Failed
        } else {
            SupervisorState::Terminated
        });
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StdioDestination;
    use simlaunch_config::SessionConfig;
    use simlaunch_device_api::{DeviceAdapter, DeviceSelector, MockDevice, WatchLaunchMode};
    use simlaunch_util::FailureKind;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config() -> SessionConfig {
        SessionConfig {
            app_path: Some(PathBuf::from("/tmp/App.app")),
            launch_bundle_id: None,
            app_bundle_id: Some("com.example.App".into()),
            companion: None,
            environment: BTreeMap::new(),
            args: Vec::new(),
            device_type_id: "com.apple.CoreSimulator.SimDeviceType.iPhone-15".into(),
            runtime_id: None,
            external_display: None,
            watch_launch_mode: WatchLaunchMode::None,
            timeout: Duration::ZERO,
            keepalive: false,
            exit_on_startup: false,
            kill_sim_on_error: false,
            show_installed_apps: false,
            stdout_path: None,
            stderr_path: None,
        }
    }

    struct Harness {
        device: Arc<MockDevice>,
        supervisor: SessionSupervisor,
        events: mpsc::UnboundedReceiver<DeviceEvent>,
        stdio: crate::StdioPaths,
        _dir: tempfile::TempDir,
    }

    async fn harness(device: MockDevice, config: SessionConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(device);
        let events = device.subscribe().unwrap();
        let handle = device
            .acquire_device(&DeviceSelector {
                device_type_id: config.device_type_id.clone(),
                runtime_id: None,
            })
            .await
            .unwrap();

        let bridge =
            StdioBridge::open_in(dir.path(), StdioDestination::Inherit, StdioDestination::Inherit)
                .await
                .unwrap();
        let stdio = bridge.paths().clone();
        let session = SimulatorSession::new(device.clone(), handle, config);

        Harness {
            device,
            supervisor: SessionSupervisor::new(session, bridge),
            events,
            stdio,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn clean_exit_terminates_with_zero() {
        let mut h = harness(MockDevice::happy_path(42, ExitStatus::success()), config()).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.app_pid, Some(42));
        assert_eq!(report.simulator_pid, Some(7));
        assert!(!h.stdio.stdout.exists());
        assert!(h.supervisor.session.device().is_none());
    }

    #[tokio::test]
    async fn session_failure_fails_and_removes_fifos() {
        let device = MockDevice::new().with_script(vec![DeviceEvent::SessionFailed {
            reason: "device busy".into(),
        }]);
        let mut h = harness(device, config()).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Failed);
        assert_eq!(report.exit_code, FailureKind::Session.exit_code());
        assert_ne!(report.exit_code, 0);
        assert!(!h.stdio.stdout.exists());
        assert!(!h.stdio.stderr.exists());
    }

    #[tokio::test]
    async fn start_error_is_a_session_failure() {
        let device = MockDevice::new();
        *device.fail_start.lock().unwrap() = true;
        let mut h = harness(device, config()).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Failed);
        assert!(matches!(
            report.reason,
            Some(TerminationReason::SessionFailed { .. })
        ));
        // Never started, so nothing to stop
        assert!(h.device.stop_calls().is_empty());
    }

    #[tokio::test]
    async fn launch_failure_has_its_own_code() {
        let device = MockDevice::new().with_script(vec![
            DeviceEvent::SessionStarted { simulator_pid: None },
            DeviceEvent::AppLaunchFailed {
                reason: "not installed".into(),
            },
        ]);
        let mut h = harness(device, config()).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Failed);
        assert_eq!(report.exit_code, FailureKind::Launch.exit_code());
    }

    #[tokio::test]
    async fn crash_is_a_runtime_failure() {
        let mut h = harness(MockDevice::happy_path(42, ExitStatus::signaled(11)), config()).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Failed);
        assert_eq!(report.exit_code, FailureKind::RuntimeCrash.exit_code());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_at_deadline_not_before() {
        let mut config = config();
        config.timeout = Duration::from_secs(5);
        let mut h = harness(MockDevice::new(), config).await;

        let started = Instant::now();
        let early =
            tokio::time::timeout(Duration::from_millis(4999), h.supervisor.run(&mut h.events)).await;
        assert!(early.is_err());
        assert_eq!(h.supervisor.state(), SupervisorState::SessionStarting);

        let report = h.supervisor.run(&mut h.events).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_millis(5100));
        assert_eq!(report.state, SupervisorState::Failed);
        assert_eq!(report.exit_code, FailureKind::Timeout.exit_code());

        // Late callbacks change nothing
        h.device.emit(DeviceEvent::AppLaunched { pid: 42 });
        let late = h.events.recv().await.unwrap();
        h.supervisor.handle_event(SupervisorEvent::Device(late)).await;
        assert_eq!(h.supervisor.report(), report);
    }

    #[tokio::test]
    async fn unrepresentable_deadline_is_not_armed() {
        let mut config = config();
        config.timeout = Duration::MAX;
        let mut h = harness(MockDevice::happy_path(42, ExitStatus::success()), config).await;

        h.supervisor.start().await;
        assert_eq!(h.supervisor.state(), SupervisorState::SessionStarting);
        assert!(h.supervisor.deadline.is_none());

        let report = h.supervisor.run(&mut h.events).await;
        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.exit_code, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_stays_running_after_exit() {
        let mut config = config();
        config.keepalive = true;
        let mut h = harness(MockDevice::happy_path(42, ExitStatus::success()), config).await;

        let run = tokio::time::timeout(Duration::from_secs(60), h.supervisor.run(&mut h.events)).await;
        assert!(run.is_err());
        assert_eq!(h.supervisor.state(), SupervisorState::Running);
        assert!(h.device.stop_calls().is_empty());

        assert!(h.supervisor.interrupt_handle().interrupt());
        let report = h.supervisor.run(&mut h.events).await;
        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.exit_code, FailureKind::Interrupted.exit_code());
    }

    #[tokio::test]
    async fn exit_on_startup_detaches_with_success() {
        let mut config = config();
        config.exit_on_startup = true;
        let device = MockDevice::new().with_script(vec![
            DeviceEvent::SessionStarted { simulator_pid: None },
            DeviceEvent::AppLaunched { pid: 42 },
        ]);
        let mut h = harness(device, config).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.exit_code, 0);
        assert_eq!(
            report.reason,
            Some(TerminationReason::StartupConfirmed { pid: 42 })
        );
        assert_eq!(h.device.stop_calls(), vec![StopMode::Detach]);
    }

    #[tokio::test]
    async fn teardown_runs_once_under_racing_events() {
        let mut config = config();
        config.timeout = Duration::from_secs(5);
        let mut h = harness(MockDevice::new(), config).await;
        h.supervisor.start().await;

        for event in [
            SupervisorEvent::Device(DeviceEvent::SessionStarted { simulator_pid: None }),
            SupervisorEvent::Device(DeviceEvent::AppLaunched { pid: 42 }),
            SupervisorEvent::Device(DeviceEvent::ProcessDied {
                pid: 42,
                status: ExitStatus::success(),
            }),
            SupervisorEvent::TimeoutExpired,
            SupervisorEvent::Interrupt,
        ] {
            h.supervisor.handle_event(event).await;
        }

        let report = h.supervisor.report();
        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.exit_code, 0);
        assert_eq!(h.device.stop_calls().len(), 1);
    }

    #[tokio::test]
    async fn second_interrupt_is_ignored() {
        let h = harness(MockDevice::new(), config()).await;
        let handle = h.supervisor.interrupt_handle();

        assert!(handle.interrupt());
        assert!(!handle.interrupt());
        assert!(handle.is_dying());
    }

    #[tokio::test]
    async fn interrupt_before_any_event_terminates() {
        let mut h = harness(MockDevice::new(), config()).await;
        h.supervisor.interrupt_handle().interrupt();

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.reason, Some(TerminationReason::Interrupted));
        assert_eq!(h.device.stop_calls().len(), 1);
    }

    #[tokio::test]
    async fn kill_sim_on_error_shuts_down_device() {
        let mut config = config();
        config.kill_sim_on_error = true;
        let device = MockDevice::new().with_script(vec![DeviceEvent::SessionFailed {
            reason: "device busy".into(),
        }]);
        let mut h = harness(device, config).await;

        h.supervisor.run(&mut h.events).await;
        assert_eq!(h.device.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn kill_sim_on_error_without_shutdown_support_still_fails() {
        let mut config = config();
        config.kill_sim_on_error = true;
        let device = MockDevice::happy_path(42, ExitStatus::signaled(11))
            .with_capabilities(simlaunch_device_api::DeviceCapabilities::minimal());
        let mut h = harness(device, config).await;

        let report = h.supervisor.run(&mut h.events).await;

        assert_eq!(report.state, SupervisorState::Failed);
        assert_eq!(report.exit_code, FailureKind::RuntimeCrash.exit_code());
        assert_eq!(h.device.shutdown_calls(), 0);
    }

    #[tokio::test]
        async fn kill_sim_on_error_spares_successful_runs() {
        let mut config = config();
        config.kill_sim_on_error = true;
        let mut h = harness(MockDevice::happy_path(42, ExitStatus::success()), config).await;

        h.supervisor.run(&mut h.events).await;
        assert_eq!(h.device.shutdown_calls(), 0);
    }

    #[tokio::test]
    async fn simulator_death_is_a_session_failure() {
        let device = MockDevice::new().with_script(vec![
            DeviceEvent::SessionStarted {
                simulator_pid: Some(7),
            },
            DeviceEvent::AppLaunched { pid: 42 },
            DeviceEvent::ProcessDied {
                pid: 99,
                status: ExitStatus::unknown(),
            },
            DeviceEvent::ProcessDied {
                pid: 7,
                status: ExitStatus::unknown(),
            },
        ]);
        let mut h = harness(device, config()).await;

        let report = h.supervisor.run(&mut h.events).await;
        assert_eq!(report.exit_code, FailureKind::Session.exit_code());
    }

    #[tokio::test]
    async fn app_launched_before_session_started_is_accepted() {
        let device = MockDevice::new().with_script(vec![
            DeviceEvent::AppLaunched { pid: 42 },
            DeviceEvent::ProcessDied {
                pid: 42,
                status: ExitStatus::with_code(0),
            },
        ]);
        let mut h = harness(device, config()).await;

        let report = h.supervisor.run(&mut h.events).await;
        assert_eq!(report.state, SupervisorState::Terminated);
        assert_eq!(report.app_pid, Some(42));
    }
}
