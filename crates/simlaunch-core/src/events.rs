//! Supervisor states, inputs and outcomes

use simlaunch_device_api::{DeviceEvent, ExitStatus};
use simlaunch_util::{EXIT_SUCCESS, FailureKind};
use std::fmt;
use std::time::Duration;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    SessionStarting,
    AppLaunching,
    Running,
    Terminating,
    Terminated,
    Failed,
}

impl SupervisorState {
    /// Terminated or Failed: nothing further will happen
    pub fn is_finished(self) -> bool {
        matches!(self, SupervisorState::Terminated | SupervisorState::Failed)
    }
}

/// Everything that can drive the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Callback from the device layer
    Device(DeviceEvent),
    /// The configured timeout elapsed
    TimeoutExpired,
    /// Host signal (SIGINT, SIGTERM, SIGHUP)
    Interrupt,
}

/// Why the supervisor tore the session down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The app exited cleanly (or with an unknown status)
    AppExited { pid: u32, status: ExitStatus },

    /// The app is confirmed running and exit-on-startup was requested
    StartupConfirmed { pid: u32 },

    SessionFailed { reason: String },

    LaunchFailed { reason: String },

    TimedOut { after: Duration },

    /// The app died with a failing status
    AppCrashed { pid: u32, status: ExitStatus },

    Interrupted,
}

impl TerminationReason {
    /// `None` for successful outcomes
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TerminationReason::AppExited { .. } | TerminationReason::StartupConfirmed { .. } => None,
            TerminationReason::SessionFailed { .. } => Some(FailureKind::Session),
            TerminationReason::LaunchFailed { .. } => Some(FailureKind::Launch),
            TerminationReason::TimedOut { .. } => Some(FailureKind::Timeout),
            TerminationReason::AppCrashed { .. } => Some(FailureKind::RuntimeCrash),
            TerminationReason::Interrupted => Some(FailureKind::Interrupted),
        }
    }

    /// An error outcome, as opposed to success or a user interrupt
    pub fn is_error(&self) -> bool {
        self.failure_kind().is_some_and(FailureKind::is_error)
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind()
            .map(FailureKind::exit_code)
            .unwrap_or(EXIT_SUCCESS)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::AppExited { pid, status } => match status.code {
                Some(code) => write!(f, "app (pid {}) exited with code {}", pid, code),
                None => write!(f, "app (pid {}) exited", pid),
            },
            TerminationReason::StartupConfirmed { pid } => {
                write!(f, "app (pid {}) is running, exiting on startup", pid)
            }
            TerminationReason::SessionFailed { reason } => {
                write!(f, "simulator session failed: {}", reason)
            }
            TerminationReason::LaunchFailed { reason } => write!(f, "app launch failed: {}", reason),
            TerminationReason::TimedOut { after } => {
                write!(f, "timed out after {:.1}s", after.as_secs_f64())
            }
            TerminationReason::AppCrashed { pid, status } => match (status.code, status.signal) {
                (_, Some(signal)) => write!(f, "app (pid {}) killed by signal {}", pid, signal),
                (Some(code), None) => write!(f, "app (pid {}) crashed with code {}", pid, code),
                (None, None) => write!(f, "app (pid {}) crashed", pid),
            },
            TerminationReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub state: SupervisorState,
    pub reason: Option<TerminationReason>,
    pub exit_code: i32,
    pub simulator_pid: Option<u32>,
    pub app_pid: Option<u32>,
}

impl SupervisorReport {
    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}
