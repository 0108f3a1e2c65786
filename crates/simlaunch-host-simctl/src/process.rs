//! Running `xcrun simctl` and probing process liveness

use nix::errno::Errno;
use nix::sys::signal;
use nix::unistd::Pid;
use simlaunch_device_api::{DeviceError, DeviceResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Prefix simctl strips before handing variables to the launched app
pub const SIMCTL_CHILD_ENV_PREFIX: &str = "SIMCTL_CHILD_";

/// Captured output of one tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Failed, but with a message matching one of `benign`
    pub fn failed_with(&self, benign: &[&str]) -> bool {
        !self.success && benign.iter().any(|m| self.stderr.contains(m))
    }
}

/// Runs `<program> simctl ...`
#[derive(Debug, Clone)]
pub struct Simctl {
    program: PathBuf,
}

impl Simctl {
    pub fn new() -> Self {
        Self::with_program("xcrun")
    }

    /// Use another front end than `xcrun` (tests, custom toolchains)
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// A dropped run (aborted session worker) kills the tool with it
    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("simctl")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run and capture output whatever the exit status
    pub async fn output(&self, args: &[&str]) -> DeviceResult<ToolOutput> {
        self.output_with_env(args, &BTreeMap::new()).await
    }

    /// Run with child environment variables forwarded through simctl
    pub async fn output_with_env(
        &self,
        args: &[&str],
        child_env: &BTreeMap<String, String>,
    ) -> DeviceResult<ToolOutput> {
        debug!(program = %self.program.display(), ?args, "Running simctl");

        let mut cmd = self.command(args);
        for (key, value) in child_env {
            cmd.env(format!("{}{}", SIMCTL_CHILD_ENV_PREFIX, key), value);
        }

        let output = cmd.output().await.map_err(|e| DeviceError::ToolFailed {
            tool: "simctl".into(),
            message: format!("could not run {}: {}", self.program.display(), e),
        })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and return stdout; a failing exit status is an error
    pub async fn run(&self, args: &[&str]) -> DeviceResult<String> {
        let output = self.output(args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(tool_failed(args, &output))
        }
    }

    /// Run with `input` on stdin; a failing exit status is an error
    pub async fn run_with_input(&self, args: &[&str], input: &str) -> DeviceResult<String> {
        debug!(program = %self.program.display(), ?args, "Running simctl with input");

        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DeviceError::ToolFailed {
                tool: "simctl".into(),
                message: format!("could not run {}: {}", self.program.display(), e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let output = ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if output.success {
            Ok(output.stdout)
        } else {
            Err(tool_failed(args, &output))
        }
    }

    /// Like [`Simctl::run`], but a failure whose stderr matches `benign` is fine
    pub async fn run_tolerating(&self, args: &[&str], benign: &[&str]) -> DeviceResult<String> {
        let output = self.output(args).await?;
        if output.success || output.failed_with(benign) {
            Ok(output.stdout)
        } else {
            Err(tool_failed(args, &output))
        }
    }
}

impl Default for Simctl {
    fn default() -> Self {
        Self::new()
    }
}

fn tool_failed(args: &[&str], output: &ToolOutput) -> DeviceError {
    let verb = args.first().copied().unwrap_or("simctl");
    DeviceError::ToolFailed {
        tool: format!("simctl {}", verb),
        message: output.stderr.trim().to_string(),
    }
}

/// Convert a property list on stdin to JSON with `plutil`
pub async fn plist_to_json(plist: &str) -> DeviceResult<String> {
    let mut child = Command::new("plutil")
        .args(["-convert", "json", "-o", "-", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(plist.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(DeviceError::ToolFailed {
            tool: "plutil".into(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether `pid` still exists. Permission errors count as alive.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;

    fn fake_xcrun(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("xcrun");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn our_own_pid_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }

    #[tokio::test]
    async fn run_passes_simctl_verb() {
        let dir = tempfile::tempdir().unwrap();
        let simctl = Simctl::with_program(fake_xcrun(dir.path(), r#"echo "$@""#));

        let out = simctl.run(&["list", "devices", "-j"]).await.unwrap();
        assert_eq!(out.trim(), "simctl list devices -j");
    }

    #[tokio::test]
    async fn failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let simctl = Simctl::with_program(fake_xcrun(
            dir.path(),
            "echo 'Unable to boot device in current state: Booted' >&2; exit 149",
        ));

        let err = simctl.run(&["boot", "ABC"]).await.unwrap_err();
        match err {
            DeviceError::ToolFailed { tool, message } => {
                assert_eq!(tool, "simctl boot");
                assert!(message.contains("current state: Booted"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let tolerated = simctl
            .run_tolerating(&["boot", "ABC"], &["current state: Booted"])
            .await;
        assert!(tolerated.is_ok());
    }

    #[tokio::test]
    async fn child_env_is_prefixed() {
        let dir = tempfile::tempdir().unwrap();
        let simctl = Simctl::with_program(fake_xcrun(dir.path(), r#"echo "$SIMCTL_CHILD_FOO""#));
        let env = BTreeMap::from([("FOO".to_string(), "bar".to_string())]);

        let out = simctl.output_with_env(&["launch"], &env).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "bar");
    }

    #[tokio::test]
    async fn input_reaches_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let simctl = Simctl::with_program(fake_xcrun(dir.path(), r#"echo "$@"; cat"#));

        let out = simctl
            .run_with_input(&["push", "ABC", "com.example.App", "-"], r#"{"aps":{}}"#)
            .await
            .unwrap();
        assert_eq!(out, "simctl push ABC com.example.App -\n{\"aps\":{}}");
    }

    #[tokio::test]
    async fn dropped_run_kills_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let simctl = Simctl::with_program(fake_xcrun(
            dir.path(),
            &format!("sleep 1; touch {}", marker.display()),
        ));

        let run = tokio::time::timeout(Duration::from_millis(100), simctl.output(&["launch"])).await;
        assert!(run.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_tool_error() {
        let simctl = Simctl::with_program("/nonexistent/xcrun");
        assert!(matches!(
            simctl.output(&["list"]).await,
            Err(DeviceError::ToolFailed { .. })
        ));
    }
}
