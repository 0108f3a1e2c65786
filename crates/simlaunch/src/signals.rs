//! Host signal handling
//!
//! Handlers are installed before any FIFO exists, so a signal during setup
//! never falls through to the default disposition.

use anyhow::{Context, Result};
use simlaunch_core::InterruptHandle;
use std::future::Future;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info};

/// SIGINT, SIGTERM and SIGHUP streams
pub struct HostSignals {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl HostSignals {
    pub fn install() -> Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?,
            sighup: signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?,
        })
    }

    /// Wait for the next signal; returns its name
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sighup.recv() => "SIGHUP",
        }
    }

    /// Drive `fut` unless a signal arrives first; then `fut` is dropped
    pub async fn until_signal<F: Future>(&mut self, fut: F) -> Result<F::Output, &'static str> {
        tokio::select! {
            biased;
            name = self.recv() => Err(name),
            output = fut => Ok(output),
        }
    }

    /// Forward every signal to the supervisor
    pub async fn forward(mut self, handle: InterruptHandle) {
        loop {
            let name = self.recv().await;
            info!("Received {}", name);

            if !handle.interrupt() {
                debug!("Already terminating, ignoring signal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{Signal as NixSignal, raise};
    use std::time::Duration;

    #[tokio::test]
    async fn signal_interrupts_pending_work() {
        let mut signals = HostSignals::install().unwrap();
        raise(NixSignal::SIGHUP).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            signals.until_signal(std::future::pending::<()>()),
        )
        .await
        .unwrap();
        assert_eq!(result, Err("SIGHUP"));

        // Consumed; the next piece of work runs to completion
        assert_eq!(signals.until_signal(async { 7 }).await, Ok(7));
    }
}
