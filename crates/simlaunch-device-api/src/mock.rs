//! Mock device adapter for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{
    DeviceAdapter, DeviceCapabilities, DeviceError, DeviceEvent, DeviceHandle,
    DeviceHandlePayload, DeviceResult, DeviceSelector, DeviceTypeInfo, ExitStatus, InstalledApp,
    LaunchRequest, RuntimeInfo, StopMode,
};

/// Mock device adapter for unit/integration testing
///
/// `start_session` replays the configured script onto the event channel, in
/// order. Tests can also push events by hand with [`MockDevice::emit`].
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    next_id: AtomicU64,
    event_tx: mpsc::UnboundedSender<DeviceEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
    script: Mutex<Vec<(Duration, DeviceEvent)>>,
    requests: Mutex<Vec<LaunchRequest>>,
    stops: Mutex<Vec<StopMode>>,
    shutdowns: AtomicUsize,
    running_pid: Mutex<Option<u32>>,

    /// Configure acquire to fail
    pub fail_acquire: Arc<Mutex<bool>>,

    /// Configure start_session to return an error
    pub fail_start: Arc<Mutex<bool>>,

    /// Configure stop_session to fail
    pub fail_stop: Arc<Mutex<bool>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            capabilities: DeviceCapabilities::full(),
            next_id: AtomicU64::new(1),
            event_tx: tx,
            event_rx: Mutex::new(Some(rx)),
            script: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            running_pid: Mutex::new(None),
            fail_acquire: Arc::new(Mutex::new(false)),
            fail_start: Arc::new(Mutex::new(false)),
            fail_stop: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_capabilities(mut self, caps: DeviceCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Events replayed immediately when a session is started
    pub fn with_script(self, events: Vec<DeviceEvent>) -> Self {
        *self.script.lock().unwrap() = events.into_iter().map(|e| (Duration::ZERO, e)).collect();
        self
    }

    /// Events replayed after a delay (measured from session start)
    pub fn with_timed_script(self, events: Vec<(Duration, DeviceEvent)>) -> Self {
        *self.script.lock().unwrap() = events;
        self
    }

    /// A script for a clean run: session starts, app launches, app exits
    pub fn happy_path(pid: u32, status: ExitStatus) -> Self {
        Self::new().with_script(vec![
            DeviceEvent::SessionStarted {
                simulator_pid: Some(7),
            },
            DeviceEvent::AppLaunched { pid },
            DeviceEvent::ProcessDied { pid, status },
        ])
    }

    /// Push an event as if the device layer had delivered it
    pub fn emit(&self, event: DeviceEvent) {
        self.track(&event);
        let _ = self.event_tx.send(event);
    }

    /// Launch requests received so far
    pub fn start_requests(&self) -> Vec<LaunchRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Stop modes received so far, in call order
    pub fn stop_calls(&self) -> Vec<StopMode> {
        self.stops.lock().unwrap().clone()
    }

    /// Number of whole-device shutdowns requested
    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn track(&self, event: &DeviceEvent) {
        let mut running = self.running_pid.lock().unwrap();
        match event {
            DeviceEvent::AppLaunched { pid } => *running = Some(*pid),
            DeviceEvent::ProcessDied { pid, .. } if *running == Some(*pid) => *running = None,
            _ => {}
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceAdapter for MockDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    async fn acquire_device(&self, selector: &DeviceSelector) -> DeviceResult<DeviceHandle> {
        if *self.fail_acquire.lock().unwrap() {
            return Err(DeviceError::NoMatchingDevice {
                device_type_id: selector.device_type_id.clone(),
                runtime: selector.runtime_id.clone().unwrap_or_else(|| "latest".into()),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceHandle::new(
            format!("Mock {}", selector.device_type_id),
            DeviceHandlePayload::Mock { id },
        ))
    }

    async fn start_session(&self, _device: &DeviceHandle, request: LaunchRequest) -> DeviceResult<()> {
        if *self.fail_start.lock().unwrap() {
            return Err(DeviceError::StartFailed("Mock start failure".into()));
        }

        self.requests.lock().unwrap().push(request);

        let script = self.script.lock().unwrap().clone();
        for (delay, event) in script {
            if delay.is_zero() {
                self.emit(event);
            } else {
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(event);
                });
            }
        }

        Ok(())
    }

    async fn stop_session(&self, _device: &DeviceHandle, mode: StopMode) -> DeviceResult<()> {
        self.stops.lock().unwrap().push(mode);

        if *self.fail_stop.lock().unwrap() {
            return Err(DeviceError::StopFailed("Mock stop failure".into()));
        }

        // A real backend reports the terminated app; replay that as a late event
        if mode != StopMode::Detach {
            let pid = self.running_pid.lock().unwrap().take();
            if let Some(pid) = pid {
                let _ = self.event_tx.send(DeviceEvent::ProcessDied {
                    pid,
                    status: ExitStatus::signaled(15),
                });
            }
        }

        Ok(())
    }

    async fn shutdown_device(&self, _device: &DeviceHandle) -> DeviceResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> DeviceResult<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.event_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DeviceError::Internal("subscribe() can only be called once".into()))
    }

    async fn list_runtimes(&self) -> DeviceResult<Vec<RuntimeInfo>> {
        Ok(vec![RuntimeInfo {
            identifier: "com.apple.CoreSimulator.SimRuntime.iOS-17-2".into(),
            name: "iOS 17.2".into(),
            version: "17.2".into(),
            available: true,
        }])
    }

    async fn list_device_types(&self) -> DeviceResult<Vec<DeviceTypeInfo>> {
        Ok(vec![DeviceTypeInfo {
            identifier: "com.apple.CoreSimulator.SimDeviceType.iPhone-15".into(),
            name: "iPhone 15".into(),
        }])
    }

    async fn list_installed_apps(&self, _device: &DeviceHandle) -> DeviceResult<Vec<InstalledApp>> {
        Ok(vec![InstalledApp {
            bundle_id: "com.example.App".into(),
            name: Some("App".into()),
            path: None,
            app_type: Some("User".into()),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> DeviceSelector {
        DeviceSelector {
            device_type_id: "com.apple.CoreSimulator.SimDeviceType.iPhone-15".into(),
            runtime_id: None,
        }
    }

    #[tokio::test]
    async fn script_is_replayed_on_start() {
        let device = MockDevice::happy_path(42, ExitStatus::success());
        let mut rx = device.subscribe().unwrap();

        let handle = device.acquire_device(&selector()).await.unwrap();
        device
            .start_session(&handle, LaunchRequest::default())
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(DeviceEvent::SessionStarted { .. })));
        assert_eq!(rx.recv().await, Some(DeviceEvent::AppLaunched { pid: 42 }));
        assert!(matches!(rx.recv().await, Some(DeviceEvent::ProcessDied { pid: 42, .. })));
        assert_eq!(device.start_requests().len(), 1);
    }

    #[tokio::test]
    async fn stop_reports_running_app_as_dead() {
        let device = MockDevice::new().with_script(vec![DeviceEvent::AppLaunched { pid: 9 }]);
        let mut rx = device.subscribe().unwrap();
        let handle = device.acquire_device(&selector()).await.unwrap();

        device
            .start_session(&handle, LaunchRequest::default())
            .await
            .unwrap();
        device.stop_session(&handle, StopMode::Force).await.unwrap();

        assert_eq!(rx.recv().await, Some(DeviceEvent::AppLaunched { pid: 9 }));
        assert_eq!(
            rx.recv().await,
            Some(DeviceEvent::ProcessDied {
                pid: 9,
                status: ExitStatus::signaled(15)
            })
        );
        assert_eq!(device.stop_calls(), vec![StopMode::Force]);
    }

    #[tokio::test]
    async fn start_failure() {
        let device = MockDevice::new();
        *device.fail_start.lock().unwrap() = true;
        let handle = device.acquire_device(&selector()).await.unwrap();

        let result = device.start_session(&handle, LaunchRequest::default()).await;
        assert!(matches!(result, Err(DeviceError::StartFailed(_))));
    }

    #[test]
    fn subscribe_only_once() {
        let device = MockDevice::new();
        assert!(device.subscribe().is_ok());
        assert!(device.subscribe().is_err());
    }
}
