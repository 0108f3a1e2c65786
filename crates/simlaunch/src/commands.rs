//! Read-only listing verbs

use anyhow::{Context, Result};
use simlaunch_config::{DEVICE_TYPE_PREFIX, LaunchDefaults, resolve_device};
use simlaunch_device_api::{DeviceAdapter, DeviceTypeInfo, InstalledApp, RuntimeInfo};
use std::io::Write;
use tracing::debug;

use crate::cli::DeviceArgs;

pub fn format_runtime(runtime: &RuntimeInfo) -> String {
    format!("{}\t{}\t{}", runtime.version, runtime.name, runtime.identifier)
}

/// The short form accepted by `--devicetypeid`
pub fn format_device_type(device_type: &DeviceTypeInfo) -> String {
    let short = device_type
        .identifier
        .strip_prefix(DEVICE_TYPE_PREFIX)
        .unwrap_or(&device_type.identifier);
    format!("{}\t{}", short, device_type.name)
}

pub fn format_installed_app(app: &InstalledApp) -> String {
    let mut line = app.bundle_id.clone();
    if let Some(name) = &app.name {
        line.push('\t');
        line.push_str(name);
    }
    if let Some(app_type) = &app.app_type {
        line.push_str(&format!(" ({})", app_type));
    }
    line
}

pub fn write_lines<T>(out: &mut impl Write, items: &[T], format: fn(&T) -> String) -> Result<()> {
    for item in items {
        writeln!(out, "{}", format(item)).context("Failed to write output")?;
    }
    Ok(())
}

fn ensure_can_list(adapter: &dyn DeviceAdapter) -> Result<()> {
    if !adapter.capabilities().can_list {
        anyhow::bail!("This device backend cannot list simulator contents");
    }
    Ok(())
}

/// `showsdks`: available runtimes
pub async fn show_sdks(adapter: &dyn DeviceAdapter, out: &mut impl Write) -> Result<()> {
    ensure_can_list(adapter)?;
    let runtimes: Vec<RuntimeInfo> = adapter
        .list_runtimes()
        .await
        .context("Failed to list runtimes")?
        .into_iter()
        .filter(|r| r.available)
        .collect();
    debug!(count = runtimes.len(), "Listed runtimes");
    write_lines(out, &runtimes, format_runtime)
}

/// `showdevicetypes`
pub async fn show_device_types(adapter: &dyn DeviceAdapter, out: &mut impl Write) -> Result<()> {
    ensure_can_list(adapter)?;
    let types = adapter
        .list_device_types()
        .await
        .context("Failed to list device types")?;
    debug!(count = types.len(), "Listed device types");
    write_lines(out, &types, format_device_type)
}

/// `showinstalledapps`: apps on the device `launch` would pick
pub async fn show_installed_apps(
    adapter: &dyn DeviceAdapter,
    device: &DeviceArgs,
    defaults: &LaunchDefaults,
    out: &mut impl Write,
) -> Result<()> {
    ensure_can_list(adapter)?;
    let selector = resolve_device(
        device.device_type_id.as_deref(),
        device.sdk.as_deref(),
        defaults,
    )
    .map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::anyhow!(messages.join("; "))
    })
    .context("Invalid device selection")?;

    let handle = adapter
        .acquire_device(&selector)
        .await
        .context("Failed to find a device")?;
    let apps = adapter
        .list_installed_apps(&handle)
        .await
        .with_context(|| format!("Failed to list apps on {}", handle.name))?;
    write_lines(out, &apps, format_installed_app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simlaunch_device_api::{DeviceCapabilities, MockDevice};

    fn output(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[tokio::test]
    async fn sdks_one_per_line() {
        let mut out = Vec::new();
        show_sdks(&MockDevice::new(), &mut out).await.unwrap();
        assert_eq!(
            output(out),
            "17.2\tiOS 17.2\tcom.apple.CoreSimulator.SimRuntime.iOS-17-2\n"
        );
    }

    #[tokio::test]
    async fn device_types_use_short_form() {
        let mut out = Vec::new();
        show_device_types(&MockDevice::new(), &mut out).await.unwrap();
        assert_eq!(output(out), "iPhone-15\tiPhone 15\n");
    }

    #[tokio::test]
    async fn installed_apps_on_selected_device() {
        let mut out = Vec::new();
        show_installed_apps(
            &MockDevice::new(),
            &DeviceArgs::default(),
            &LaunchDefaults::default(),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(output(out), "com.example.App\tApp (User)\n");
    }

    #[tokio::test]
    async fn bad_sdk_is_reported() {
        let mut out = Vec::new();
        let result = show_installed_apps(
            &MockDevice::new(),
            &DeviceArgs {
                device_type_id: None,
                sdk: Some("latest".into()),
            },
            &LaunchDefaults::default(),
            &mut out,
        )
        .await;
        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn listing_needs_capability() {
        let device = MockDevice::new().with_capabilities(DeviceCapabilities::minimal());
        let mut out = Vec::new();

        assert!(show_sdks(&device, &mut out).await.is_err());
        assert!(show_device_types(&device, &mut out).await.is_err());
        assert!(
            show_installed_apps(&device, &DeviceArgs::default(), &LaunchDefaults::default(), &mut out)
                .await
                .is_err()
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn acquire_failure_is_reported() {
        let device = MockDevice::new();
        *device.fail_acquire.lock().unwrap() = true;
        let mut out = Vec::new();

        let result = show_installed_apps(
            &device,
            &DeviceArgs::default(),
            &LaunchDefaults::default(),
            &mut out,
        )
        .await;
        assert!(result.is_err());
    }
}
