//! Parsing `simctl list ... -j` and `simctl listapps` output

use serde::Deserialize;
use simlaunch_device_api::{DeviceError, DeviceResult, DeviceTypeInfo, InstalledApp, RuntimeInfo};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

/// One simulated device from `simctl list devices -j`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    pub udid: String,
    pub name: String,
    pub state: SimState,
    pub device_type_id: Option<String>,
    pub runtime_id: String,
    pub available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Shutdown,
    Booting,
    Booted,
    ShuttingDown,
    Unknown,
}

impl From<&str> for SimState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "shutdown" => SimState::Shutdown,
            "booting" => SimState::Booting,
            "booted" => SimState::Booted,
            "shutting down" => SimState::ShuttingDown,
            _ => SimState::Unknown,
        }
    }
}

/// A phone/watch pair from `simctl list pairs -j`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePair {
    pub pair_id: String,
    pub phone_udid: String,
    pub watch_udid: String,
    pub watch_state: SimState,
}

#[derive(Debug, Deserialize)]
struct DevicesJson {
    devices: HashMap<String, Vec<DeviceJson>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceJson {
    udid: String,
    name: String,
    state: String,
    device_type_identifier: Option<String>,
    is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RuntimesJson {
    runtimes: Vec<RuntimeJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeJson {
    identifier: String,
    name: String,
    version: String,
    is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeviceTypesJson {
    devicetypes: Vec<DeviceTypeJson>,
}

#[derive(Debug, Deserialize)]
struct DeviceTypeJson {
    identifier: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PairsJson {
    pairs: HashMap<String, PairJson>,
}

#[derive(Debug, Deserialize)]
struct PairJson {
    watch: PairMemberJson,
    phone: PairMemberJson,
}

#[derive(Debug, Deserialize)]
struct PairMemberJson {
    udid: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct AppJson {
    #[serde(rename = "CFBundleIdentifier")]
    bundle_id: Option<String>,
    #[serde(rename = "CFBundleDisplayName")]
    display_name: Option<String>,
    #[serde(rename = "CFBundleName")]
    bundle_name: Option<String>,
    #[serde(rename = "Path")]
    path: Option<PathBuf>,
    #[serde(rename = "ApplicationType")]
    app_type: Option<String>,
}

fn parse<T: for<'de> Deserialize<'de>>(what: &str, json: &str) -> DeviceResult<T> {
    serde_json::from_str(json).map_err(|e| DeviceError::Parse {
        what: what.to_string(),
        message: e.to_string(),
    })
}

/// Parse `simctl list devices -j`
pub fn parse_devices(json: &str) -> DeviceResult<Vec<SimDevice>> {
    let parsed: DevicesJson = parse("simctl device list", json)?;

    let mut devices: Vec<SimDevice> = parsed
        .devices
        .into_iter()
        .flat_map(|(runtime_id, devices)| {
            devices.into_iter().map(move |d| SimDevice {
                udid: d.udid,
                name: d.name,
                state: SimState::from(d.state.as_str()),
                device_type_id: d.device_type_identifier,
                runtime_id: runtime_id.clone(),
                available: d.is_available != Some(false),
            })
        })
        .collect();

    devices.sort_by(|a, b| {
        compare_runtimes(&b.runtime_id, &a.runtime_id).then_with(|| a.name.cmp(&b.name))
    });
    Ok(devices)
}

/// Parse `simctl list runtimes -j`
pub fn parse_runtimes(json: &str) -> DeviceResult<Vec<RuntimeInfo>> {
    let parsed: RuntimesJson = parse("simctl runtime list", json)?;
    Ok(parsed
        .runtimes
        .into_iter()
        .map(|r| RuntimeInfo {
            identifier: r.identifier,
            name: r.name,
            version: r.version,
            available: r.is_available != Some(false),
        })
        .collect())
}

/// Parse `simctl list devicetypes -j`
pub fn parse_device_types(json: &str) -> DeviceResult<Vec<DeviceTypeInfo>> {
    let parsed: DeviceTypesJson = parse("simctl device type list", json)?;
    Ok(parsed
        .devicetypes
        .into_iter()
        .map(|t| DeviceTypeInfo {
            identifier: t.identifier,
            name: t.name,
        })
        .collect())
}

/// Parse `simctl list pairs -j`
pub fn parse_pairs(json: &str) -> DeviceResult<Vec<DevicePair>> {
    let parsed: PairsJson = parse("simctl pair list", json)?;
    let mut pairs: Vec<DevicePair> = parsed
        .pairs
        .into_iter()
        .map(|(pair_id, pair)| DevicePair {
            pair_id,
            phone_udid: pair.phone.udid,
            watch_udid: pair.watch.udid,
            watch_state: SimState::from(pair.watch.state.as_str()),
        })
        .collect();
    pairs.sort_by(|a, b| a.pair_id.cmp(&b.pair_id));
    Ok(pairs)
}

/// Parse `simctl listapps` output after conversion to JSON
pub fn parse_installed_apps(json: &str) -> DeviceResult<Vec<InstalledApp>> {
    let parsed: HashMap<String, AppJson> = parse("installed app list", json)?;
    let mut apps: Vec<InstalledApp> = parsed
        .into_iter()
        .map(|(key, app)| InstalledApp {
            bundle_id: app.bundle_id.unwrap_or(key),
            name: app.display_name.or(app.bundle_name),
            path: app.path,
            app_type: app.app_type,
        })
        .collect();
    apps.sort_by(|a, b| a.bundle_id.cmp(&b.bundle_id));
    Ok(apps)
}

/// Parse the `<bundle-id>: <pid>` line printed by `simctl launch`
pub fn parse_launch_pid(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| line.rsplit_once(':'))
        .find_map(|(_, pid)| pid.trim().parse().ok())
}

/// Numeric version components of a runtime identifier
///
/// "com.apple.CoreSimulator.SimRuntime.iOS-17-2" -> [17, 2]
pub fn runtime_version(identifier: &str) -> Vec<u32> {
    let suffix = identifier
        .strip_prefix(RUNTIME_PREFIX)
        .unwrap_or(identifier);
    suffix
        .split('-')
        .skip(1)
        .map_while(|part| part.parse().ok())
        .collect()
}

/// Order runtimes by version, oldest first
pub fn compare_runtimes(a: &str, b: &str) -> Ordering {
    runtime_version(a)
        .cmp(&runtime_version(b))
        .then_with(|| a.cmp(b))
}

/// Pick the device to run on.
///
/// Only available devices of `device_type_id` qualify. With no runtime given,
/// the newest runtime wins. A booted device is preferred within a runtime.
pub fn select_device<'a>(
    devices: &'a [SimDevice],
    device_type_id: &str,
    runtime_id: Option<&str>,
) -> Option<&'a SimDevice> {
    devices
        .iter()
        .filter(|d| d.available && d.device_type_id.as_deref() == Some(device_type_id))
        .filter(|d| runtime_id.is_none_or(|r| d.runtime_id == r))
        .max_by(|a, b| {
            compare_runtimes(&a.runtime_id, &b.runtime_id)
                .then_with(|| (a.state == SimState::Booted).cmp(&(b.state == SimState::Booted)))
                .then_with(|| b.name.cmp(&a.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICES: &str = r#"{
        "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
                {
                    "udid": "OLD-15",
                    "name": "iPhone 15",
                    "state": "Shutdown",
                    "isAvailable": true,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15"
                }
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-17-2": [
                {
                    "udid": "NEW-15-A",
                    "name": "iPhone 15",
                    "state": "Shutdown",
                    "isAvailable": true,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15"
                },
                {
                    "udid": "NEW-15-B",
                    "name": "iPhone 15 (2)",
                    "state": "Booted",
                    "isAvailable": true,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15"
                },
                {
                    "udid": "BROKEN",
                    "name": "iPhone 15 Pro",
                    "state": "Shutdown",
                    "isAvailable": false,
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro"
                }
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-17-10": []
        }
    }"#;

    const IPHONE_15: &str = "com.apple.CoreSimulator.SimDeviceType.iPhone-15";

    #[test]
    fn devices_are_flattened_newest_runtime_first() {
        let devices = parse_devices(DEVICES).unwrap();
        assert_eq!(devices.len(), 4);
        assert_eq!(devices[0].runtime_id, "com.apple.CoreSimulator.SimRuntime.iOS-17-2");
        assert_eq!(devices.last().unwrap().udid, "OLD-15");
        assert!(!devices.iter().find(|d| d.udid == "BROKEN").unwrap().available);
    }

    #[test]
    fn newest_runtime_and_booted_device_preferred() {
        let devices = parse_devices(DEVICES).unwrap();
        let picked = select_device(&devices, IPHONE_15, None).unwrap();
        assert_eq!(picked.udid, "NEW-15-B");
    }

    #[test]
    fn explicit_runtime_is_honoured() {
        let devices = parse_devices(DEVICES).unwrap();
        let picked = select_device(
            &devices,
            IPHONE_15,
            Some("com.apple.CoreSimulator.SimRuntime.iOS-16-4"),
        )
        .unwrap();
        assert_eq!(picked.udid, "OLD-15");
    }

    #[test]
    fn unavailable_devices_never_match() {
        let devices = parse_devices(DEVICES).unwrap();
        assert!(select_device(&devices, "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro", None).is_none());
    }

    #[test]
    fn runtime_versions_compare_numerically() {
        assert_eq!(
            runtime_version("com.apple.CoreSimulator.SimRuntime.watchOS-10-5"),
            vec![10, 5]
        );
        assert_eq!(
            compare_runtimes(
                "com.apple.CoreSimulator.SimRuntime.iOS-17-10",
                "com.apple.CoreSimulator.SimRuntime.iOS-17-2"
            ),
            Ordering::Greater
        );
    }

    #[test]
    fn runtimes_and_device_types() {
        let runtimes = parse_runtimes(
            r#"{"runtimes": [
                {"identifier": "com.apple.CoreSimulator.SimRuntime.iOS-17-2",
                 "name": "iOS 17.2", "version": "17.2", "isAvailable": true,
                 "buildversion": "21C62"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(runtimes[0].name, "iOS 17.2");
        assert!(runtimes[0].available);

        let types = parse_device_types(
            r#"{"devicetypes": [
                {"identifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15",
                 "name": "iPhone 15", "productFamily": "iPhone"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(types[0].identifier, IPHONE_15);
    }

    #[test]
    fn pairs() {
        let pairs = parse_pairs(
            r#"{"pairs": {
                "PAIR-1": {
                    "watch": {"name": "Apple Watch", "udid": "WATCH-1", "state": "Shutdown"},
                    "phone": {"name": "iPhone 15", "udid": "NEW-15-B", "state": "Booted"},
                    "state": "(active, disconnected)"
                }
            }}"#,
        )
        .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].phone_udid, "NEW-15-B");
        assert_eq!(pairs[0].watch_udid, "WATCH-1");
        assert_eq!(pairs[0].watch_state, SimState::Shutdown);
    }

    #[test]
    fn installed_apps_prefer_display_name() {
        let apps = parse_installed_apps(
            r#"{
                "com.example.App": {
                    "CFBundleIdentifier": "com.example.App",
                    "CFBundleDisplayName": "Example",
                    "CFBundleName": "ExampleApp",
                    "ApplicationType": "User",
                    "Path": "/data/Containers/Bundle/Application/X/App.app"
                },
                "com.apple.Preferences": {
                    "CFBundleName": "Settings",
                    "ApplicationType": "System"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(apps[0].bundle_id, "com.apple.Preferences");
        assert_eq!(apps[0].name.as_deref(), Some("Settings"));
        assert_eq!(apps[1].name.as_deref(), Some("Example"));
        assert_eq!(apps[1].app_type.as_deref(), Some("User"));
    }

    #[test]
    fn launch_pid_line() {
        assert_eq!(parse_launch_pid("com.example.App: 4242\n"), Some(4242));
        assert_eq!(parse_launch_pid("noise\ncom.example.App: 17"), Some(17));
        assert_eq!(parse_launch_pid("An error was encountered"), None);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse_devices("not json"),
            Err(DeviceError::Parse { .. })
        ));
    }
}
