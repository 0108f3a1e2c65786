//! Launch input validation

use simlaunch_device_api::WatchLaunchMode;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::BundleInspector;

/// Prefix of full device type identifiers
pub const DEVICE_TYPE_PREFIX: &str = "com.apple.CoreSimulator.SimDeviceType.";

/// Prefix of full runtime identifiers
pub const RUNTIME_PREFIX: &str = "com.apple.CoreSimulator.SimRuntime.";

/// Device type used when neither the CLI nor the defaults file names one
pub const DEFAULT_DEVICE_TYPE: &str = "com.apple.CoreSimulator.SimDeviceType.iPhone-15";

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("nothing to launch: give an app path or --bundle-id")]
    NothingToLaunch,

    #[error("app bundle not found: {0}")]
    AppNotFound(PathBuf),

    #[error("not a readable app bundle: {0}")]
    NotABundle(PathBuf),

    #[error("app at {app_path} has bundle id '{found}', not '{expected}'")]
    BundleIdMismatch {
        app_path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("watch launch mode '{mode}' needs a companion app, none found{}", .app_path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    MissingCompanion {
        mode: WatchLaunchMode,
        app_path: Option<PathBuf>,
    },

    #[error("companion app {app_path} has no readable bundle identifier: {message}")]
    CompanionBundleId { app_path: PathBuf, message: String },

    #[error("invalid notification payload {path}: {message}")]
    InvalidNotificationPayload { path: PathBuf, message: String },

    #[error("invalid timeout '{0}': must be between 0 and 31536000 seconds")]
    InvalidTimeout(String),

    #[error("invalid environment entry '{0}': expected KEY=VALUE")]
    InvalidEnv(String),

    #[error("duplicate environment key '{0}'")]
    DuplicateEnvKey(String),

    #[error("invalid {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("--{0} and --{1} cannot be combined")]
    ConflictingFlags(&'static str, &'static str),
}

/// Parse `KEY=VALUE` entries into a map, rejecting empty and duplicate keys
pub fn parse_environment(entries: &[String]) -> Result<BTreeMap<String, String>, Vec<ValidationError>> {
    let mut env = BTreeMap::new();
    let mut errors = Vec::new();

    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                if env.insert(key.to_string(), value.to_string()).is_some() {
                    errors.push(ValidationError::DuplicateEnvKey(key.to_string()));
                }
            }
            _ => errors.push(ValidationError::InvalidEnv(entry.clone())),
        }
    }

    if errors.is_empty() { Ok(env) } else { Err(errors) }
}

/// Longest accepted timeout: one year
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Convert seconds to a timeout; 0 means no timeout
pub fn parse_timeout(seconds: f64) -> Result<Duration, ValidationError> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(timeout) if timeout <= MAX_TIMEOUT => Ok(timeout),
        _ => Err(ValidationError::InvalidTimeout(seconds.to_string())),
    }
}

/// Split `"<type>[, <runtime version>]"` and expand short type names.
pub fn parse_device_type(raw: &str) -> Result<(String, Option<String>), ValidationError> {
    let (type_part, version) = match raw.split_once(',') {
        Some((t, v)) => (t.trim(), Some(v.trim().to_string()).filter(|v| !v.is_empty())),
        None => (raw.trim(), None),
    };

    if type_part.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "device type",
            message: format!("'{}' has no device type", raw),
        });
    }

    let device_type_id = if type_part.starts_with(DEVICE_TYPE_PREFIX) {
        type_part.to_string()
    } else {
        format!("{}{}", DEVICE_TYPE_PREFIX, type_part.replace(' ', "-"))
    };

    Ok((device_type_id, version))
}

/// Turn an SDK version (`17.2`, `watchOS 10.2`) into a runtime identifier.
///
/// Full identifiers pass through unchanged. A bare version means iOS.
pub fn runtime_from_sdk(sdk: &str) -> Result<String, ValidationError> {
    let sdk = sdk.trim();
    if sdk.starts_with(RUNTIME_PREFIX) {
        return Ok(sdk.to_string());
    }

    let (platform, version) = match sdk.find(|c: char| c.is_ascii_digit()) {
        Some(0) => ("iOS", sdk),
        Some(idx) => (sdk[..idx].trim_end_matches([' ', '-']), &sdk[idx..]),
        None => ("", ""),
    };

    let valid_version = !version.is_empty()
        && version.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));

    if platform.is_empty() || !valid_version {
        return Err(ValidationError::InvalidValue {
            field: "sdk",
            message: format!("'{}' is not a runtime version like 17.2", sdk),
        });
    }

    Ok(format!("{}{}-{}", RUNTIME_PREFIX, platform, version.replace('.', "-")))
}

/// Check that `app_path` is a readable bundle directory
pub fn validate_bundle_path(app_path: &Path) -> Result<(), ValidationError> {
    if !app_path.exists() {
        return Err(ValidationError::AppNotFound(app_path.to_path_buf()));
    }
    if !app_path.is_dir() || std::fs::read_dir(app_path).is_err() {
        return Err(ValidationError::NotABundle(app_path.to_path_buf()));
    }
    Ok(())
}

/// Read a notification payload file; it must hold a JSON object.
///
/// Returns the payload re-serialized compactly.
pub fn read_notification_payload(path: &Path) -> Result<String, ValidationError> {
    let invalid = |message: String| ValidationError::InvalidNotificationPayload {
        path: path.to_path_buf(),
        message,
    };

    let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    if !value.is_object() {
        return Err(invalid("expected a JSON object".into()));
    }
    Ok(value.to_string())
}

/// Identifier of a companion bundle; unlike the primary app it must be known
pub fn companion_bundle_identifier(
    watch_path: &Path,
    inspector: &dyn BundleInspector,
) -> Result<String, ValidationError> {
    match inspector.bundle_identifier(watch_path) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(ValidationError::CompanionBundleId {
            app_path: watch_path.to_path_buf(),
            message: "Info.plist has no CFBundleIdentifier".into(),
        }),
        Err(message) => Err(ValidationError::CompanionBundleId {
            app_path: watch_path.to_path_buf(),
            message,
        }),
    }
}

/// Read the bundle's identifier and compare it to the requested one.
///
/// Returns the identifier that was read, if any. An inspector failure is not
/// a validation error; the identifier just stays unknown.
pub fn check_bundle_identifier(
    app_path: &Path,
    expected: Option<&str>,
    inspector: &dyn BundleInspector,
) -> Result<Option<String>, ValidationError> {
    let found = match inspector.bundle_identifier(app_path) {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(app_path = %app_path.display(), error = %e, "Could not read bundle identifier");
            None
        }
    };

    if let (Some(expected), Some(found)) = (expected, found.as_deref())
        && expected != found
    {
        return Err(ValidationError::BundleIdMismatch {
            app_path: app_path.to_path_buf(),
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }

    Ok(found)
}
