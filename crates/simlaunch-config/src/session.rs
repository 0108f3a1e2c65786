//! Validated launch configuration

use simlaunch_device_api::{DeviceSelector, ExternalDisplayType, WatchLaunchMode};
use simlaunch_util::expand_path;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{
    BundleInspector, ConfigError, ConfigResult, DEFAULT_DEVICE_TYPE, LaunchDefaults,
    LaunchOptions, ValidationError, check_bundle_identifier, companion_bundle_identifier,
    find_companion_app, parse_device_type, parse_environment, parse_timeout,
    read_notification_payload, runtime_from_sdk, validate_bundle_path,
};

/// Companion (watch) app discovered inside the primary bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionApp {
    pub app_path: PathBuf,
    pub bundle_id: Option<String>,

    /// Validated JSON object to deliver once the companion runs
    pub notification_payload: Option<String>,
}

/// Immutable description of one launch
///
/// Built once per invocation by [`SessionConfig::build`]; nothing mutates it
/// after the session start has been requested.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bundle to install, absent when launching an installed app
    pub app_path: Option<PathBuf>,

    /// Identifier given on the command line
    pub launch_bundle_id: Option<String>,

    /// Identifier read from the bundle's Info.plist
    pub app_bundle_id: Option<String>,

    pub companion: Option<CompanionApp>,

    /// Child environment overrides (keys unique)
    pub environment: BTreeMap<String, String>,

    /// Argument vector for the launched process
    pub args: Vec<String>,

    pub device_type_id: String,

    /// Target runtime; `None` lets the device layer pick the newest
    pub runtime_id: Option<String>,

    pub external_display: Option<ExternalDisplayType>,
    pub watch_launch_mode: WatchLaunchMode,

    /// Zero means no timeout
    pub timeout: Duration,

    /// Keep supervising after the app exits
    pub keepalive: bool,

    /// Succeed as soon as the app is confirmed running
    pub exit_on_startup: bool,

    /// Force-stop the whole device when the run fails
    pub kill_sim_on_error: bool,

    pub show_installed_apps: bool,

    /// Where the app's stdout goes; `None` inherits ours
    pub stdout_path: Option<PathBuf>,

    /// Where the app's stderr goes; `None` inherits ours
    pub stderr_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Validate raw input and build the config.
    ///
    /// CLI values win over `defaults`. Every problem found is reported in a
    /// single [`ConfigError::ValidationFailed`].
    pub fn build(
        options: LaunchOptions,
        defaults: &LaunchDefaults,
        inspector: &dyn BundleInspector,
    ) -> ConfigResult<Self> {
        let mut errors = Vec::new();

        let app_path = options.app_path.as_ref().map(expand_path);
        if app_path.is_none() && options.launch_bundle_id.is_none() {
            errors.push(ValidationError::NothingToLaunch);
        }

        if options.keepalive && options.exit_on_startup {
            errors.push(ValidationError::ConflictingFlags("keepalive", "exit"));
        }

        let environment = parse_environment(&options.env).unwrap_or_else(|errs| {
            errors.extend(errs);
            BTreeMap::new()
        });

        let timeout = options
            .timeout_seconds
            .or(defaults.timeout_seconds)
            .map(parse_timeout)
            .transpose()
            .unwrap_or_else(|e| {
                errors.push(e);
                None
            })
            .unwrap_or(Duration::ZERO);

        let selector = resolve_device(
            options.device_type_id.as_deref(),
            options.sdk.as_deref(),
            defaults,
        )
        .unwrap_or_else(|errs| {
            errors.extend(errs);
            DeviceSelector {
                device_type_id: DEFAULT_DEVICE_TYPE.to_string(),
                runtime_id: None,
            }
        });

        let external_display = options
            .external_display_type
            .as_deref()
            .map(str::parse::<ExternalDisplayType>)
            .transpose()
            .unwrap_or_else(|message| {
                errors.push(ValidationError::InvalidValue {
                    field: "external display type",
                    message,
                });
                None
            });

        let watch_launch_mode = options
            .watch_launch_mode
            .as_deref()
            .map(str::parse::<WatchLaunchMode>)
            .transpose()
            .unwrap_or_else(|message| {
                errors.push(ValidationError::InvalidValue {
                    field: "watch launch mode",
                    message,
                });
                None
            })
            .unwrap_or_default();

        let notification_payload = match options.watch_notification_payload.as_ref().map(expand_path) {
            Some(_) if !watch_launch_mode.wants_companion() => {
                errors.push(ValidationError::InvalidValue {
                    field: "watch notification payload",
                    message: "needs --launch-watch-app alongside or exclusively".into(),
                });
                None
            }
            Some(path) => read_notification_payload(&path).map_err(|e| errors.push(e)).ok(),
            None => None,
        };

        let mut app_bundle_id = None;
        let mut companion = None;
        match &app_path {
            Some(path) => match validate_bundle_path(path) {
                Ok(()) => {
                    match check_bundle_identifier(path, options.launch_bundle_id.as_deref(), inspector) {
                        Ok(found) => app_bundle_id = found,
                        Err(e) => errors.push(e),
                    }

                    if watch_launch_mode.wants_companion() {
                        match find_companion_app(path) {
                            Some(watch_path) => {
                                match companion_bundle_identifier(&watch_path, inspector) {
                                    Ok(bundle_id) => {
                                        companion = Some(CompanionApp {
                                            app_path: watch_path,
                                            bundle_id: Some(bundle_id),
                                            notification_payload,
                                        })
                                    }
                                    Err(e) => errors.push(e),
                                }
                            }
                            None => errors.push(ValidationError::MissingCompanion {
                                mode: watch_launch_mode,
                                app_path: Some(path.clone()),
                            }),
                        }
                    }
                }
                Err(e) => errors.push(e),
            },
            None if watch_launch_mode.wants_companion() => {
                errors.push(ValidationError::MissingCompanion {
                    mode: watch_launch_mode,
                    app_path: None,
                });
            }
            None => {}
        }

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed { errors });
        }

        Ok(Self {
            app_path,
            launch_bundle_id: options.launch_bundle_id,
            app_bundle_id,
            companion,
            environment,
            args: options.args,
            device_type_id: selector.device_type_id,
            runtime_id: selector.runtime_id,
            external_display,
            watch_launch_mode,
            timeout,
            keepalive: options.keepalive,
            exit_on_startup: options.exit_on_startup,
            kill_sim_on_error: options.kill_sim_on_error || defaults.kill_sim_on_error.unwrap_or(false),
            show_installed_apps: options.show_installed_apps,
            stdout_path: options.stdout_path.map(expand_path),
            stderr_path: options.stderr_path.map(expand_path),
        })
    }

    /// Identifier to launch: the explicit one, else the one read from the bundle
    pub fn bundle_id(&self) -> Option<&str> {
        self.launch_bundle_id
            .as_deref()
            .or(self.app_bundle_id.as_deref())
    }

    /// Selector for acquiring the target device
    pub fn device_selector(&self) -> DeviceSelector {
        DeviceSelector {
            device_type_id: self.device_type_id.clone(),
            runtime_id: self.runtime_id.clone(),
        }
    }

    /// Whether a timeout is armed
    pub fn has_timeout(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// Resolve the target device from CLI values, falling back to `defaults`.
///
/// A runtime given with `sdk` wins over one embedded in the device type
/// (`"iPhone-15, 17.2"`), which wins over the default SDK.
pub fn resolve_device(
    device_type: Option<&str>,
    sdk: Option<&str>,
    defaults: &LaunchDefaults,
) -> Result<DeviceSelector, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let raw_device_type = device_type
        .or(defaults.device_type_id.as_deref())
        .unwrap_or(DEFAULT_DEVICE_TYPE);
    let (device_type_id, type_runtime) = match parse_device_type(raw_device_type) {
        Ok(parsed) => parsed,
        Err(e) => {
            errors.push(e);
            (DEFAULT_DEVICE_TYPE.to_string(), None)
        }
    };

    let sdk = sdk
        .map(str::to_string)
        .or(type_runtime)
        .or_else(|| defaults.sdk.clone());
    let runtime_id = match sdk {
        Some(sdk) => match runtime_from_sdk(&sdk) {
            Ok(id) => Some(id),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        None => None,
    };

    if errors.is_empty() {
        Ok(DeviceSelector {
            device_type_id,
            runtime_id,
        })
    } else {
        Err(errors)
    }
}
