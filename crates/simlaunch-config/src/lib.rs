//! Launch configuration parsing and validation for simlaunch
//!
//! Supports:
//! - An optional TOML defaults file (versioned schema)
//! - Building an immutable [`SessionConfig`] from raw CLI input
//! - Validation with every problem reported at once
//! - App bundle inspection (bundle identifier, watch companion)

mod bundle;
mod schema;
mod session;
mod validation;

pub use bundle::*;
pub use schema::*;
pub use session::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid launch configuration: {}", format_errors(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Load launch defaults from a TOML file.
///
/// A missing file yields empty defaults unless `required` is set.
pub fn load_defaults(path: impl AsRef<Path>, required: bool) -> ConfigResult<LaunchDefaults> {
    let path = path.as_ref();
    if !required && !path.exists() {
        tracing::debug!(path = %path.display(), "No defaults file, using built-in defaults");
        return Ok(LaunchDefaults::default());
    }

    let content = std::fs::read_to_string(path)?;
    parse_defaults(&content)
}

/// Parse launch defaults from a TOML string
pub fn parse_defaults(content: &str) -> ConfigResult<LaunchDefaults> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    Ok(raw.defaults)
}
