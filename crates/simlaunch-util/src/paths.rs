//! Default paths for simlaunch components
//!
//! Paths are user-writable by default:
//! - Config: `$SIMLAUNCH_CONFIG`, `$XDG_CONFIG_HOME/simlaunch/config.toml` or `~/.config/simlaunch/config.toml`
//! - Stdio FIFOs: `$XDG_RUNTIME_DIR/simlaunch` or `$TMPDIR/simlaunch-$USER`

use std::path::{Component, Path, PathBuf};

/// Environment variable for overriding the config file path
pub const SIMLAUNCH_CONFIG_ENV: &str = "SIMLAUNCH_CONFIG";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Application subdirectory name
const APP_DIR: &str = "simlaunch";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$SIMLAUNCH_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/simlaunch/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/simlaunch/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(SIMLAUNCH_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    config_path_without_env()
}

/// Get the config path without checking SIMLAUNCH_CONFIG env var.
pub fn config_path_without_env() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/tmp").join(APP_DIR).join(CONFIG_FILENAME)
}

/// Get the directory under which per-run FIFO directories are created.
///
/// Order of precedence:
/// 1. `$XDG_RUNTIME_DIR/simlaunch` (if XDG_RUNTIME_DIR is set)
/// 2. `$TMPDIR/simlaunch-$USER` (fallback, `/tmp` when TMPDIR is unset)
pub fn default_stdio_dir() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    std::env::temp_dir().join(format!("{}-{}", APP_DIR, username))
}

/// Expand a user-supplied path against the current working directory.
///
/// Absolute paths are normalised; relative paths are joined onto the cwd
/// first. Falls back to the path as given if the cwd cannot be read.
pub fn expand_path(path: impl AsRef<Path>) -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => expand_path_from(&cwd, path),
        Err(_) => normalize(path.as_ref()),
    }
}

/// Expand `path` against an explicit base directory.
pub fn expand_path_from(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Lexically fold `.` and `..` components. Does not touch the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_simlaunch() {
        let path = config_path_without_env();
        assert!(path.to_string_lossy().contains("simlaunch"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn stdio_dir_contains_simlaunch() {
        let path = default_stdio_dir();
        assert!(path.to_string_lossy().contains("simlaunch"));
    }

    #[test]
    fn absolute_paths_are_normalized() {
        let base = Path::new("/ignored");
        assert_eq!(
            expand_path_from(base, "/tmp/./build/../App.app"),
            PathBuf::from("/tmp/App.app")
        );
    }

    #[test]
    fn relative_paths_join_base() {
        let base = Path::new("/Users/dev/project");
        assert_eq!(
            expand_path_from(base, "build/Debug/App.app"),
            PathBuf::from("/Users/dev/project/build/Debug/App.app")
        );
        assert_eq!(
            expand_path_from(base, "../other/App.app"),
            PathBuf::from("/Users/dev/other/App.app")
        );
    }

    #[test]
    fn parent_of_root_stays_at_root() {
        let base = Path::new("/");
        assert_eq!(expand_path_from(base, "../../App.app"), PathBuf::from("/App.app"));
    }
}
