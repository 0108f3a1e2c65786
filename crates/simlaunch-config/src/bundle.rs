//! App bundle inspection

use std::path::{Path, PathBuf};
use std::process::Command;

/// Reads metadata out of an app bundle
pub trait BundleInspector: Send + Sync {
    /// The bundle's `CFBundleIdentifier`, `Ok(None)` when the bundle has none
    fn bundle_identifier(&self, app_path: &Path) -> Result<Option<String>, String>;
}

impl<F> BundleInspector for F
where
    F: Fn(&Path) -> Result<Option<String>, String> + Send + Sync,
{
    fn bundle_identifier(&self, app_path: &Path) -> Result<Option<String>, String> {
        self(app_path)
    }
}

/// Inspector backed by `plutil`, which reads both XML and binary plists
#[derive(Debug, Clone, Copy, Default)]
pub struct PlutilInspector;

impl BundleInspector for PlutilInspector {
    fn bundle_identifier(&self, app_path: &Path) -> Result<Option<String>, String> {
        let plist = app_path.join("Info.plist");
        if !plist.is_file() {
            return Ok(None);
        }

        let output = Command::new("plutil")
            .args(["-extract", "CFBundleIdentifier", "raw", "-o", "-"])
            .arg(&plist)
            .output()
            .map_err(|e| format!("failed to run plutil: {}", e))?;

        if !output.status.success() {
            // plutil exits non-zero when the key is absent
            return Ok(None);
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if id.is_empty() { None } else { Some(id) })
    }
}

/// Find the watch companion bundle embedded in `<app>/Watch/`.
///
/// When several are present the first in name order wins.
pub fn find_companion_app(app_path: &Path) -> Option<PathBuf> {
    let watch_dir = app_path.join("Watch");
    let entries = std::fs::read_dir(&watch_dir).ok()?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.extension().is_some_and(|ext| ext == "app"))
        .collect();

    candidates.sort();
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn companion_found_in_watch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("App.app");
        std::fs::create_dir_all(app.join("Watch/Zeta WatchKit App.app")).unwrap();
        std::fs::create_dir_all(app.join("Watch/Alpha WatchKit App.app")).unwrap();
        std::fs::write(app.join("Watch/notes.txt"), "x").unwrap();

        let found = find_companion_app(&app).unwrap();
        assert!(found.ends_with("Alpha WatchKit App.app"));
    }

    #[test]
    fn no_watch_dir_means_no_companion() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("App.app");
        std::fs::create_dir_all(&app).unwrap();

        assert!(find_companion_app(&app).is_none());
    }

    #[test]
    fn closures_are_inspectors() {
        let inspector = |_: &Path| -> Result<Option<String>, String> {
            Ok(Some("com.example.App".to_string()))
        };
        assert_eq!(
            inspector.bundle_identifier(Path::new("/tmp/App.app")),
            Ok(Some("com.example.App".to_string()))
        );
    }

    #[test]
    fn plutil_skips_missing_plist() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(PlutilInspector.bundle_identifier(dir.path()), Ok(None));
    }
}
