//! Configuration, log and report locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/dlt-test-robot/`
//! - macOS: `~/Library/Application Support/dlt-test-robot/`
//! - Windows: `%APPDATA%\dlt-test-robot\`

use std::io;
use std::path::{Path, PathBuf};

/// Project name used for all platform directories
const PROJECT_NAME: &str = "dlt-test-robot";

/// Default report directory, relative to the working directory
pub const DEFAULT_REPORTS_DIR: &str = "reports";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", PROJECT_NAME)
}

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Ensure the report directory exists and return it as an absolute path
///
/// Capture file directives carry absolute paths because the robot endpoint
/// does not share our working directory.
pub fn ensure_reports_dir(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_ensure_reports_dir_is_absolute() {
        let temp = tempfile::tempdir().unwrap();
        let dir = ensure_reports_dir(&temp.path().join("reports")).unwrap();
        assert!(dir.is_absolute());
        assert!(dir.exists());
    }
}
