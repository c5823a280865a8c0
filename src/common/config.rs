//! Application configuration file handling
//!
//! Autoload files, run defaults and output locations. The configuration is
//! loaded once in `main` and passed to whoever needs it.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::{config_path, DEFAULT_REPORTS_DIR};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Files loaded at startup
    #[serde(default)]
    pub autoload: Autoload,

    /// Default run parameters
    #[serde(default)]
    pub run: RunDefaults,

    /// Report output settings
    #[serde(default)]
    pub reports: ReportConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Files loaded automatically when the robot starts
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Autoload {
    /// Settings document with transport and capture settings
    pub settings: Option<PathBuf>,

    /// Test definition file
    pub tests: Option<PathBuf>,
}

/// Default run parameters
#[derive(Debug, Deserialize)]
pub struct RunDefaults {
    /// Start the tests right after loading
    #[serde(default)]
    pub autostart: bool,

    /// How often the whole selection is repeated
    #[serde(default = "default_repeat")]
    pub suite_repeat: u32,

    /// How often each test is repeated in a row
    #[serde(default = "default_repeat")]
    pub test_repeat: u32,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            autostart: false,
            suite_repeat: default_repeat(),
            test_repeat: default_repeat(),
        }
    }
}

fn default_repeat() -> u32 {
    1
}

/// Report configuration
#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    /// Directory receiving reports and capture files
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: default_reports_dir(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from(DEFAULT_REPORTS_DIR)
}

/// Logging configuration
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| super::Error::file_read(path, &e))?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.run.suite_repeat, 1);
        assert_eq!(config.run.test_repeat, 1);
        assert!(!config.run.autostart);
        assert_eq!(config.reports.dir, PathBuf::from("reports"));
        assert!(config.autoload.tests.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
[autoload]
settings = "robot.toml"
tests = "suite.yaml"

[run]
autostart = true
suite_repeat = 3
test_repeat = 2

[reports]
dir = "/tmp/reports"
"#,
        )
        .unwrap();

        assert_eq!(config.autoload.settings, Some(PathBuf::from("robot.toml")));
        assert_eq!(config.autoload.tests, Some(PathBuf::from("suite.yaml")));
        assert!(config.run.autostart);
        assert_eq!(config.run.suite_repeat, 3);
        assert_eq!(config.run.test_repeat, 2);
        assert_eq!(config.reports.dir, PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[run]\nsuite_repeat = \"many\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, super::super::Error::ConfigParse(_)));
    }
}
