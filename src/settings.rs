//! Settings document for the transport and the capture relay
//!
//! Both collaborators' settings are stored in one TOML document:
//! ```toml
//! [transport]
//! host = "127.0.0.1"
//! port = 4490
//!
//! [capture]
//! port = 3490
//! ecu_id = "ROBO"
//! ```

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureSettings;
use crate::common::{Error, Result};
use crate::transport::TransportSettings;

/// Root of the settings document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub capture: CaptureSettings,
}

/// Read a settings document
pub fn read_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
    let settings: Settings =
        toml::from_str(&content).map_err(|e| Error::SettingsParse(e.to_string()))?;
    tracing::debug!(path = %path.display(), "Read settings");
    Ok(settings)
}

/// Write a settings document to any sink
pub fn write_settings<W: Write>(settings: &Settings, sink: &mut W) -> Result<()> {
    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::Internal(format!("Failed to serialize settings: {}", e)))?;
    sink.write_all(content.as_bytes())?;
    sink.flush()?;
    Ok(())
}
