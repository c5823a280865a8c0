//! Names of the artifacts a run produces

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `yyyyMMdd_HHmmss` prefix shared by all artifacts of a run
pub fn stamp(at: &DateTime<Local>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

/// `<dir>/<stamp>_<label>_TestReport.txt`
pub fn report_path(dir: &Path, at: &DateTime<Local>, label: &str) -> PathBuf {
    dir.join(format!("{}_{}_TestReport.txt", stamp(at), sanitize(label)))
}

/// `<dir>/<stamp>_<label>_Logs.dlt`
pub fn capture_path(dir: &Path, at: &DateTime<Local>, label: &str) -> PathBuf {
    dir.join(format!("{}_{}_Logs.dlt", stamp(at), sanitize(label)))
}

/// Keep labels usable as a single file name component
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
