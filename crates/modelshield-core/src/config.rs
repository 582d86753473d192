//! Scan configuration. Everything the scanner used to pick up from ambient
//! process state is explicit here so callers control it per scan.

use serde::Deserialize;

/// Knobs for one scan. All fields have serde defaults so a partial config
/// file deserializes cleanly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// File size threshold for the denial-of-service check, in megabytes.
    pub dos_threshold_mb: u64,
    /// Version string of the inference library the artifact targets. The
    /// vulnerable-library check is skipped when unset.
    pub library_version: Option<String>,
    /// Versions lexicographically below this are flagged as vulnerable.
    pub vulnerable_below: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            dos_threshold_mb: 100,
            library_version: None,
            vulnerable_below: "2.0.0".to_string(),
        }
    }
}
