use std::fs;
use std::path::Path;

use modelshield_core::ScanConfig;
use serde::Deserialize;

/// File-level configuration (`.modelshield.toml`). Every field is optional;
/// command-line flags override whatever the file sets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub format: Option<String>,
    pub fail_on_high: bool,
    pub scan: ScanFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScanFileConfig {
    pub dos_threshold_mb: Option<u64>,
    pub library_version: Option<String>,
    pub vulnerable_below: Option<String>,
}

impl AppConfig {
    /// Load the config file if it exists; a missing file is not an error.
    pub fn load_if_exists(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|err| format!("failed to read config {}: {err}", path.display()))?;
        toml::from_str(&content)
            .map_err(|err| format!("failed to parse config {}: {err}", path.display()))
    }

    /// Base scan configuration with the file's values applied over the
    /// defaults.
    pub fn scan_config(&self) -> ScanConfig {
        let mut config = ScanConfig::default();
        if let Some(threshold) = self.scan.dos_threshold_mb {
            config.dos_threshold_mb = threshold;
        }
        if let Some(version) = &self.scan.library_version {
            config.library_version = Some(version.clone());
        }
        if let Some(threshold) = &self.scan.vulnerable_below {
            config.vulnerable_below = threshold.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::AppConfig;

    fn temp_path(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("modelshield-{stamp}-{name}"))
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_if_exists(&temp_path("absent.toml")).expect("load");
        assert!(config.format.is_none());
        assert!(!config.fail_on_high);
        let scan = config.scan_config();
        assert_eq!(scan.dos_threshold_mb, 100);
        assert_eq!(scan.vulnerable_below, "2.0.0");
    }

    #[test]
    fn file_values_override_scan_defaults() {
        let path = temp_path("config.toml");
        std::fs::File::create(&path)
            .and_then(|mut f| {
                f.write_all(
                    b"format = \"json\"\nfail_on_high = true\n\n[scan]\ndos_threshold_mb = 10\nlibrary_version = \"1.9.0\"\n",
                )
            })
            .expect("write config");

        let config = AppConfig::load_if_exists(&path).expect("load");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.format.as_deref(), Some("json"));
        assert!(config.fail_on_high);
        let scan = config.scan_config();
        assert_eq!(scan.dos_threshold_mb, 10);
        assert_eq!(scan.library_version.as_deref(), Some("1.9.0"));
        assert_eq!(scan.vulnerable_below, "2.0.0");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let path = temp_path("broken.toml");
        std::fs::File::create(&path)
            .and_then(|mut f| f.write_all(b"format = ["))
            .expect("write config");
        let result = AppConfig::load_if_exists(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
