use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::constants::{
    CompressionQuality, APP_DIRECTORY, MIN_PROCESSABLE_FILE_SIZE, OPTIMUM_FILE_SIZE,
    TIME_DIFFERENCE_ALLOWED_SECONDS,
};
use crate::decision::FailurePolicy;
use crate::exif_store::MarkerStorage;
use crate::registry::DEFAULT_IN_FLIGHT_TTL_SECS;
use crate::store::Settings;

/// Configuration for the photo compression daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Library root directories to scan for photos
    pub library_roots: Vec<PathBuf>,
    /// Name of the directory compressed copies are written to
    pub app_dir_name: String,
    /// Explicit output directory; defaults to `<photo dir>/<app_dir_name>`
    pub output_dir: Option<PathBuf>,
    /// Master switch for automatic processing (forced requests bypass it)
    pub auto_processing_enabled: bool,
    pub process_screenshots: bool,
    pub process_messenger_photos: bool,
    /// Overwrite originals instead of writing `_compressed` copies
    pub replace_in_place: bool,
    pub quality: CompressionQuality,
    /// Files smaller than this are reported as already small
    pub optimum_size_bytes: u64,
    /// Files smaller than this are never handed to the compressor
    pub min_processable_bytes: u64,
    /// Modification-time drift tolerated after a marker was written
    pub staleness_tolerance_secs: i64,
    /// How long change notifications are ignored after a compression
    pub cooldown_secs: i64,
    /// In-flight entries older than this are considered abandoned
    pub in_flight_ttl_secs: i64,
    /// Interval in seconds between registry prunes
    pub prune_interval_secs: u64,
    /// Interval in seconds between library scans
    pub scan_interval_secs: u64,
    /// Maximum compressions running at once
    pub max_concurrent: usize,
    /// Verdict when the decision engine hits an unexpected error
    pub failure_policy: FailurePolicy,
    /// External compressor command; `{input}`, `{output}` and `{quality}` are substituted
    pub compressor_command: Vec<String>,
    /// EXIF `UserComment`, optionally falling back to `.cpfmark` sidecars
    pub marker_storage: MarkerStorage,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl DedupConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            library_roots: vec![PathBuf::from("/sdcard/DCIM")],
            app_dir_name: APP_DIRECTORY.to_string(),
            output_dir: None,
            auto_processing_enabled: true,
            process_screenshots: true,
            process_messenger_photos: true,
            replace_in_place: false,
            quality: CompressionQuality::Medium,
            optimum_size_bytes: OPTIMUM_FILE_SIZE,
            min_processable_bytes: MIN_PROCESSABLE_FILE_SIZE,
            staleness_tolerance_secs: TIME_DIFFERENCE_ALLOWED_SECONDS,
            cooldown_secs: 5,
            in_flight_ttl_secs: DEFAULT_IN_FLIGHT_TTL_SECS,
            prune_interval_secs: 300,
            scan_interval_secs: 60,
            max_concurrent: 2,
            failure_policy: FailurePolicy::FailOpen,
            compressor_command: vec![
                "magick".to_string(),
                "{input}".to_string(),
                "-quality".to_string(),
                "{quality}".to_string(),
                "{output}".to_string(),
            ],
            marker_storage: MarkerStorage::Exif,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| {
                        format!("Failed to read config file: {}", config_path.display())
                    })?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| {
                            format!("Failed to parse TOML config: {}", config_path.display())
                        })?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| {
                            format!("Failed to parse JSON config: {}", config_path.display())
                        })?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.app_dir_name.is_empty() || self.app_dir_name.contains(&['/', '\\'][..]) {
            anyhow::bail!(
                "app_dir_name must be a single directory name, got {:?}",
                self.app_dir_name
            );
        }
        if self.staleness_tolerance_secs < 0 || self.cooldown_secs < 0 {
            anyhow::bail!("staleness_tolerance_secs and cooldown_secs must not be negative");
        }
        if self.in_flight_ttl_secs <= 0 {
            anyhow::bail!("in_flight_ttl_secs must be positive");
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        Ok(())
    }

    pub fn staleness_tolerance(&self) -> Duration {
        Duration::seconds(self.staleness_tolerance_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs)
    }

    pub fn in_flight_ttl(&self) -> Duration {
        Duration::seconds(self.in_flight_ttl_secs)
    }
}

impl Settings for DedupConfig {
    fn auto_processing_enabled(&self) -> bool {
        self.auto_processing_enabled
    }

    fn process_screenshots(&self) -> bool {
        self.process_screenshots
    }

    fn process_messenger_photos(&self) -> bool {
        self.process_messenger_photos
    }

    fn replace_in_place(&self) -> bool {
        self.replace_in_place
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = DedupConfig::load_config(Some(Path::new("/nonexistent/cpfd.toml"))).unwrap();
        assert_eq!(cfg.staleness_tolerance_secs, 20);
        assert_eq!(cfg.app_dir_name, "CompressPhotoFast");
        assert_eq!(cfg.quality.value(), 70);
        assert_eq!(cfg.failure_policy, FailurePolicy::FailOpen);

        let cfg = DedupConfig::load_config(None).unwrap();
        assert!(cfg.auto_processing_enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "library_roots = [\"/photos\"]\nreplace_in_place = true\n\
             quality = \"high\"\nfailure_policy = \"fail_closed\""
        )
        .unwrap();

        let cfg = DedupConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.library_roots, vec![PathBuf::from("/photos")]);
        assert!(cfg.replace_in_place);
        assert_eq!(cfg.quality, CompressionQuality::High);
        assert_eq!(cfg.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(cfg.cooldown_secs, 5);
    }

    #[test]
    fn test_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"staleness_tolerance_secs": 30, "process_screenshots": false}}"#
        )
        .unwrap();

        let cfg = DedupConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.staleness_tolerance(), Duration::seconds(30));
        assert!(!cfg.process_screenshots);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_concurrent = 0").unwrap();
        assert!(DedupConfig::load_config(Some(file.path())).is_err());

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "app_dir_name = \"a/b\"").unwrap();
        assert!(DedupConfig::load_config(Some(file.path())).is_err());
    }
}
