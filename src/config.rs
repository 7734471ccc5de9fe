// Storage configuration, persisted as JSON next to the base path.
// Defaults are written out on first run so operators can edit a real file.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_base_path: PathBuf,
    pub max_uploaded_videos: usize,
    pub uploaded_retention_days: i64,
    pub min_free_space_bytes: u64,
    pub low_space_warning_bytes: u64,
    pub max_upload_retries: u32,
    pub retry_delay_seconds: u64,
    pub min_video_size_bytes: u64,
    pub enable_structural_validation: bool,
    /// Explicit ffprobe binary; None means the env/PATH resolver decides.
    pub ffprobe_path: Option<PathBuf>,
    pub cleanup_interval_seconds: i64,
    pub auto_cleanup_enabled: bool,
    pub cleanup_batch_size: usize,
    pub recording_bitrate_mbps: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_base_path: PathBuf::from("/var/lib/birdbox/videos"),
            max_uploaded_videos: DEFAULT_MAX_UPLOADED_VIDEOS,
            uploaded_retention_days: DEFAULT_UPLOADED_RETENTION_DAYS,
            min_free_space_bytes: DEFAULT_MIN_FREE_SPACE_BYTES,
            low_space_warning_bytes: DEFAULT_LOW_SPACE_WARNING_BYTES,
            max_upload_retries: DEFAULT_MAX_UPLOAD_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
            min_video_size_bytes: DEFAULT_MIN_VIDEO_SIZE_BYTES,
            enable_structural_validation: true,
            ffprobe_path: None,
            cleanup_interval_seconds: DEFAULT_CLEANUP_INTERVAL_SECONDS,
            auto_cleanup_enabled: true,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            recording_bitrate_mbps: DEFAULT_RECORDING_BITRATE_MBPS,
        }
    }
}

impl StorageConfig {
    /// Load config from `path`, writing defaults there on first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let config: StorageConfig = serde_json::from_str(&raw)
                .map_err(|e| StorageError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = StorageConfig::default();
            config.save(path)?;
            info!("Wrote default storage config to {}", path.display());
            Ok(config)
        }
    }

    /// Persist the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Reject configs whose thresholds cannot classify space correctly.
    pub fn validate(&self) -> Result<()> {
        if self.min_free_space_bytes >= self.low_space_warning_bytes {
            return Err(StorageError::Config(format!(
                "min_free_space_bytes ({}) must be below low_space_warning_bytes ({})",
                self.min_free_space_bytes, self.low_space_warning_bytes
            )));
        }
        if self.max_upload_retries == 0 {
            return Err(StorageError::Config(
                "max_upload_retries must be at least 1".to_string(),
            ));
        }
        if self.cleanup_batch_size == 0 {
            return Err(StorageError::Config(
                "cleanup_batch_size must be nonzero".to_string(),
            ));
        }
        if self.recording_bitrate_mbps <= 0.0 {
            return Err(StorageError::Config(
                "recording_bitrate_mbps must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
