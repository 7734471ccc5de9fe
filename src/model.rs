// Video lifecycle model
//
// A VideoFile row mirrors the `videos` table. Statuses and dates are stored
// as text; the state-transition helpers here are the only sanctioned way to
// change `status`. Completed and Corrupted are terminal.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Corrupted,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InProgress => "in_progress",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Corrupted => "corrupted",
        }
    }

    pub fn parse(s: &str) -> Option<UploadStatus> {
        match s {
            "pending" => Some(UploadStatus::Pending),
            "in_progress" => Some(UploadStatus::InProgress),
            "completed" => Some(UploadStatus::Completed),
            "failed" => Some(UploadStatus::Failed),
            "corrupted" => Some(UploadStatus::Corrupted),
            _ => None,
        }
    }

    /// All statuses, for per-status aggregation.
    pub fn all() -> [UploadStatus; 5] {
        [
            UploadStatus::Pending,
            UploadStatus::InProgress,
            UploadStatus::Completed,
            UploadStatus::Failed,
            UploadStatus::Corrupted,
        ]
    }

    /// No edge leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Corrupted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Valid,
    TooSmall,
    InvalidFormat,
    Corrupted,
}

impl VideoQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoQuality::Valid => "valid",
            VideoQuality::TooSmall => "too_small",
            VideoQuality::InvalidFormat => "invalid_format",
            VideoQuality::Corrupted => "corrupted",
        }
    }

    pub fn parse(s: &str) -> Option<VideoQuality> {
        match s {
            "valid" => Some(VideoQuality::Valid),
            "too_small" => Some(VideoQuality::TooSmall),
            "invalid_format" => Some(VideoQuality::InvalidFormat),
            "corrupted" => Some(VideoQuality::Corrupted),
            _ => None,
        }
    }
}

/// One recording's lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFile {
    pub id: i64,
    pub filename: String,
    pub filepath: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: Option<i64>,
    pub status: UploadStatus,
    pub upload_attempts: u32,
    pub last_upload_attempt: Option<DateTime<Utc>>,
    pub upload_error: Option<String>,
    pub youtube_url: Option<String>,
    pub quality: VideoQuality,
    pub validation_error: Option<String>,
}

impl VideoFile {
    /// Fresh record for a just-saved recording; id 0 until inserted.
    pub fn new(filename: String, filepath: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            filename,
            filepath,
            created_at: now,
            updated_at: now,
            duration_seconds: None,
            file_size_bytes: None,
            status: UploadStatus::Pending,
            upload_attempts: 0,
            last_upload_attempt: None,
            upload_error: None,
            youtube_url: None,
            quality: VideoQuality::Valid,
            validation_error: None,
        }
    }

    fn check_not_terminal(&self, edge: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(StorageError::InvalidTransition(format!(
                "{}: video '{}' is {} (terminal)",
                edge,
                self.filename,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Pending/Failed -> InProgress. Retry eligibility is a queue-filter
    /// concern; this edge only rejects terminal states and mid-flight videos.
    pub fn begin_upload(&mut self) -> Result<()> {
        self.check_not_terminal("begin_upload")?;
        if self.status == UploadStatus::InProgress {
            return Err(StorageError::InvalidTransition(format!(
                "begin_upload: video '{}' is already in progress",
                self.filename
            )));
        }
        self.status = UploadStatus::InProgress;
        self.touch();
        Ok(())
    }

    /// InProgress -> Completed (terminal).
    pub fn complete_upload(&mut self, youtube_url: String) -> Result<()> {
        if self.status != UploadStatus::InProgress {
            return Err(StorageError::InvalidTransition(format!(
                "complete_upload: video '{}' is {}, expected in_progress",
                self.filename,
                self.status.as_str()
            )));
        }
        self.status = UploadStatus::Completed;
        self.youtube_url = Some(youtube_url);
        self.upload_error = None;
        self.touch();
        Ok(())
    }

    /// InProgress -> Failed; attempts are monotonically non-decreasing.
    pub fn fail_upload(&mut self, error: String) -> Result<()> {
        if self.status != UploadStatus::InProgress {
            return Err(StorageError::InvalidTransition(format!(
                "fail_upload: video '{}' is {}, expected in_progress",
                self.filename,
                self.status.as_str()
            )));
        }
        self.status = UploadStatus::Failed;
        self.upload_attempts += 1;
        self.last_upload_attempt = Some(Utc::now());
        self.upload_error = Some(error);
        self.touch();
        Ok(())
    }

    /// Any non-terminal state -> Corrupted (terminal quarantine).
    pub fn mark_corrupted(&mut self, quality: VideoQuality, error: String) -> Result<()> {
        self.check_not_terminal("mark_corrupted")?;
        self.status = UploadStatus::Corrupted;
        self.quality = quality;
        self.validation_error = Some(error);
        self.touch();
        Ok(())
    }

    pub fn can_retry(&self, max_upload_retries: u32) -> bool {
        self.status == UploadStatus::Failed && self.upload_attempts < max_upload_retries
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Age in whole days relative to `now`.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Derived aggregate, never persisted. Recomputed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub disk_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_free_bytes: u64,
    pub pending_count: i64,
    pub in_progress_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub corrupted_count: i64,
    pub total_count: i64,
    pub pending_bytes: u64,
    pub uploaded_bytes: u64,
    pub failed_bytes: u64,
    pub corrupted_bytes: u64,
    pub total_video_bytes: u64,
}
