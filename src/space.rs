// Disk capacity classification and pre-flight size estimation
//
// Read-only: samples statvfs on demand, never mutates anything. Staleness
// between samples is bounded only by how often callers ask.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::CONTAINER_OVERHEAD_FACTOR;
use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceState {
    Ready,
    LowSpace,
    DiskFull,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

pub struct SpaceManager {
    base_path: PathBuf,
    min_free_bytes: u64,
    low_space_warning_bytes: u64,
}

impl SpaceManager {
    /// Thresholds must be ordered: min_free < low_space_warning.
    pub fn new(base_path: &Path, min_free_bytes: u64, low_space_warning_bytes: u64) -> Result<Self> {
        if min_free_bytes >= low_space_warning_bytes {
            return Err(StorageError::Config(format!(
                "min_free_bytes ({}) must be below low_space_warning_bytes ({})",
                min_free_bytes, low_space_warning_bytes
            )));
        }
        Ok(Self {
            base_path: base_path.to_path_buf(),
            min_free_bytes,
            low_space_warning_bytes,
        })
    }

    /// Sample the filesystem holding the base path.
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        read_disk_usage(&self.base_path)
    }

    /// Two-threshold classification of the current free-space sample.
    pub fn classify(&self) -> Result<SpaceState> {
        let usage = self.disk_usage()?;
        Ok(self.classify_free(usage.free_bytes))
    }

    /// Classification for a known free-byte figure (separated for tests).
    pub fn classify_free(&self, free_bytes: u64) -> SpaceState {
        if free_bytes < self.min_free_bytes {
            SpaceState::DiskFull
        } else if free_bytes < self.low_space_warning_bytes {
            SpaceState::LowSpace
        } else {
            SpaceState::Ready
        }
    }

    /// Estimated file size for a recording of the given duration at the
    /// given bitrate, including container overhead.
    pub fn estimate_size(duration_seconds: f64, bitrate_mbps: f64) -> u64 {
        let payload = duration_seconds * bitrate_mbps * 1_000_000.0 / 8.0;
        (payload * CONTAINER_OVERHEAD_FACTOR) as u64
    }

    /// Admission check for a new recording. Returns (allowed, reason).
    pub fn can_record(&self, estimated_bytes: Option<u64>) -> Result<(bool, String)> {
        let usage = self.disk_usage()?;
        match self.classify_free(usage.free_bytes) {
            SpaceState::DiskFull => Ok((
                false,
                format!(
                    "disk full: {} bytes free, minimum is {}",
                    usage.free_bytes, self.min_free_bytes
                ),
            )),
            state => {
                if let Some(needed) = estimated_bytes {
                    // The recording must fit without eating into the reserve.
                    let usable = usage.free_bytes.saturating_sub(self.min_free_bytes);
                    if needed > usable {
                        return Ok((
                            false,
                            format!(
                                "estimated {} bytes exceeds usable {} bytes",
                                needed, usable
                            ),
                        ));
                    }
                }
                let reason = match state {
                    SpaceState::LowSpace => "low space warning".to_string(),
                    _ => "ok".to_string(),
                };
                Ok((true, reason))
            }
        }
    }
}

/// Read disk usage using statvfs (Unix only)
#[cfg(unix)]
fn read_disk_usage(path: &Path) -> Result<DiskUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| StorageError::InvalidPath(format!("{}", path.display())))?;
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(StorageError::DiskUsage(format!(
                "statvfs failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let total = stat.f_blocks as u64 * stat.f_frsize as u64;
        let free = stat.f_bavail as u64 * stat.f_frsize as u64;
        Ok(DiskUsage {
            total_bytes: total,
            used_bytes: total - free,
            free_bytes: free,
        })
    }
}

#[cfg(not(unix))]
fn read_disk_usage(_path: &Path) -> Result<DiskUsage> {
    Err(StorageError::DiskUsage(
        "disk usage not supported on this platform".to_string(),
    ))
}
