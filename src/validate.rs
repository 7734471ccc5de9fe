// Two-tier integrity checking
//
// Tier 1 is the size floor: always checked, no external dependency. Tier 2
// is an ffprobe structural probe: container must parse and contain at least
// one video stream. If ffprobe itself is unavailable the probe is skipped
// and the file treated as valid (fail-open) so a broken validation toolchain
// never blocks the recording pipeline. A probe that runs and fails, or times
// out, is a validation failure and the file is quarantined.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::warn;
use serde::Deserialize;

use crate::constants::{FFPROBE_POLL_INTERVAL_MS, FFPROBE_TIMEOUT_SECS};
use crate::error::{Result, StorageError};
use crate::model::VideoQuality;
use crate::tools;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub quality: VideoQuality,
    pub error: Option<String>,
    /// Duration reported by the structural probe, when it ran.
    pub probed_duration_seconds: Option<f64>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.quality == VideoQuality::Valid
    }

    fn valid(duration: Option<f64>) -> Self {
        Self {
            quality: VideoQuality::Valid,
            error: None,
            probed_duration_seconds: duration,
        }
    }

    fn invalid(quality: VideoQuality, error: String) -> Self {
        Self {
            quality,
            error: Some(error),
            probed_duration_seconds: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
}

pub struct Validator {
    min_video_size_bytes: u64,
    structural_validation: bool,
    ffprobe: PathBuf,
    probe_timeout: Duration,
}

impl Validator {
    pub fn new(min_video_size_bytes: u64, structural_validation: bool) -> Self {
        Self::with_probe_tool(
            min_video_size_bytes,
            structural_validation,
            tools::ffprobe_path(),
        )
    }

    /// Use a specific ffprobe binary instead of the resolver's pick.
    pub fn with_probe_tool(
        min_video_size_bytes: u64,
        structural_validation: bool,
        ffprobe: PathBuf,
    ) -> Self {
        Self {
            min_video_size_bytes,
            structural_validation,
            ffprobe,
            probe_timeout: Duration::from_secs(FFPROBE_TIMEOUT_SECS),
        }
    }

    /// Check a recording. A bad file is an Ok(outcome) with a non-valid
    /// quality; Err is reserved for failures inspecting the file itself.
    pub fn validate(&self, path: &Path) -> Result<ValidationOutcome> {
        let size = std::fs::metadata(path)?.len();
        if size < self.min_video_size_bytes {
            return Ok(ValidationOutcome::invalid(
                VideoQuality::TooSmall,
                format!(
                    "file is {} bytes, below the {} byte minimum",
                    size, self.min_video_size_bytes
                ),
            ));
        }

        if !self.structural_validation {
            return Ok(ValidationOutcome::valid(None));
        }

        if !self.probe_available() {
            // Fail-open: a missing probe tool never blocks recording.
            warn!(
                "ffprobe unavailable, skipping structural validation of {}",
                path.display()
            );
            return Ok(ValidationOutcome::valid(None));
        }

        match self.probe(path) {
            Ok(probe) => {
                if probe.has_video_stream {
                    Ok(ValidationOutcome::valid(probe.duration_seconds))
                } else {
                    Ok(ValidationOutcome::invalid(
                        VideoQuality::InvalidFormat,
                        "container has no decodable video stream".to_string(),
                    ))
                }
            }
            Err(e) => Ok(ValidationOutcome::invalid(
                VideoQuality::Corrupted,
                format!("structural probe failed: {}", e),
            )),
        }
    }

    /// Whether the configured probe binary runs at all.
    fn probe_available(&self) -> bool {
        Command::new(&self.ffprobe)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn probe(&self, path: &Path) -> Result<ProbeResult> {
        let mut child = Command::new(&self.ffprobe)
            .args([
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| StorageError::FFprobe(format!("Failed to run ffprobe: {}", e)))?;

        // Bounded wait: poll, then kill. A hung probe is a probe failure.
        let deadline = Instant::now() + self.probe_timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(StorageError::FFprobe(format!(
                            "probe timed out after {:?}",
                            self.probe_timeout
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(FFPROBE_POLL_INTERVAL_MS));
                }
                Err(e) => {
                    return Err(StorageError::FFprobe(format!("wait failed: {}", e)));
                }
            }
        };

        if !status.success() {
            return Err(StorageError::FFprobe(format!(
                "ffprobe exited with {}",
                status
            )));
        }

        let mut stdout = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout)
                .map_err(|e| StorageError::FFprobe(format!("read failed: {}", e)))?;
        }

        let output: FFprobeOutput = serde_json::from_slice(&stdout)
            .map_err(|e| StorageError::FFprobe(format!("Failed to parse ffprobe output: {}", e)))?;

        let mut result = ProbeResult {
            has_video_stream: false,
            duration_seconds: None,
        };

        if let Some(ref streams) = output.streams {
            for stream in streams {
                if stream.codec_type.as_deref() == Some("video") {
                    result.has_video_stream = true;
                    if result.duration_seconds.is_none() {
                        result.duration_seconds = parse_duration(stream.duration.as_deref());
                    }
                }
            }
        }

        if result.duration_seconds.is_none() {
            if let Some(ref format) = output.format {
                result.duration_seconds = parse_duration(format.duration.as_deref());
            }
        }

        Ok(result)
    }
}

struct ProbeResult {
    has_video_stream: bool,
    duration_seconds: Option<f64>,
}

fn parse_duration(duration_str: Option<&str>) -> Option<f64> {
    duration_str?.parse().ok()
}
