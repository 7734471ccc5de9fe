// Birdbox Storage Constants
// Directory names and the filename pattern are fixed contracts shared with
// the recorder and uploader processes. Do not change without coordinating.

// Paths
pub const PENDING_FOLDER: &str = "pending";
pub const UPLOADED_FOLDER: &str = "uploaded";
pub const FAILED_FOLDER: &str = "failed";
pub const CORRUPTED_FOLDER: &str = "corrupted";
pub const DB_FILENAME: &str = "birdbox.db";
pub const CONFIG_FILENAME: &str = "storage.json";
pub const WRITE_PROBE_FILENAME: &str = ".write_probe";

// Recording filenames: recording_<YYYY-MM-DD>_<HHMMSS>.mp4
pub const RECORDING_PREFIX: &str = "recording_";
pub const RECORDING_EXTENSION: &str = "mp4";
pub const RECORDING_PATTERN: &str = r"^recording_\d{4}-\d{2}-\d{2}_\d{6}.*\.mp4$";

// Hashing
pub const HASH_CHUNK_SIZE: usize = 1_048_576; // 1MB

// Validation
pub const FFPROBE_TIMEOUT_SECS: u64 = 10;
pub const FFPROBE_POLL_INTERVAL_MS: u64 = 100;

// Size estimation: bitrate megabits -> bytes plus container overhead
pub const CONTAINER_OVERHEAD_FACTOR: f64 = 1.1;

// Config defaults
pub const DEFAULT_MAX_UPLOADED_VIDEOS: usize = 100;
pub const DEFAULT_UPLOADED_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_MIN_FREE_SPACE_BYTES: u64 = 1024 * 1024 * 1024; // 1 GB
pub const DEFAULT_LOW_SPACE_WARNING_BYTES: u64 = 5 * 1024 * 1024 * 1024; // 5 GB
pub const DEFAULT_MAX_UPLOAD_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 300;
pub const DEFAULT_MIN_VIDEO_SIZE_BYTES: u64 = 1024; // 1 KB
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: i64 = 3600;
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 10;
pub const DEFAULT_RECORDING_BITRATE_MBPS: f64 = 4.0;
