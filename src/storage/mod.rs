// Physical file placement across the four managed directories
//
// FileManager owns the directory layout and every move/copy/delete of video
// files. A video's location is a direct function of its upload status; the
// managed directories are flat. Renames between them are atomic because all
// four live on the same volume (a documented precondition, not re-verified).

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use regex::Regex;

use crate::constants::{
    CORRUPTED_FOLDER, FAILED_FOLDER, HASH_CHUNK_SIZE, PENDING_FOLDER, RECORDING_EXTENSION,
    RECORDING_PATTERN, RECORDING_PREFIX, UPLOADED_FOLDER, WRITE_PROBE_FILENAME,
};
use crate::error::{Result, StorageError};
use crate::model::UploadStatus;

pub struct FileManager {
    base_path: PathBuf,
    recording_re: Regex,
}

impl FileManager {
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            // Pattern is a compile-time constant; a failure here is a bug.
            recording_re: Regex::new(RECORDING_PATTERN).unwrap(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.base_path.join(PENDING_FOLDER)
    }

    pub fn uploaded_dir(&self) -> PathBuf {
        self.base_path.join(UPLOADED_FOLDER)
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.base_path.join(FAILED_FOLDER)
    }

    pub fn corrupted_dir(&self) -> PathBuf {
        self.base_path.join(CORRUPTED_FOLDER)
    }

    /// The directory a video with this status must live in.
    pub fn dir_for_status(&self, status: UploadStatus) -> PathBuf {
        match status {
            UploadStatus::Pending | UploadStatus::InProgress => self.pending_dir(),
            UploadStatus::Completed => self.uploaded_dir(),
            UploadStatus::Failed => self.failed_dir(),
            UploadStatus::Corrupted => self.corrupted_dir(),
        }
    }

    /// Create the managed directory layout. Idempotent.
    pub fn init_directories(&self) -> Result<()> {
        fs::create_dir_all(self.pending_dir())?;
        fs::create_dir_all(self.uploaded_dir())?;
        fs::create_dir_all(self.failed_dir())?;
        fs::create_dir_all(self.corrupted_dir())?;
        Ok(())
    }

    /// Touch and remove a probe file to confirm the base path is writable.
    pub fn validate_writable(&self) -> Result<()> {
        let probe = self.base_path.join(WRITE_PROBE_FILENAME);
        fs::write(&probe, b"probe").map_err(|e| {
            StorageError::NotWritable(format!("{}: {}", self.base_path.display(), e))
        })?;
        fs::remove_file(&probe)?;
        Ok(())
    }

    /// Generate the canonical recording filename for a timestamp:
    /// recording_<YYYY-MM-DD>_<HHMMSS>.mp4
    pub fn generate_filename(ts: DateTime<Utc>) -> String {
        format!(
            "{}{}_{}.{}",
            RECORDING_PREFIX,
            ts.format("%Y-%m-%d"),
            ts.format("%H%M%S"),
            RECORDING_EXTENSION
        )
    }

    /// Whether a filename matches the recording pattern.
    pub fn is_recording_filename(&self, filename: &str) -> bool {
        self.recording_re.is_match(filename)
    }

    /// Copy `source` into `dest_dir` under `filename` (or a generated name).
    /// An existing destination name is an error; callers never silently
    /// overwrite. Returns the destination path.
    pub fn save(
        &self,
        source: &Path,
        dest_dir: &Path,
        filename: Option<&str>,
    ) -> Result<PathBuf> {
        if !source.exists() {
            return Err(StorageError::FileNotFound(format!("{}", source.display())));
        }

        let name = match filename {
            Some(n) => n.to_string(),
            None => Self::generate_filename(Utc::now()),
        };

        let dest = dest_dir.join(&name);
        if dest.exists() {
            return Err(StorageError::DestinationExists(format!("{}", dest.display())));
        }

        copy_with_verify(source, &dest)?;
        debug!("Saved {} -> {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Rename `path` into `dest_dir` preserving the basename. On a name
    /// collision a timestamp suffix is appended; once the source exists the
    /// move always succeeds.
    pub fn move_to(&self, path: &Path, dest_dir: &Path) -> Result<PathBuf> {
        if !path.exists() {
            return Err(StorageError::FileNotFound(format!("{}", path.display())));
        }
        let name = path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(format!("{}", path.display())))?;

        let mut dest = dest_dir.join(name);
        if dest.exists() {
            dest = suffixed_path(&dest)?;
            warn!(
                "Name collision moving {}, using {}",
                path.display(),
                dest.display()
            );
        }

        fs::rename(path, &dest)?;
        debug!("Moved {} -> {}", path.display(), dest.display());
        Ok(dest)
    }

    /// Delete a file. Idempotent: a missing file logs and returns normally.
    pub fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Delete of missing file {} (already gone)", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    /// Total bytes of regular files directly under `dir`. A missing
    /// directory counts as zero.
    pub fn directory_size(&self, dir: &Path) -> Result<u64> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut total = 0u64;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    /// Regular files directly under `dir`, optionally filtered to names
    /// matching the recording pattern. Sorted by name for stable output.
    pub fn list_files(&self, dir: &Path, recordings_only: bool) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if recordings_only {
                let name = entry.file_name();
                let matches = name
                    .to_str()
                    .map(|n| self.recording_re.is_match(n))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }
}

/// Append a timestamp (and a counter if the same second collides too) to a
/// path's stem until the name is free.
fn suffixed_path(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let ts = Utc::now().timestamp();
    for i in 0..1000 {
        let new_name = match (ext.is_empty(), i) {
            (true, 0) => format!("{}_{}", stem, ts),
            (false, 0) => format!("{}_{}.{}", stem, ts, ext),
            (true, n) => format!("{}_{}_{}", stem, ts, n),
            (false, n) => format!("{}_{}_{}.{}", stem, ts, n, ext),
        };
        let candidate = parent.join(new_name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(StorageError::Other(
        "could not generate unique destination name".to_string(),
    ))
}

/// Copy with blake3 read-back verification and mtime preservation.
fn copy_with_verify(source: &Path, dest: &Path) -> Result<()> {
    fs::copy(source, dest)?;

    let source_hash = full_hash(source)?;
    let dest_hash = full_hash(dest)?;
    if source_hash != dest_hash {
        // Remove the bad copy before reporting
        let _ = fs::remove_file(dest);
        return Err(StorageError::Hash(format!(
            "read-back verification failed for {}",
            dest.display()
        )));
    }

    // Preserve modification time
    if let Ok(meta) = fs::metadata(source) {
        if let Ok(modified) = meta.modified() {
            let _ = filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(modified));
        }
    }

    Ok(())
}

/// Full BLAKE3 hash of a file, hex-encoded.
fn full_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| StorageError::Hash(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| StorageError::Hash(format!("Failed to read {}: {}", path.display(), e)))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileManager) {
        let tmp = TempDir::new().unwrap();
        let fm = FileManager::new(tmp.path());
        fm.init_directories().unwrap();
        (tmp, fm)
    }

    fn write_file(path: &Path, content: &[u8]) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn test_init_directories_idempotent() {
        let (_tmp, fm) = setup();
        assert!(fm.pending_dir().is_dir());
        assert!(fm.uploaded_dir().is_dir());
        assert!(fm.failed_dir().is_dir());
        assert!(fm.corrupted_dir().is_dir());
        // Second bootstrap is a no-op
        fm.init_directories().unwrap();
    }

    #[test]
    fn test_generate_filename_pattern() {
        let ts = DateTime::parse_from_rfc3339("2026-08-30T14:15:02+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let name = FileManager::generate_filename(ts);
        assert_eq!(name, "recording_2026-08-30_141502.mp4");

        let fm = FileManager::new(Path::new("/tmp"));
        assert!(fm.is_recording_filename(&name));
        assert!(!fm.is_recording_filename("holiday.mp4"));
    }

    #[test]
    fn test_save_copies_and_rejects_collision() {
        let (tmp, fm) = setup();
        let source = tmp.path().join("clip.mp4");
        write_file(&source, b"video payload bytes");

        let dest = fm
            .save(&source, &fm.pending_dir(), Some("recording_2026-08-30_120000.mp4"))
            .unwrap();
        assert!(dest.exists());
        assert!(source.exists(), "save copies, it does not move");
        assert_eq!(fs::read(&dest).unwrap(), b"video payload bytes");

        // Same name again must fail, never overwrite
        let err = fm
            .save(&source, &fm.pending_dir(), Some("recording_2026-08-30_120000.mp4"))
            .unwrap_err();
        assert!(matches!(err, StorageError::DestinationExists(_)));
    }

    #[test]
    fn test_save_missing_source_fails() {
        let (tmp, fm) = setup();
        let missing = tmp.path().join("nope.mp4");
        let err = fm.save(&missing, &fm.pending_dir(), None).unwrap_err();
        assert!(matches!(err, StorageError::FileNotFound(_)));
    }

    #[test]
    fn test_move_preserves_basename() {
        let (_tmp, fm) = setup();
        let src = fm.pending_dir().join("recording_2026-08-30_120000.mp4");
        write_file(&src, b"data");

        let dest = fm.move_to(&src, &fm.uploaded_dir()).unwrap();
        assert_eq!(dest, fm.uploaded_dir().join("recording_2026-08-30_120000.mp4"));
        assert!(!src.exists());
        assert!(dest.exists());
    }

    #[test]
    fn test_move_collision_gets_suffix() {
        let (_tmp, fm) = setup();
        let name = "recording_2026-08-30_120000.mp4";
        write_file(&fm.uploaded_dir().join(name), b"already there");

        let src = fm.pending_dir().join(name);
        write_file(&src, b"incoming");

        let dest = fm.move_to(&src, &fm.uploaded_dir()).unwrap();
        assert!(dest.exists());
        assert_ne!(dest, fm.uploaded_dir().join(name));
        assert!(dest
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("recording_2026-08-30_120000_"));
        // Original untouched
        assert_eq!(fs::read(fm.uploaded_dir().join(name)).unwrap(), b"already there");
    }

    #[test]
    fn test_delete_idempotent() {
        let (_tmp, fm) = setup();
        let path = fm.pending_dir().join("recording_2026-08-30_120000.mp4");
        write_file(&path, b"x");

        fm.delete(&path).unwrap();
        assert!(!path.exists());
        // Second delete of a missing file succeeds quietly
        fm.delete(&path).unwrap();
    }

    #[test]
    fn test_directory_size_and_listing() {
        let (_tmp, fm) = setup();
        write_file(&fm.pending_dir().join("recording_2026-08-30_120000.mp4"), b"12345");
        write_file(&fm.pending_dir().join("recording_2026-08-30_120001.mp4"), b"123");
        write_file(&fm.pending_dir().join("stray.txt"), b"1");

        assert_eq!(fm.directory_size(&fm.pending_dir()).unwrap(), 9);

        let all = fm.list_files(&fm.pending_dir(), false).unwrap();
        assert_eq!(all.len(), 3);

        let recordings = fm.list_files(&fm.pending_dir(), true).unwrap();
        assert_eq!(recordings.len(), 2);

        // Missing directory is simply empty
        assert_eq!(fm.directory_size(Path::new("/no/such/dir")).unwrap(), 0);
        assert!(fm.list_files(Path::new("/no/such/dir"), false).unwrap().is_empty());
    }

    #[test]
    fn test_validate_writable() {
        let (tmp, fm) = setup();
        fm.validate_writable().unwrap();
        // Probe file must not linger
        assert!(!tmp.path().join(WRITE_PROBE_FILENAME).exists());
    }

    #[test]
    fn test_dir_for_status_partition() {
        let (_tmp, fm) = setup();
        assert_eq!(fm.dir_for_status(UploadStatus::Pending), fm.pending_dir());
        assert_eq!(fm.dir_for_status(UploadStatus::InProgress), fm.pending_dir());
        assert_eq!(fm.dir_for_status(UploadStatus::Completed), fm.uploaded_dir());
        assert_eq!(fm.dir_for_status(UploadStatus::Failed), fm.failed_dir());
        assert_eq!(fm.dir_for_status(UploadStatus::Corrupted), fm.corrupted_dir());
    }
}
