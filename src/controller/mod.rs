// Storage controller facade
//
// Coordinates FileManager, MetadataManager, SpaceManager, Validator and
// CleanupManager behind the lifecycle API the recorder, uploader and
// scheduler call. Internal failures never escape into those loops: they are
// logged, surfaced through the error callback, and converted into a
// caller-friendly return value.
//
// Concurrency: one controller instance is shared by the recording thread,
// the upload worker and the periodic scheduler. Metadata writes serialize
// inside MetadataManager; directory moves assume no two threads touch the
// same video concurrently (distinct videos are safe).


use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use log::{error, info, warn};

use crate::cleanup::{CleanupManager, CleanupOutcome};
use crate::config::StorageConfig;
use crate::db::{get_db_path, ListOrder, MetadataManager};
use crate::error::{Result, StorageError};
use crate::model::{StorageStats, UploadStatus, VideoFile};
use crate::space::{SpaceManager, SpaceState};
use crate::storage::FileManager;
use crate::validate::Validator;

/// Event hooks consumed by the hardware/announcer collaborators. Each is
/// invoked best-effort: a panicking callback is caught and logged, never
/// re-thrown into the controller's call stack.
#[derive(Default)]
pub struct StorageCallbacks {
    pub on_disk_full: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_low_space: Option<Box<dyn Fn(u64) + Send + Sync>>,
    pub on_corruption_detected: Option<Box<dyn Fn(&str) + Send + Sync>>,
    pub on_cleanup_complete: Option<Box<dyn Fn(usize) + Send + Sync>>,
    pub on_storage_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

/// Result of an orphan-pruning pass.
#[derive(Debug, Clone, Default)]
pub struct OrphanReport {
    /// Metadata rows removed because their physical file is gone.
    pub removed_rows: usize,
    /// Files matching the recording pattern with no metadata row. Left in
    /// place for operator inspection.
    pub untracked_files: Vec<PathBuf>,
}

pub struct StorageController {
    config: StorageConfig,
    files: FileManager,
    metadata: MetadataManager,
    space: SpaceManager,
    validator: Validator,
    cleanup: CleanupManager,
    callbacks: StorageCallbacks,
}

impl StorageController {
    /// Bootstrap the storage engine: create the managed directories, verify
    /// the base path is writable, open the metadata store. An unwritable
    /// base is fatal; nothing downstream can be trusted otherwise.
    pub fn initialize(config: StorageConfig, callbacks: StorageCallbacks) -> Result<Self> {
        config.validate()?;

        let files = FileManager::new(&config.storage_base_path);
        std::fs::create_dir_all(&config.storage_base_path)?;
        files.init_directories()?;
        files.validate_writable()?;

        let metadata = MetadataManager::open(&get_db_path(&config.storage_base_path))?;
        let space = SpaceManager::new(
            &config.storage_base_path,
            config.min_free_space_bytes,
            config.low_space_warning_bytes,
        )?;
        let validator = match config.ffprobe_path {
            Some(ref probe) => Validator::with_probe_tool(
                config.min_video_size_bytes,
                config.enable_structural_validation,
                probe.clone(),
            ),
            None => Validator::new(
                config.min_video_size_bytes,
                config.enable_structural_validation,
            ),
        };
        let cleanup = CleanupManager::new(
            config.uploaded_retention_days,
            config.max_uploaded_videos,
            config.cleanup_interval_seconds,
        );

        info!(
            "Storage engine initialized at {}",
            config.storage_base_path.display()
        );

        Ok(Self {
            config,
            files,
            metadata,
            space,
            validator,
            cleanup,
            callbacks,
        })
    }

    /// Close the metadata store deterministically. Call from the owning
    /// process's shutdown sequence.
    pub fn shutdown(self) -> Result<()> {
        self.metadata.close()
    }

    // ----- Recording path -----

    /// Persist a finished recording. Admission is checked first: with
    /// insufficient space nothing touches the filesystem, `on_disk_full`
    /// fires and None is returned. Any internal failure is logged, surfaced
    /// via `on_storage_error`, and also yields None ("try later").
    pub fn save_recording(
        &self,
        source_path: &Path,
        duration_seconds: Option<f64>,
    ) -> Option<VideoFile> {
        let estimate = duration_seconds
            .map(|d| SpaceManager::estimate_size(d, self.config.recording_bitrate_mbps));

        match self.space.can_record(estimate) {
            Ok((true, _)) => {}
            Ok((false, reason)) => {
                warn!("Recording refused: {}", reason);
                self.fire("on_disk_full", || {
                    if let Some(ref cb) = self.callbacks.on_disk_full {
                        cb();
                    }
                });
                return None;
            }
            Err(e) => {
                return self.report_error("admission check", e);
            }
        }

        let video = match self.admit_recording(source_path, duration_seconds) {
            Ok(video) => video,
            Err(e) => return self.report_error("save_recording", e),
        };

        // Re-sample after the copy so the operator hears about low space
        // before the next trigger, not during it.
        if let Ok(usage) = self.space.disk_usage() {
            if self.space.classify_free(usage.free_bytes) == SpaceState::LowSpace {
                self.fire("on_low_space", || {
                    if let Some(ref cb) = self.callbacks.on_low_space {
                        cb(usage.free_bytes);
                    }
                });
            }
        }

        Some(video)
    }

    /// save -> validate (quarantine path if invalid) -> insert. A failure
    /// after the save removes the pending copy again: it is this call's own
    /// artifact, and left behind it would only resurface as an untracked
    /// orphan.
    fn admit_recording(
        &self,
        source_path: &Path,
        duration_seconds: Option<f64>,
    ) -> Result<VideoFile> {
        let saved_path = self.save_to_pending(source_path)?;
        match self.register_recording(&saved_path, duration_seconds) {
            Ok(video) => Ok(video),
            Err(e) => {
                if let Err(cleanup_err) = self.files.delete(&saved_path) {
                    warn!(
                        "Could not remove {} after failed admission: {}",
                        saved_path.display(),
                        cleanup_err
                    );
                }
                Err(e)
            }
        }
    }

    fn register_recording(
        &self,
        saved_path: &Path,
        duration_seconds: Option<f64>,
    ) -> Result<VideoFile> {
        let filename = saved_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidPath(format!("{}", saved_path.display())))?;

        let outcome = self.validator.validate(saved_path)?;
        let size = self.files.file_size(saved_path)?;

        let mut video = VideoFile::new(filename.clone(), saved_path.to_path_buf());
        video.file_size_bytes = Some(size as i64);
        video.duration_seconds = duration_seconds.or(outcome.probed_duration_seconds);

        if !outcome.is_valid() {
            // Quarantine, never deletion: corrupted evidence stays inspectable.
            let quarantined = self.files.move_to(saved_path, &self.files.corrupted_dir())?;
            video.filepath = quarantined;
            video.mark_corrupted(
                outcome.quality,
                outcome.error.unwrap_or_else(|| "validation failed".to_string()),
            )?;
            let video = self.metadata.insert(&video)?;

            warn!("Quarantined corrupted recording {}", filename);
            self.fire("on_corruption_detected", || {
                if let Some(ref cb) = self.callbacks.on_corruption_detected {
                    cb(&filename);
                }
            });
            return Ok(video);
        }

        let video = self.metadata.insert(&video)?;
        info!(
            "Saved recording {} ({} bytes) as video {}",
            video.filename, size, video.id
        );
        Ok(video)
    }

    /// Copy into pending/ under a generated timestamp name. Saves landing in
    /// the same second get a numbered name instead of failing.
    fn save_to_pending(&self, source_path: &Path) -> Result<PathBuf> {
        let pending = self.files.pending_dir();
        match self.files.save(source_path, &pending, None) {
            Err(StorageError::DestinationExists(_)) => {}
            other => return other,
        }

        let base = FileManager::generate_filename(Utc::now());
        let stem = base.trim_end_matches(".mp4");
        for i in 1..100 {
            let candidate = format!("{}_{}.mp4", stem, i);
            match self.files.save(source_path, &pending, Some(&candidate)) {
                Err(StorageError::DestinationExists(_)) => continue,
                other => return other,
            }
        }
        Err(StorageError::Other(
            "could not find a free recording name".to_string(),
        ))
    }

    // ----- Upload worker path -----

    /// Pending/Failed -> InProgress. Also moves a retried file back under
    /// pending/ so location keeps tracking status.
    pub fn mark_upload_started(&self, video: &VideoFile) -> Result<VideoFile> {
        let mut updated = video.clone();
        updated.begin_upload()?;
        self.relocate(&mut updated)?;
        self.metadata.update(&updated)?;
        info!("Upload started for {}", updated.filename);
        Ok(updated)
    }

    /// InProgress -> Completed; file moves to uploaded/.
    pub fn mark_upload_success(&self, video: &VideoFile, youtube_url: &str) -> Result<VideoFile> {
        let mut updated = video.clone();
        updated.complete_upload(youtube_url.to_string())?;
        self.relocate(&mut updated)?;
        self.metadata.update(&updated)?;
        info!("Upload complete for {} -> {}", updated.filename, youtube_url);
        Ok(updated)
    }

    /// InProgress -> Failed; file moves to failed/. Attempts exceeding the
    /// retry limit simply drop out of the retry queue; nothing is deleted.
    pub fn mark_upload_failed(&self, video: &VideoFile, error: &str) -> Result<VideoFile> {
        let mut updated = video.clone();
        updated.fail_upload(error.to_string())?;
        self.relocate(&mut updated)?;
        self.metadata.update(&updated)?;
        warn!(
            "Upload failed for {} (attempt {}): {}",
            updated.filename, updated.upload_attempts, error
        );
        Ok(updated)
    }

    /// Move the physical file into the directory implied by the current
    /// status, if it is not already there, and sync `filepath`.
    fn relocate(&self, video: &mut VideoFile) -> Result<()> {
        let target_dir = self.files.dir_for_status(video.status);
        if video.filepath.parent() == Some(target_dir.as_path()) {
            return Ok(());
        }
        let new_path = self.files.move_to(&video.filepath, &target_dir)?;
        video.filepath = new_path;
        Ok(())
    }

    pub fn get_pending_uploads(&self) -> Result<Vec<VideoFile>> {
        self.metadata
            .list(Some(UploadStatus::Pending), None, ListOrder::OldestFirst)
    }

    pub fn get_retry_queue(&self) -> Result<Vec<VideoFile>> {
        self.metadata.get_retry_queue(self.config.max_upload_retries)
    }

    // ----- Scheduler path -----

    /// Plan and execute eviction over COMPLETED videos. File and metadata
    /// deletion stay coupled through `delete_video`.
    pub fn cleanup_old_videos(&self, dry_run: bool) -> Result<CleanupOutcome> {
        let completed =
            self.metadata
                .list(Some(UploadStatus::Completed), None, ListOrder::OldestFirst)?;
        let (candidates, stats) = self.cleanup.plan_cleanup(&completed, Utc::now());

        info!(
            "Cleanup plan: {} candidates ({} aged out, {} over count, {} both), {} bytes reclaimable{}",
            stats.total_candidates,
            stats.aged_out,
            stats.over_count,
            stats.both_rules,
            stats.bytes_reclaimable,
            if dry_run { " [dry run]" } else { "" }
        );

        let outcome = self.cleanup.cleanup_videos(
            &candidates,
            |v| self.delete_video(v),
            self.config.cleanup_batch_size,
            dry_run,
        );

        if outcome.errors > 0 {
            warn!(
                "Cleanup finished with {} errors ({} deleted, {} bytes reclaimed)",
                outcome.errors, outcome.deleted, outcome.bytes_reclaimed
            );
        }

        if !dry_run {
            let deleted = outcome.deleted;
            self.fire("on_cleanup_complete", || {
                if let Some(ref cb) = self.callbacks.on_cleanup_complete {
                    cb(deleted);
                }
            });
        }

        Ok(outcome)
    }

    /// Delete the physical file and the metadata row together.
    pub fn delete_video(&self, video: &VideoFile) -> Result<()> {
        self.files.delete(&video.filepath)?;
        self.metadata.delete(video.id)?;
        Ok(())
    }

    /// Pure scheduling predicate; the caller owns the timer.
    pub fn should_run_auto_cleanup(&self, last_run: Option<chrono::DateTime<Utc>>) -> bool {
        self.config.auto_cleanup_enabled
            && self.cleanup.should_run_auto_cleanup(last_run, Utc::now())
    }

    /// Remove metadata rows whose physical file is already gone, and report
    /// recording files present on disk with no metadata row.
    pub fn prune_orphans(&self) -> Result<OrphanReport> {
        let mut report = OrphanReport::default();

        for video in self.metadata.list(None, None, ListOrder::OldestFirst)? {
            if !video.filepath.exists() {
                warn!(
                    "Pruning metadata for {} (file missing at {})",
                    video.filename,
                    video.filepath.display()
                );
                self.metadata.delete(video.id)?;
                report.removed_rows += 1;
            }
        }

        for dir in [
            self.files.pending_dir(),
            self.files.uploaded_dir(),
            self.files.failed_dir(),
            self.files.corrupted_dir(),
        ] {
            for path in self.files.list_files(&dir, true)? {
                let name = match path.file_name().and_then(|n| n.to_str()) {
                    Some(n) => n,
                    None => continue,
                };
                if self.metadata.get_by_filename(name)?.is_none() {
                    report.untracked_files.push(path);
                }
            }
        }

        if report.removed_rows > 0 || !report.untracked_files.is_empty() {
            info!(
                "Orphan prune: removed {} rows, found {} untracked files",
                report.removed_rows,
                report.untracked_files.len()
            );
        }

        Ok(report)
    }

    /// Aggregate a stats snapshot from disk, metadata and directory sizes.
    pub fn get_stats(&self) -> Result<StorageStats> {
        let usage = self.space.disk_usage()?;
        let counts = self.metadata.count_by_status()?;

        let pending_bytes = self.files.directory_size(&self.files.pending_dir())?;
        let uploaded_bytes = self.files.directory_size(&self.files.uploaded_dir())?;
        let failed_bytes = self.files.directory_size(&self.files.failed_dir())?;
        let corrupted_bytes = self.files.directory_size(&self.files.corrupted_dir())?;

        Ok(StorageStats {
            disk_total_bytes: usage.total_bytes,
            disk_used_bytes: usage.used_bytes,
            disk_free_bytes: usage.free_bytes,
            pending_count: counts[&UploadStatus::Pending],
            in_progress_count: counts[&UploadStatus::InProgress],
            completed_count: counts[&UploadStatus::Completed],
            failed_count: counts[&UploadStatus::Failed],
            corrupted_count: counts[&UploadStatus::Corrupted],
            total_count: self.metadata.total_count()?,
            pending_bytes,
            uploaded_bytes,
            failed_bytes,
            corrupted_bytes,
            total_video_bytes: pending_bytes + uploaded_bytes + failed_bytes + corrupted_bytes,
        })
    }

    /// Cutoff helper for callers that want the raw old-completed list.
    pub fn get_old_completed(&self) -> Result<Vec<VideoFile>> {
        let cutoff = Utc::now() - Duration::days(self.config.uploaded_retention_days);
        self.metadata.get_old_completed(cutoff)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // ----- Internals -----

    /// Convert an internal error into a log line + error callback + None.
    fn report_error(&self, context: &str, e: StorageError) -> Option<VideoFile> {
        error!("{} failed: {}", context, e);
        let message = format!("{}: {}", context, e);
        self.fire("on_storage_error", || {
            if let Some(ref cb) = self.callbacks.on_storage_error {
                cb(&message);
            }
        });
        None
    }

    /// Invoke a callback with panic isolation.
    fn fire<F: FnOnce()>(&self, name: &str, f: F) {
        if catch_unwind(AssertUnwindSafe(f)).is_err() {
            error!("{} callback panicked; continuing", name);
        }
    }
}
