// Eviction planning and execution
//
// Policy is the union of two independent candidate sets, both computed over
// COMPLETED videos only: an age rule (older than the retention window) and a
// count rule (oldest overflow past the completed cap). Execution is
// best-effort: one failed deletion is tallied and never aborts the batch.
// CleanupManager knows nothing about the filesystem or database; deletion is
// an injected function, which also keeps this module testable with a fake
// sink. It owns no timer: an external scheduler polls
// `should_run_auto_cleanup`.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::error::Result;
use crate::model::VideoFile;

pub struct CleanupManager {
    uploaded_retention_days: i64,
    max_uploaded_videos: usize,
    cleanup_interval_seconds: i64,
}

/// How a video became an eviction candidate.
#[derive(Debug, Clone, Default)]
pub struct CleanupPlanStats {
    pub total_candidates: usize,
    pub aged_out: usize,
    pub over_count: usize,
    pub both_rules: usize,
    pub bytes_reclaimable: u64,
}

/// Tally of one cleanup execution.
#[derive(Debug, Clone, Default)]
pub struct CleanupOutcome {
    pub deleted: usize,
    pub errors: usize,
    pub bytes_reclaimed: u64,
    pub dry_run: bool,
}

impl CleanupManager {
    pub fn new(
        uploaded_retention_days: i64,
        max_uploaded_videos: usize,
        cleanup_interval_seconds: i64,
    ) -> Self {
        Self {
            uploaded_retention_days,
            max_uploaded_videos,
            cleanup_interval_seconds,
        }
    }

    /// Compute eviction candidates from the full COMPLETED set.
    /// Returns the deduplicated union of the age and count rules, oldest
    /// first, plus per-rule stats.
    pub fn plan_cleanup(
        &self,
        completed: &[VideoFile],
        now: DateTime<Utc>,
    ) -> (Vec<VideoFile>, CleanupPlanStats) {
        let mut by_age: HashSet<i64> = HashSet::new();
        for video in completed {
            if video.age_days(now) > self.uploaded_retention_days {
                by_age.insert(video.id);
            }
        }

        // Count rule: oldest (count - max) by created_at
        let mut by_count: HashSet<i64> = HashSet::new();
        if completed.len() > self.max_uploaded_videos {
            let overflow = completed.len() - self.max_uploaded_videos;
            let mut sorted: Vec<&VideoFile> = completed.iter().collect();
            sorted.sort_by_key(|v| v.created_at);
            for video in sorted.iter().take(overflow) {
                by_count.insert(video.id);
            }
        }

        let mut candidates: Vec<VideoFile> = completed
            .iter()
            .filter(|v| by_age.contains(&v.id) || by_count.contains(&v.id))
            .cloned()
            .collect();
        candidates.sort_by_key(|v| v.created_at);

        let mut stats = CleanupPlanStats {
            total_candidates: candidates.len(),
            ..Default::default()
        };
        for video in &candidates {
            let aged = by_age.contains(&video.id);
            let counted = by_count.contains(&video.id);
            if aged && counted {
                stats.both_rules += 1;
            } else if aged {
                stats.aged_out += 1;
            } else {
                stats.over_count += 1;
            }
            stats.bytes_reclaimable += video.file_size_bytes.unwrap_or(0).max(0) as u64;
        }

        (candidates, stats)
    }

    /// Execute a plan through the injected deletion function, in batches.
    /// A single item's failure is counted and does not stop the rest.
    pub fn cleanup_videos<F>(
        &self,
        candidates: &[VideoFile],
        mut delete_fn: F,
        batch_size: usize,
        dry_run: bool,
    ) -> CleanupOutcome
    where
        F: FnMut(&VideoFile) -> Result<()>,
    {
        let mut outcome = CleanupOutcome {
            dry_run,
            ..Default::default()
        };

        for batch in candidates.chunks(batch_size.max(1)) {
            for video in batch {
                if dry_run {
                    info!("[dry run] would delete {}", video.filename);
                    outcome.deleted += 1;
                    outcome.bytes_reclaimed += video.file_size_bytes.unwrap_or(0).max(0) as u64;
                    continue;
                }
                match delete_fn(video) {
                    Ok(()) => {
                        outcome.deleted += 1;
                        outcome.bytes_reclaimed +=
                            video.file_size_bytes.unwrap_or(0).max(0) as u64;
                    }
                    Err(e) => {
                        warn!("Failed to delete {}: {}", video.filename, e);
                        outcome.errors += 1;
                    }
                }
            }
        }

        outcome
    }

    /// Pure predicate: is the configured interval up since the last run?
    /// A never-run state (None) is always due.
    pub fn should_run_auto_cleanup(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match last_run {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.cleanup_interval_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::model::UploadStatus;
    use std::path::PathBuf;

    fn completed_video(id: i64, age_days: i64, size: i64) -> VideoFile {
        let now = Utc::now();
        let mut v = VideoFile::new(
            format!("recording_2026-08-{:02}_1200{:02}.mp4", (id % 28) + 1, id % 60),
            PathBuf::from(format!("/videos/uploaded/recording_{}.mp4", id)),
        );
        v.id = id;
        v.status = UploadStatus::Completed;
        v.created_at = now - Duration::days(age_days);
        v.file_size_bytes = Some(size);
        v
    }

    fn manager() -> CleanupManager {
        // 30-day retention, cap of 3 completed videos, hourly interval
        CleanupManager::new(30, 3, 3600)
    }

    #[test]
    fn test_count_rule_evicts_oldest_overflow() {
        let m = manager();
        let now = Utc::now();
        // 5 completed, none past retention, cap 3 -> evict the 2 oldest
        let videos: Vec<VideoFile> = (1..=5)
            .map(|i| completed_video(i, 20 - i, 100))
            .collect();

        let (candidates, stats) = m.plan_cleanup(&videos, now);
        assert_eq!(candidates.len(), 2);
        // ids 1 and 2 are the oldest (ages 19 and 18 days)
        assert_eq!(candidates[0].id, 1);
        assert_eq!(candidates[1].id, 2);
        assert_eq!(stats.over_count, 2);
        assert_eq!(stats.aged_out, 0);
        assert_eq!(stats.bytes_reclaimable, 200);
    }

    #[test]
    fn test_age_rule_fires_under_count_cap() {
        let m = manager();
        let now = Utc::now();
        // 2 completed (under cap of 3), both past the 30-day window
        let videos = vec![completed_video(1, 45, 100), completed_video(2, 40, 100)];

        let (candidates, stats) = m.plan_cleanup(&videos, now);
        assert_eq!(candidates.len(), 2);
        assert_eq!(stats.aged_out, 2);
        assert_eq!(stats.over_count, 0);
    }

    #[test]
    fn test_union_deduplicates_and_sorts_oldest_first() {
        let m = manager();
        let now = Utc::now();
        // 4 completed: the oldest is both past retention and overflow
        let videos = vec![
            completed_video(1, 45, 100), // age + count
            completed_video(2, 10, 100),
            completed_video(3, 5, 100),
            completed_video(4, 1, 100),
        ];

        let (candidates, stats) = m.plan_cleanup(&videos, now);
        assert_eq!(candidates.len(), 1, "one video, both rules, counted once");
        assert_eq!(candidates[0].id, 1);
        assert_eq!(stats.both_rules, 1);
        assert_eq!(stats.total_candidates, 1);
    }

    #[test]
    fn test_boundary_age_not_evicted() {
        let m = manager();
        let now = Utc::now();
        // Exactly at the retention boundary: age_days == 30 is not > 30
        let videos = vec![completed_video(1, 30, 100)];
        let (candidates, _) = m.plan_cleanup(&videos, now);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_cleanup_continues_past_item_failure() {
        let m = manager();
        let now = Utc::now();
        let videos: Vec<VideoFile> = (1..=4).map(|i| completed_video(i, 40, 50)).collect();
        let (candidates, _) = m.plan_cleanup(&videos, now);
        assert_eq!(candidates.len(), 4);

        let mut attempted = Vec::new();
        let outcome = m.cleanup_videos(
            &candidates,
            |v| {
                attempted.push(v.id);
                if v.id == 2 {
                    Err(StorageError::Other("disk error".to_string()))
                } else {
                    Ok(())
                }
            },
            2,
            false,
        );

        assert_eq!(attempted, vec![1, 2, 3, 4], "failure must not abort the batch");
        assert_eq!(outcome.deleted, 3);
        assert_eq!(outcome.errors, 1);
        assert_eq!(outcome.bytes_reclaimed, 150);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let m = manager();
        let now = Utc::now();
        let videos = vec![completed_video(1, 40, 100)];
        let (candidates, _) = m.plan_cleanup(&videos, now);

        let mut called = false;
        let outcome = m.cleanup_videos(
            &candidates,
            |_| {
                called = true;
                Ok(())
            },
            10,
            true,
        );

        assert!(!called, "dry run must not invoke the delete function");
        assert!(outcome.dry_run);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.bytes_reclaimed, 100);
    }

    #[test]
    fn test_should_run_auto_cleanup() {
        let m = manager();
        let now = Utc::now();

        assert!(m.should_run_auto_cleanup(None, now), "never run means due");
        assert!(!m.should_run_auto_cleanup(Some(now - Duration::seconds(10)), now));
        assert!(m.should_run_auto_cleanup(Some(now - Duration::seconds(3600)), now));
        assert!(m.should_run_auto_cleanup(Some(now - Duration::seconds(7200)), now));
    }
}
