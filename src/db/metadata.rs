// Durable video metadata store
//
// Thread-safety contract: all writes (insert/update/delete) serialize through
// the single writer connection behind one mutex. Reads open short-lived
// connections and rely on SQLite's WAL snapshot isolation; there is no
// application-level read locking. This is a deliberate single-writer design.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{open_db, open_read_db};
use crate::error::{Result, StorageError};
use crate::model::{UploadStatus, VideoFile, VideoQuality};

const VIDEO_COLUMNS: &str = "id, filename, filepath, created_at, updated_at, \
     duration_seconds, file_size_bytes, status, upload_attempts, \
     last_upload_attempt, upload_error, youtube_url, quality, validation_error";

/// Sort direction for `list`, over `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    OldestFirst,
    NewestFirst,
}

impl ListOrder {
    fn sql(self) -> &'static str {
        match self {
            ListOrder::OldestFirst => "ASC",
            ListOrder::NewestFirst => "DESC",
        }
    }
}

pub struct MetadataManager {
    db_path: PathBuf,
    writer: Mutex<Connection>,
}

impl MetadataManager {
    /// Open the store, creating the database and running migrations.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = open_db(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(conn),
        })
    }

    /// Close the writer connection deterministically. Read connections are
    /// per-call and already closed.
    pub fn close(self) -> Result<()> {
        let conn = self
            .writer
            .into_inner()
            .map_err(|_| StorageError::Other("metadata write lock poisoned".to_string()))?;
        conn.close()
            .map_err(|(_, e)| StorageError::Database(e))?;
        Ok(())
    }

    fn write_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Other("metadata write lock poisoned".to_string()))
    }

    fn read_conn(&self) -> Result<Connection> {
        Ok(open_read_db(&self.db_path)?)
    }

    // ----- Writes (serialized) -----

    /// Insert a new video; returns the record with its assigned id.
    /// A duplicate filename is a `DuplicateFilename` error.
    pub fn insert(&self, video: &VideoFile) -> Result<VideoFile> {
        let conn = self.write_conn()?;
        let result = conn.execute(
            "INSERT INTO videos (filename, filepath, created_at, updated_at,
                duration_seconds, file_size_bytes, status, upload_attempts,
                last_upload_attempt, upload_error, youtube_url, quality, validation_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                video.filename,
                path_str(&video.filepath)?,
                fmt_ts(video.created_at),
                fmt_ts(video.updated_at),
                video.duration_seconds,
                video.file_size_bytes,
                video.status.as_str(),
                video.upload_attempts,
                video.last_upload_attempt.map(fmt_ts),
                video.upload_error,
                video.youtube_url,
                video.quality.as_str(),
                video.validation_error,
            ],
        );

        match result {
            Ok(_) => {
                let mut inserted = video.clone();
                inserted.id = conn.last_insert_rowid();
                Ok(inserted)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(StorageError::DuplicateFilename(video.filename.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full overwrite by id. Bumps updated_at. Absent id is `VideoNotFound`.
    pub fn update(&self, video: &VideoFile) -> Result<()> {
        let conn = self.write_conn()?;
        let changed = conn.execute(
            "UPDATE videos SET filename = ?1, filepath = ?2, updated_at = ?3,
                duration_seconds = ?4, file_size_bytes = ?5, status = ?6,
                upload_attempts = ?7, last_upload_attempt = ?8, upload_error = ?9,
                youtube_url = ?10, quality = ?11, validation_error = ?12
             WHERE id = ?13",
            params![
                video.filename,
                path_str(&video.filepath)?,
                fmt_ts(Utc::now()),
                video.duration_seconds,
                video.file_size_bytes,
                video.status.as_str(),
                video.upload_attempts,
                video.last_upload_attempt.map(fmt_ts),
                video.upload_error,
                video.youtube_url,
                video.quality.as_str(),
                video.validation_error,
                video.id,
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::VideoNotFound(video.id));
        }
        Ok(())
    }

    /// Delete by id. Absent id is `VideoNotFound`.
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.write_conn()?;
        let changed = conn.execute("DELETE FROM videos WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::VideoNotFound(id));
        }
        Ok(())
    }

    // ----- Reads (unsynchronized) -----

    pub fn get(&self, id: i64) -> Result<Option<VideoFile>> {
        let conn = self.read_conn()?;
        let sql = format!("SELECT {} FROM videos WHERE id = ?1", VIDEO_COLUMNS);
        let result = conn
            .query_row(&sql, params![id], map_video)
            .optional()?;
        Ok(result)
    }

    pub fn get_by_filename(&self, filename: &str) -> Result<Option<VideoFile>> {
        let conn = self.read_conn()?;
        let sql = format!("SELECT {} FROM videos WHERE filename = ?1", VIDEO_COLUMNS);
        let result = conn
            .query_row(&sql, params![filename], map_video)
            .optional()?;
        Ok(result)
    }

    /// List videos, optionally filtered by status and capped by limit,
    /// ordered by created_at in the requested direction.
    pub fn list(
        &self,
        status: Option<UploadStatus>,
        limit: Option<i64>,
        order: ListOrder,
    ) -> Result<Vec<VideoFile>> {
        let conn = self.read_conn()?;

        let sql = match (status, limit) {
            (Some(_), Some(_)) => format!(
                "SELECT {} FROM videos WHERE status = ?1 ORDER BY created_at {} LIMIT ?2",
                VIDEO_COLUMNS,
                order.sql()
            ),
            (Some(_), None) => format!(
                "SELECT {} FROM videos WHERE status = ?1 ORDER BY created_at {}",
                VIDEO_COLUMNS,
                order.sql()
            ),
            (None, Some(_)) => format!(
                "SELECT {} FROM videos ORDER BY created_at {} LIMIT ?1",
                VIDEO_COLUMNS,
                order.sql()
            ),
            (None, None) => format!(
                "SELECT {} FROM videos ORDER BY created_at {}",
                VIDEO_COLUMNS,
                order.sql()
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let videos = match (status, limit) {
            (Some(st), Some(n)) => stmt.query_map(params![st.as_str(), n], map_video)?,
            (Some(st), None) => stmt.query_map(params![st.as_str()], map_video)?,
            (None, Some(n)) => stmt.query_map(params![n], map_video)?,
            (None, None) => stmt.query_map(params![], map_video)?,
        }
        .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(videos)
    }

    /// FAILED videos still under the retry limit, least-recently-attempted
    /// first. Never-attempted rows sort first (NULLs first in ASC).
    pub fn get_retry_queue(&self, max_retries: u32) -> Result<Vec<VideoFile>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {} FROM videos
             WHERE status = 'failed' AND upload_attempts < ?1
             ORDER BY last_upload_attempt ASC",
            VIDEO_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let videos = stmt
            .query_map(params![max_retries], map_video)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(videos)
    }

    /// COMPLETED videos created before `cutoff`, oldest first.
    pub fn get_old_completed(&self, cutoff: DateTime<Utc>) -> Result<Vec<VideoFile>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {} FROM videos
             WHERE status = 'completed' AND created_at < ?1
             ORDER BY created_at ASC",
            VIDEO_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let videos = stmt
            .query_map(params![fmt_ts(cutoff)], map_video)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(videos)
    }

    /// Row counts per status. Statuses with no rows are present with 0.
    pub fn count_by_status(&self) -> Result<HashMap<UploadStatus, i64>> {
        let conn = self.read_conn()?;
        let mut counts: HashMap<UploadStatus, i64> =
            UploadStatus::all().iter().map(|s| (*s, 0)).collect();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM videos GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            if let Some(parsed) = UploadStatus::parse(&status) {
                counts.insert(parsed, count);
            }
        }

        Ok(counts)
    }

    pub fn total_count(&self) -> Result<i64> {
        let conn = self.read_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ----- Row mapping -----

fn map_video(row: &rusqlite::Row) -> rusqlite::Result<VideoFile> {
    Ok(VideoFile {
        id: row.get(0)?,
        filename: row.get(1)?,
        filepath: PathBuf::from(row.get::<_, String>(2)?),
        created_at: parse_ts_col(3, row.get(3)?)?,
        updated_at: parse_ts_col(4, row.get(4)?)?,
        duration_seconds: row.get(5)?,
        file_size_bytes: row.get(6)?,
        status: parse_status_col(7, row.get(7)?)?,
        upload_attempts: row.get(8)?,
        last_upload_attempt: match row.get::<_, Option<String>>(9)? {
            Some(s) => Some(parse_ts_col(9, s)?),
            None => None,
        },
        upload_error: row.get(10)?,
        youtube_url: row.get(11)?,
        quality: parse_quality_col(12, row.get(12)?)?,
        validation_error: row.get(13)?,
    })
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_ts_col(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{}': {}", s, e)))
}

fn parse_status_col(idx: usize, s: String) -> rusqlite::Result<UploadStatus> {
    UploadStatus::parse(&s).ok_or_else(|| conversion_error(idx, format!("unknown status '{}'", s)))
}

fn parse_quality_col(idx: usize, s: String) -> rusqlite::Result<VideoQuality> {
    VideoQuality::parse(&s).ok_or_else(|| conversion_error(idx, format!("unknown quality '{}'", s)))
}

/// Uniform RFC 3339 with fixed microsecond precision so lexicographic
/// comparison in SQL matches chronological order.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| StorageError::InvalidPath(format!("non-UTF8 path: {}", path.display())))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MetadataManager) {
        let tmp = TempDir::new().unwrap();
        let manager = MetadataManager::open(&tmp.path().join("test.db")).unwrap();
        (tmp, manager)
    }

    fn video(name: &str) -> VideoFile {
        VideoFile::new(
            name.to_string(),
            PathBuf::from(format!("/videos/pending/{}", name)),
        )
    }

    #[test]
    fn test_insert_assigns_id_and_round_trips() {
        let (_tmp, m) = setup();
        let mut v = video("recording_2026-08-30_120000.mp4");
        v.duration_seconds = Some(30.5);
        v.file_size_bytes = Some(12_345_678);

        let inserted = m.insert(&v).unwrap();
        assert!(inserted.id > 0);

        let fetched = m.get(inserted.id).unwrap().unwrap();
        assert_eq!(fetched.filename, v.filename);
        assert_eq!(fetched.filepath, v.filepath);
        assert_eq!(fetched.duration_seconds, Some(30.5));
        assert_eq!(fetched.file_size_bytes, Some(12_345_678));
        assert_eq!(fetched.status, UploadStatus::Pending);
        assert_eq!(fetched.quality, VideoQuality::Valid);
        // Timestamps survive with microsecond precision
        assert_eq!(
            fetched.created_at.timestamp_micros(),
            v.created_at.timestamp_micros()
        );
    }

    #[test]
    fn test_duplicate_filename_rejected() {
        let (_tmp, m) = setup();
        let v = video("recording_2026-08-30_120000.mp4");
        m.insert(&v).unwrap();

        let err = m.insert(&v).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateFilename(_)));
    }

    #[test]
    fn test_update_round_trip() {
        let (_tmp, m) = setup();
        let mut v = m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();

        v.begin_upload().unwrap();
        v.fail_upload("network timeout".to_string()).unwrap();
        m.update(&v).unwrap();

        let fetched = m.get(v.id).unwrap().unwrap();
        assert_eq!(fetched.status, UploadStatus::Failed);
        assert_eq!(fetched.upload_attempts, 1);
        assert_eq!(fetched.upload_error.as_deref(), Some("network timeout"));
        assert!(fetched.last_upload_attempt.is_some());
    }

    #[test]
    fn test_update_absent_id_fails() {
        let (_tmp, m) = setup();
        let mut v = video("recording_2026-08-30_120000.mp4");
        v.id = 9999;
        assert!(matches!(m.update(&v), Err(StorageError::VideoNotFound(9999))));
    }

    #[test]
    fn test_delete_idempotence_contract() {
        let (_tmp, m) = setup();
        let v = m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();

        m.delete(v.id).unwrap();
        assert!(m.get(v.id).unwrap().is_none());

        // Second delete reports not-found, leaves nothing behind
        assert!(matches!(m.delete(v.id), Err(StorageError::VideoNotFound(_))));
        assert_eq!(m.total_count().unwrap(), 0);
    }

    #[test]
    fn test_list_status_filter() {
        let (_tmp, m) = setup();
        let mut a = m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();
        let b = m.insert(&video("recording_2026-08-30_120001.mp4")).unwrap();

        a.begin_upload().unwrap();
        a.complete_upload("https://youtu.be/x".to_string()).unwrap();
        m.update(&a).unwrap();

        let completed = m
            .list(Some(UploadStatus::Completed), None, ListOrder::OldestFirst)
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);

        let pending = m
            .list(Some(UploadStatus::Pending), None, ListOrder::OldestFirst)
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let all = m.list(None, None, ListOrder::OldestFirst).unwrap();
        assert_eq!(all.len(), 2);

        let limited = m.list(None, Some(1), ListOrder::OldestFirst).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_list_order_direction() {
        let (_tmp, m) = setup();
        let now = Utc::now();

        let mut older = video("recording_2026-08-29_120000.mp4");
        older.created_at = now - Duration::days(1);
        let older = m.insert(&older).unwrap();
        let newer = m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();

        let oldest_first = m.list(None, None, ListOrder::OldestFirst).unwrap();
        assert_eq!(oldest_first[0].id, older.id);
        assert_eq!(oldest_first[1].id, newer.id);

        let newest_first = m.list(None, None, ListOrder::NewestFirst).unwrap();
        assert_eq!(newest_first[0].id, newer.id);

        // Limit applies after the ordering: the single newest row
        let latest = m.list(None, Some(1), ListOrder::NewestFirst).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, newer.id);
    }

    #[test]
    fn test_retry_queue_boundary_and_order() {
        let (_tmp, m) = setup();

        // attempts == max: excluded
        let mut exhausted = m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();
        for _ in 0..3 {
            exhausted.begin_upload().unwrap();
            exhausted.fail_upload("err".to_string()).unwrap();
        }
        m.update(&exhausted).unwrap();

        // attempts == max - 1: included
        let mut retryable = m.insert(&video("recording_2026-08-30_120001.mp4")).unwrap();
        for _ in 0..2 {
            retryable.begin_upload().unwrap();
            retryable.fail_upload("err".to_string()).unwrap();
        }
        m.update(&retryable).unwrap();

        // never attempted but failed (crash before attempt recorded): first in queue
        let mut fresh = m.insert(&video("recording_2026-08-30_120002.mp4")).unwrap();
        fresh.status = UploadStatus::Failed;
        m.update(&fresh).unwrap();

        let queue = m.get_retry_queue(3).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].id, fresh.id, "NULL last_upload_attempt sorts first");
        assert_eq!(queue[1].id, retryable.id);
    }

    #[test]
    fn test_get_old_completed_respects_cutoff() {
        let (_tmp, m) = setup();
        let now = Utc::now();

        let mut old = video("recording_2026-07-01_080000.mp4");
        old.created_at = now - Duration::days(40);
        let mut old = m.insert(&old).unwrap();
        old.begin_upload().unwrap();
        old.complete_upload("url".to_string()).unwrap();
        m.update(&old).unwrap();

        let mut recent = m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();
        recent.begin_upload().unwrap();
        recent.complete_upload("url".to_string()).unwrap();
        m.update(&recent).unwrap();

        let cutoff = now - Duration::days(30);
        let stale = m.get_old_completed(cutoff).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[test]
    fn test_count_by_status_includes_zeroes() {
        let (_tmp, m) = setup();
        m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();

        let counts = m.count_by_status().unwrap();
        assert_eq!(counts[&UploadStatus::Pending], 1);
        assert_eq!(counts[&UploadStatus::Completed], 0);
        assert_eq!(counts[&UploadStatus::Corrupted], 0);
        assert_eq!(counts.len(), 5);
        assert_eq!(m.total_count().unwrap(), 1);
    }

    #[test]
    fn test_close_is_clean() {
        let (_tmp, m) = setup();
        m.insert(&video("recording_2026-08-30_120000.mp4")).unwrap();
        m.close().unwrap();
    }
}
