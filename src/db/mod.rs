// Database module

pub mod metadata;
pub mod migrations;

use std::path::{Path, PathBuf};

use anyhow::Result;
use rusqlite::{Connection, OpenFlags};

use crate::constants::DB_FILENAME;

pub use metadata::{ListOrder, MetadataManager};

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // Enable WAL mode so readers do not block the writer
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    // Run migrations
    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Open a short-lived read connection. Opened read-only so the handle
/// itself enforces the single-writer contract. Skips migrations; the
/// writer connection has already run them.
pub fn open_read_db(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Get the database path for a storage base directory
pub fn get_db_path(base_path: &Path) -> PathBuf {
    base_path.join(DB_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_connection_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.db");
        drop(open_db(&path).unwrap());

        let reader = open_read_db(&path).unwrap();
        let result = reader.execute(
            "INSERT INTO videos (filename, filepath, created_at, updated_at)
             VALUES ('recording_2026-08-30_120000.mp4', '/x.mp4',
                     '2026-08-30T12:00:00Z', '2026-08-30T12:00:00Z')",
            [],
        );
        assert!(result.is_err(), "read handles must be read-only");
    }
}
