// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use anyhow::Result;
use rusqlite::Connection;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: videos table
    r#"
    CREATE TABLE videos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL UNIQUE,
        filepath TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        duration_seconds REAL,
        file_size_bytes INTEGER,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'in_progress', 'completed', 'failed', 'corrupted')),
        upload_attempts INTEGER NOT NULL DEFAULT 0,
        last_upload_attempt TEXT,
        upload_error TEXT,
        youtube_url TEXT,
        quality TEXT NOT NULL DEFAULT 'valid'
            CHECK (quality IN ('valid', 'too_small', 'invalid_format', 'corrupted')),
        validation_error TEXT
    );

    CREATE INDEX idx_videos_status ON videos(status);
    CREATE INDEX idx_videos_created_at ON videos(created_at);
    "#,
];

/// Run all pending migrations on a connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        log::info!("Applied schema migration {}", version);
    }

    Ok(())
}
