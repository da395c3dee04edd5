//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order. A
//! `schema_migrations` table tracks which versions have been applied.
//!
//! Foreign keys are declared without `ON DELETE CASCADE`: removing a video
//! requires deleting its jobs and variants explicitly first.

use rusqlite::Connection;
use rf_core::{Error, Result};

/// V1: videos, variants and the durable job queue.
const V1_INITIAL: &str = r#"
CREATE TABLE videos (
    id                  TEXT PRIMARY KEY,
    kind                TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'uploaded',
    original_path       TEXT NOT NULL,
    original_name       TEXT NOT NULL,
    original_size       INTEGER NOT NULL,
    mime_type           TEXT NOT NULL,
    metadata            TEXT,
    processing_progress REAL NOT NULL DEFAULT 0,
    processing_error    TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX idx_videos_status ON videos(status);

CREATE TABLE variants (
    id                  TEXT PRIMARY KEY,
    video_id            TEXT NOT NULL REFERENCES videos(id),
    quality             TEXT NOT NULL,
    format              TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'pending',
    output_path         TEXT,
    file_size           INTEGER,
    width               INTEGER,
    height              INTEGER,
    bitrate             INTEGER,
    duration            REAL,
    codec               TEXT,
    processing_progress REAL NOT NULL DEFAULT 0,
    error               TEXT,
    created_at          TEXT NOT NULL,
    completed_at        TEXT
);

CREATE INDEX idx_variants_video ON variants(video_id);
CREATE UNIQUE INDEX idx_variants_open_pair
    ON variants(video_id, quality, format)
    WHERE status IN ('pending', 'processing');

CREATE TABLE jobs (
    id            TEXT PRIMARY KEY,
    video_id      TEXT NOT NULL REFERENCES videos(id),
    job_type      TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'queued',
    lane          TEXT NOT NULL,
    priority      INTEGER NOT NULL DEFAULT 0,
    quality       TEXT,
    format        TEXT,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL DEFAULT 3,
    payload       TEXT NOT NULL,
    result        TEXT,
    error         TEXT,
    locked_by     TEXT,
    scheduled_at  TEXT NOT NULL,
    retry_at      TEXT,
    started_at    TEXT,
    completed_at  TEXT,
    created_at    TEXT NOT NULL
);

CREATE INDEX idx_jobs_dequeue ON jobs(lane, status, priority DESC, scheduled_at);
CREATE INDEX idx_jobs_video ON jobs(video_id);
CREATE INDEX idx_jobs_retry ON jobs(retry_at) WHERE retry_at IS NOT NULL;
CREATE UNIQUE INDEX idx_jobs_active_rendition
    ON jobs(video_id, quality, format)
    WHERE status IN ('queued', 'processing') AND job_type = 'transcode';
CREATE UNIQUE INDEX idx_jobs_active_artifact
    ON jobs(video_id, job_type)
    WHERE status IN ('queued', 'processing') AND job_type != 'transcode';
"#;

/// Ordered list of all migrations.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Apply every migration that has not been recorded yet.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
