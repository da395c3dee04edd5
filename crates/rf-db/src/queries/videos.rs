//! Video record operations.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use rf_core::{Error, MediaMetadata, Result, VideoId, VideoKind, VideoStatus};

use crate::format_ts;
use crate::models::Video;

const COLS: &str = "id, kind, status, original_path, original_name, original_size, mime_type,
    metadata, processing_progress, processing_error, created_at, updated_at";

/// Description of a freshly uploaded source file.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub kind: VideoKind,
    pub original_path: String,
    pub original_name: String,
    pub original_size: u64,
    pub mime_type: String,
}

/// Insert a video in the `uploaded` state.
pub fn create_video(conn: &Connection, new: &NewVideo) -> Result<Video> {
    let id = VideoId::new();
    let now = Utc::now();
    let ts = format_ts(now);

    conn.execute(
        "INSERT INTO videos (id, kind, status, original_path, original_name, original_size,
                             mime_type, created_at, updated_at)
         VALUES (?1, ?2, 'uploaded', ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            id.to_string(),
            new.kind.as_str(),
            new.original_path,
            new.original_name,
            new.original_size as i64,
            new.mime_type,
            ts,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Video {
        id,
        kind: new.kind,
        status: VideoStatus::Uploaded,
        original_path: new.original_path.clone(),
        original_name: new.original_name.clone(),
        original_size: new.original_size,
        mime_type: new.mime_type.clone(),
        metadata: None,
        processing_progress: 0.0,
        processing_error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a video by ID.
pub fn get_video(conn: &Connection, id: VideoId) -> Result<Option<Video>> {
    let q = format!("SELECT {COLS} FROM videos WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], Video::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Get a video by ID, failing with `NotFound` when absent.
pub fn require_video(conn: &Connection, id: VideoId) -> Result<Video> {
    get_video(conn, id)?.ok_or_else(|| Error::not_found("video", id))
}

/// List videos, newest first, optionally filtered by status.
pub fn list_videos(
    conn: &Connection,
    status: Option<VideoStatus>,
    limit: u32,
) -> Result<Vec<Video>> {
    let q = format!(
        "SELECT {COLS} FROM videos WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params![status.map(|s| s.as_str()), limit],
            Video::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Record extracted technical metadata.
pub fn set_metadata(conn: &Connection, id: VideoId, metadata: &MediaMetadata) -> Result<bool> {
    let json = serde_json::to_string(metadata)
        .map_err(|e| Error::Internal(format!("metadata serialization: {e}")))?;
    let n = conn
        .execute(
            "UPDATE videos SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![json, format_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

fn status_list(statuses: &[VideoStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Move a video to `to` if it is currently in one of `from`.
///
/// Entering `processing` resets progress and clears the previous error.
pub fn transition_status(
    conn: &Connection,
    id: VideoId,
    from: &[VideoStatus],
    to: VideoStatus,
) -> Result<bool> {
    let allowed: Vec<VideoStatus> = from
        .iter()
        .copied()
        .filter(|s| s.can_transition_to(to))
        .collect();
    if allowed.is_empty() {
        return Ok(false);
    }

    let reset = if to == VideoStatus::Processing {
        ", processing_progress = 0, processing_error = NULL"
    } else {
        ""
    };
    let q = format!(
        "UPDATE videos SET status = ?1, updated_at = ?2{reset}
         WHERE id = ?3 AND status IN ({})",
        status_list(&allowed)
    );
    let n = conn
        .execute(
            &q,
            rusqlite::params![to.as_str(), format_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Raise progress while the video is processing. Returns false when the
/// stored value is already at or above `progress`.
pub fn update_progress(conn: &Connection, id: VideoId, progress: f64) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET processing_progress = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing' AND processing_progress < ?1",
            rusqlite::params![progress.clamp(0.0, 100.0), format_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a non-terminal video as completed.
pub fn mark_completed(conn: &Connection, id: VideoId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET status = 'completed', processing_progress = 100,
                    processing_error = NULL, updated_at = ?1
             WHERE id = ?2 AND status = 'processing'",
            rusqlite::params![format_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a non-terminal video as failed with a descriptive error.
pub fn mark_failed(conn: &Connection, id: VideoId, error: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE videos SET status = 'failed', processing_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status IN ('uploaded', 'processing')",
            rusqlite::params![error, format_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Delete a video together with its jobs and variants.
pub fn delete_video(conn: &Connection, id: VideoId) -> Result<bool> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;
    let id_str = id.to_string();

    tx.execute("DELETE FROM jobs WHERE video_id = ?1", [&id_str])
        .map_err(|e| Error::database(e.to_string()))?;
    tx.execute("DELETE FROM variants WHERE video_id = ?1", [&id_str])
        .map_err(|e| Error::database(e.to_string()))?;
    let n = tx
        .execute("DELETE FROM videos WHERE id = ?1", [&id_str])
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Number of videos per status.
pub fn count_by_status(conn: &Connection) -> Result<Vec<(VideoStatus, u64)>> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM videos GROUP BY status")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| Error::database(e.to_string()))?;

    let mut out = Vec::new();
    for row in rows {
        let (status, n) = row.map_err(|e| Error::database(e.to_string()))?;
        out.push((status.parse()?, n as u64));
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) fn sample(conn: &Connection) -> Video {
    create_video(
        conn,
        &NewVideo {
            kind: VideoKind::Upload,
            original_path: "sources/clip.mp4".into(),
            original_name: "clip.mp4".into(),
            original_size: 1_000_000,
            mime_type: "video/mp4".into(),
        },
    )
    .unwrap()
}
