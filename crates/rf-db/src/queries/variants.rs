//! Variant (rendition) record operations.
//!
//! A `(video_id, quality, format)` pair has at most one open variant
//! (`pending` or `processing`); a partial unique index backs this up.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use rf_core::{Error, OutputFormat, Quality, Result, VariantId, VariantStatus, VideoId};

use crate::format_ts;
use crate::models::{Variant, VariantOutput};

const COLS: &str = "id, video_id, quality, format, status, output_path, file_size, width,
    height, bitrate, duration, codec, processing_progress, error, created_at, completed_at";

/// Return the open variant for the pair, creating a `pending` one if none exists.
pub fn create_or_get_open(
    conn: &Connection,
    video_id: VideoId,
    quality: Quality,
    format: OutputFormat,
) -> Result<Variant> {
    let q = format!(
        "SELECT {COLS} FROM variants
         WHERE video_id = ?1 AND quality = ?2 AND format = ?3
           AND status IN ('pending', 'processing')"
    );
    let existing = conn
        .query_row(
            &q,
            rusqlite::params![video_id.to_string(), quality.as_str(), format.as_str()],
            Variant::from_row,
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;
    if let Some(v) = existing {
        return Ok(v);
    }

    let id = VariantId::new();
    let now = Utc::now();
    conn.execute(
        "INSERT INTO variants (id, video_id, quality, format, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        rusqlite::params![
            id.to_string(),
            video_id.to_string(),
            quality.as_str(),
            format.as_str(),
            format_ts(now),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Variant {
        id,
        video_id,
        quality,
        format,
        status: VariantStatus::Pending,
        output_path: None,
        file_size: None,
        width: None,
        height: None,
        bitrate: None,
        duration: None,
        codec: None,
        processing_progress: 0.0,
        error: None,
        created_at: now,
        completed_at: None,
    })
}

pub fn get_variant(conn: &Connection, id: VariantId) -> Result<Option<Variant>> {
    let q = format!("SELECT {COLS} FROM variants WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], Variant::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// All variants of a video, oldest first.
pub fn list_for_video(conn: &Connection, video_id: VideoId) -> Result<Vec<Variant>> {
    let q = format!("SELECT {COLS} FROM variants WHERE video_id = ?1 ORDER BY created_at ASC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([video_id.to_string()], Variant::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Move an open variant to `processing` when its job starts an attempt.
pub fn mark_processing(conn: &Connection, id: VariantId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE variants SET status = 'processing', error = NULL
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            [id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record encoder output and finalize the variant.
pub fn complete_variant(conn: &Connection, id: VariantId, out: &VariantOutput) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE variants SET status = 'completed', output_path = ?1, file_size = ?2,
                    width = ?3, height = ?4, bitrate = ?5, duration = ?6, codec = ?7,
                    processing_progress = 100, error = NULL, completed_at = ?8
             WHERE id = ?9 AND status IN ('pending', 'processing')",
            rusqlite::params![
                out.output_path,
                out.file_size as i64,
                out.width,
                out.height,
                out.bitrate as i64,
                out.duration,
                out.codec,
                format_ts(Utc::now()),
                id.to_string(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Finalize an open variant as failed.
pub fn fail_variant(conn: &Connection, id: VariantId, error: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE variants SET status = 'failed', error = ?1, completed_at = ?2
             WHERE id = ?3 AND status IN ('pending', 'processing')",
            rusqlite::params![error, format_ts(Utc::now()), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Fail every variant of a video that never started encoding.
pub fn fail_pending_for_video(conn: &Connection, video_id: VideoId, error: &str) -> Result<usize> {
    conn.execute(
        "UPDATE variants SET status = 'failed', error = ?1, completed_at = ?2
         WHERE video_id = ?3 AND status = 'pending'",
        rusqlite::params![error, format_ts(Utc::now()), video_id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))
}
