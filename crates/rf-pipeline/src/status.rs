//! Derive a video's lifecycle state from its jobs.
//!
//! Progress is the share of terminal jobs and only ever rises. Once every
//! job is terminal the video becomes COMPLETED when none failed, FAILED
//! otherwise. All writes are compare-and-set on `processing`, so a video
//! that was cancelled or finished meanwhile is left alone.

use rf_core::events::{EventBus, EventPayload};
use rf_core::{JobStatus, Result, VideoId, VideoStatus};
use rf_db::models::{Job, JobPayload};
use rf_db::pool::DbPool;

/// Recompute progress and terminal state of a PROCESSING video.
///
/// Returns the video's status afterwards, or `None` if it no longer exists.
pub fn recompute_video(db: &DbPool, events: &EventBus, video_id: VideoId) -> Result<Option<VideoStatus>> {
    let conn = rf_db::pool::get_conn(db)?;
    let Some(video) = rf_db::queries::videos::get_video(&conn, video_id)? else {
        return Ok(None);
    };
    if video.status != VideoStatus::Processing {
        return Ok(Some(video.status));
    }

    let jobs = rf_db::queries::jobs::list_for_video(&conn, video_id)?;
    if jobs.is_empty() {
        return Ok(Some(video.status));
    }

    let total = jobs.len();
    let terminal = jobs.iter().filter(|j| j.status.is_terminal()).count();
    let progress = terminal as f64 / total as f64 * 100.0;
    if progress > video.processing_progress
        && rf_db::queries::videos::update_progress(&conn, video_id, progress)?
    {
        events.broadcast(EventPayload::VideoProgress { video_id, progress });
    }

    if terminal < total {
        return Ok(Some(VideoStatus::Processing));
    }

    let failed: Vec<&Job> = jobs.iter().filter(|j| j.status == JobStatus::Failed).collect();
    let counted = jobs.iter().filter(|j| j.status != JobStatus::Cancelled).count();

    if failed.is_empty() && counted > 0 {
        if rf_db::queries::videos::mark_completed(&conn, video_id)? {
            tracing::info!(video_id = %video_id, jobs = total, "Video processing completed");
            events.broadcast(EventPayload::VideoCompleted { video_id });
            return Ok(Some(VideoStatus::Completed));
        }
    } else {
        let error = if failed.is_empty() {
            "all jobs were cancelled".to_string()
        } else {
            let first = failed[0].error.as_deref().unwrap_or("unknown error");
            format!("{} of {counted} jobs failed: {first}", failed.len())
        };
        if rf_db::queries::videos::mark_failed(&conn, video_id, &error)? {
            tracing::warn!(video_id = %video_id, error = %error, "Video processing failed");
            events.broadcast(EventPayload::VideoFailed { video_id, error });
            return Ok(Some(VideoStatus::Failed));
        }
    }

    // Lost a race with another writer; report what is stored now.
    Ok(rf_db::queries::videos::get_video(&conn, video_id)?.map(|v| v.status))
}

/// Side effects of a job reaching FAILED: its variant is finalized as failed.
pub fn finalize_failed_job(db: &DbPool, job: &Job, error: &str) -> Result<()> {
    if let JobPayload::Transcode { variant_id, .. } = job.payload {
        let conn = rf_db::pool::get_conn(db)?;
        rf_db::queries::variants::fail_variant(&conn, variant_id, error)?;
    }
    Ok(())
}
