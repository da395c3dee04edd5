//! Durable job queue operations.
//!
//! Lifecycle: `create_job` inserts a `queued` row. `dequeue_next` claims the
//! oldest eligible row of a lane and bumps `attempt_count`. The attempt number
//! then fences every later transition (`complete_job`, `schedule_retry`,
//! `fail_job`, `reap_job`), so a worker whose job was reaped and handed to
//! someone else cannot report over the newer attempt.
//!
//! A queued row with `retry_at` set is waiting out a backoff and is invisible
//! to `dequeue_next` until `release_due_retries` clears it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use rf_core::{Error, JobId, JobStatus, Lane, OutputFormat, Quality, Result, VideoId};

use crate::format_ts;
use crate::models::{Job, JobCounts, JobPayload, JobResult};

const COLS: &str = "id, video_id, job_type, status, lane, priority, quality, format,
    attempt_count, max_attempts, payload, result, error, locked_by, scheduled_at,
    retry_at, started_at, completed_at, created_at";

/// Map a write error, turning uniqueness violations into `Conflict`.
fn write_err(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            Error::Conflict(format!("job constraint violated: {e}"))
        }
        _ => Error::database(e.to_string()),
    }
}

fn collect(stmt: &mut rusqlite::Statement<'_>, params: impl rusqlite::Params) -> Result<Vec<Job>> {
    let rows = stmt
        .query_map(params, Job::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Description of a job to enqueue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub video_id: VideoId,
    pub lane: Lane,
    pub priority: i32,
    pub max_attempts: u32,
    pub payload: JobPayload,
}

impl NewJob {
    fn rendition(&self) -> (Option<Quality>, Option<OutputFormat>) {
        match self.payload {
            JobPayload::Transcode {
                quality, format, ..
            } => (Some(quality), Some(format)),
            _ => (None, None),
        }
    }
}

/// Insert a `queued` job with `scheduled_at = now`.
///
/// Fails with `Conflict` if an active job already targets the same rendition
/// (or the same artifact type for non-transcode jobs).
pub fn create_job(conn: &Connection, new: &NewJob) -> Result<Job> {
    let id = JobId::new();
    let now = Utc::now();
    let ts = format_ts(now);
    let job_type = new.payload.job_type();
    let (quality, format) = new.rendition();
    let payload = serde_json::to_string(&new.payload)
        .map_err(|e| Error::Internal(format!("payload serialization: {e}")))?;

    conn.execute(
        "INSERT INTO jobs (id, video_id, job_type, status, lane, priority, quality, format,
                           attempt_count, max_attempts, payload, scheduled_at, created_at)
         VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?6, ?7, 0, ?8, ?9, ?10, ?10)",
        rusqlite::params![
            id.to_string(),
            new.video_id.to_string(),
            job_type.as_str(),
            new.lane.as_str(),
            new.priority,
            quality.map(|q| q.as_str()),
            format.map(|f| f.as_str()),
            new.max_attempts,
            payload,
            ts,
        ],
    )
    .map_err(write_err)?;

    Ok(Job {
        id,
        video_id: new.video_id,
        job_type,
        status: JobStatus::Queued,
        lane: new.lane,
        priority: new.priority,
        quality,
        format,
        attempt_count: 0,
        max_attempts: new.max_attempts,
        payload: new.payload.clone(),
        result: None,
        error: None,
        locked_by: None,
        scheduled_at: now,
        retry_at: None,
        started_at: None,
        completed_at: None,
        created_at: now,
    })
}

/// Insert several jobs atomically: either all are queued or none.
pub fn create_jobs(conn: &Connection, batch: &[NewJob]) -> Result<Vec<Job>> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;
    let jobs = batch
        .iter()
        .map(|new| create_job(&tx, new))
        .collect::<Result<Vec<_>>>()?;
    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(jobs)
}

/// Insert a video's jobs, but only while the video is still `processing`.
///
/// The guard is a write on the video row inside the same transaction, so a
/// concurrent cancel either lands before (nothing is inserted, `None`) or
/// after the commit (and then sees the queued rows).
pub fn create_jobs_while_processing(
    conn: &Connection,
    video_id: VideoId,
    batch: &[NewJob],
) -> Result<Option<Vec<Job>>> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;
    let held = tx
        .execute(
            "UPDATE videos SET updated_at = ?1 WHERE id = ?2 AND status = 'processing'",
            rusqlite::params![format_ts(Utc::now()), video_id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    if held == 0 {
        return Ok(None);
    }
    let jobs = batch
        .iter()
        .map(|new| create_job(&tx, new))
        .collect::<Result<Vec<_>>>()?;
    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(Some(jobs))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], Job::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// All jobs of a video, in creation order.
pub fn list_for_video(conn: &Connection, video_id: VideoId) -> Result<Vec<Job>> {
    let q = format!("SELECT {COLS} FROM jobs WHERE video_id = ?1 ORDER BY created_at ASC, id");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    collect(&mut stmt, [video_id.to_string()])
}

/// Atomically claim the next eligible job of `lane`.
///
/// Picks the highest priority, then oldest `scheduled_at`, among queued rows
/// not waiting on a retry backoff. The claimed row becomes `processing`,
/// gets `started_at = now` and its `attempt_count` incremented.
pub fn dequeue_next(conn: &Connection, lane: Lane, worker: &str) -> Result<Option<Job>> {
    let q = format!(
        "UPDATE jobs SET status = 'processing', attempt_count = attempt_count + 1,
                locked_by = ?2, started_at = ?3, completed_at = NULL
         WHERE id = (
             SELECT id FROM jobs
             WHERE status = 'queued' AND lane = ?1 AND retry_at IS NULL
             ORDER BY priority DESC, scheduled_at ASC
             LIMIT 1
         )
         RETURNING {COLS}"
    );
    conn.query_row(
        &q,
        rusqlite::params![lane.as_str(), worker, format_ts(Utc::now())],
        Job::from_row,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Finish an attempt successfully.
pub fn complete_job(conn: &Connection, id: JobId, attempt: u32, result: &JobResult) -> Result<bool> {
    let result = serde_json::to_string(result)
        .map_err(|e| Error::Internal(format!("result serialization: {e}")))?;
    let n = conn
        .execute(
            "UPDATE jobs SET status = 'completed', result = ?1, error = NULL,
                    locked_by = NULL, completed_at = ?2
             WHERE id = ?3 AND status = 'processing' AND attempt_count = ?4",
            rusqlite::params![result, format_ts(Utc::now()), id.to_string(), attempt],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Put a failed attempt back in the queue behind a backoff.
///
/// Only applies while attempts remain.
pub fn schedule_retry(
    conn: &Connection,
    id: JobId,
    attempt: u32,
    error: &str,
    retry_at: DateTime<Utc>,
) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET status = 'queued', error = ?1, retry_at = ?2,
                    locked_by = NULL, started_at = NULL
             WHERE id = ?3 AND status = 'processing' AND attempt_count = ?4
               AND attempt_count < max_attempts",
            rusqlite::params![error, format_ts(retry_at), id.to_string(), attempt],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Terminally fail an attempt.
pub fn fail_job(conn: &Connection, id: JobId, attempt: u32, error: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE jobs SET status = 'failed', error = ?1, locked_by = NULL, completed_at = ?2
             WHERE id = ?3 AND status = 'processing' AND attempt_count = ?4",
            rusqlite::params![error, format_ts(Utc::now()), id.to_string(), attempt],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Make backed-off jobs whose `retry_at` has passed eligible again.
///
/// Their `scheduled_at` is refreshed, so a retried job queues behind work
/// that arrived while it was waiting.
pub fn release_due_retries(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<(JobId, Lane)>> {
    let ts = format_ts(now);
    let mut stmt = conn
        .prepare(
            "UPDATE jobs SET retry_at = NULL, scheduled_at = ?1
             WHERE status = 'queued' AND retry_at IS NOT NULL AND retry_at <= ?1
             RETURNING id, lane",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([&ts], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| Error::database(e.to_string()))?;

    let mut out = Vec::new();
    for row in rows {
        let (id, lane) = row.map_err(|e| Error::database(e.to_string()))?;
        out.push((id.parse()?, lane.parse()?));
    }
    Ok(out)
}

/// Processing jobs whose attempt started before `cutoff`.
pub fn list_stuck(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
    let q = format!(
        "SELECT {COLS} FROM jobs WHERE status = 'processing' AND started_at < ?1
         ORDER BY started_at ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    collect(&mut stmt, [format_ts(cutoff)])
}

/// Recover one abandoned attempt: requeue it if attempts remain, else fail it.
///
/// Returns the new status, or `None` if the job moved on in the meantime.
pub fn reap_job(conn: &Connection, job: &Job, error: &str) -> Result<Option<JobStatus>> {
    let now = format_ts(Utc::now());
    let (sql, next) = if job.has_attempts_left() {
        (
            "UPDATE jobs SET status = 'queued', error = ?1, scheduled_at = ?2,
                    locked_by = NULL, started_at = NULL
             WHERE id = ?3 AND status = 'processing' AND attempt_count = ?4",
            JobStatus::Queued,
        )
    } else {
        (
            "UPDATE jobs SET status = 'failed', error = ?1, completed_at = ?2, locked_by = NULL
             WHERE id = ?3 AND status = 'processing' AND attempt_count = ?4",
            JobStatus::Failed,
        )
    };
    let n = conn
        .execute(
            sql,
            rusqlite::params![error, now, job.id.to_string(), job.attempt_count],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok((n > 0).then_some(next))
}

/// Recover every `processing` row left behind by a previous process.
///
/// Only safe at startup, before any worker runs. Returns `(requeued, failed)`.
pub fn recover_orphaned(conn: &Connection) -> Result<(usize, Vec<Job>)> {
    let now = format_ts(Utc::now());
    let requeued = conn
        .execute(
            "UPDATE jobs SET status = 'queued', scheduled_at = ?1, locked_by = NULL,
                    started_at = NULL, error = 'interrupted by restart'
             WHERE status = 'processing' AND attempt_count < max_attempts",
            [&now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let q = format!(
        "UPDATE jobs SET status = 'failed', completed_at = ?1, locked_by = NULL,
                error = 'interrupted by restart after final attempt'
         WHERE status = 'processing'
         RETURNING {COLS}"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let failed = collect(&mut stmt, [&now])?;
    Ok((requeued, failed))
}

/// Cancel every queued job of a video, including ones waiting on a retry.
pub fn cancel_queued_for_video(conn: &Connection, video_id: VideoId) -> Result<Vec<Job>> {
    let q = format!(
        "UPDATE jobs SET status = 'cancelled', retry_at = NULL, completed_at = ?1
         WHERE video_id = ?2 AND status = 'queued'
         RETURNING {COLS}"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    collect(
        &mut stmt,
        rusqlite::params![format_ts(Utc::now()), video_id.to_string()],
    )
}

/// Delete terminal jobs finished before `cutoff`.
///
/// Jobs of a video that is still processing are kept, since its progress is
/// computed from them.
pub fn prune_terminal(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM jobs
         WHERE status IN ('completed', 'failed', 'cancelled')
           AND completed_at < ?1
           AND video_id NOT IN (SELECT id FROM videos WHERE status = 'processing')",
        [format_ts(cutoff)],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Delete the finished jobs of a video before it is processed again.
pub fn delete_terminal_for_video(conn: &Connection, video_id: VideoId) -> Result<usize> {
    conn.execute(
        "DELETE FROM jobs WHERE video_id = ?1
           AND status IN ('completed', 'failed', 'cancelled')",
        [video_id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Whether any job of the video is queued or processing.
pub fn has_active_jobs(conn: &Connection, video_id: VideoId) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM jobs WHERE video_id = ?1 AND status IN ('queued', 'processing')",
        [video_id.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

fn grouped_counts(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<(String, JobStatus, bool, u64)>> {
    let mut stmt = conn.prepare(sql).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(|e| Error::database(e.to_string()))?;

    let mut out = Vec::new();
    for row in rows {
        let (key, status, retrying, n) = row.map_err(|e| Error::database(e.to_string()))?;
        out.push((key, status.parse()?, retrying, n as u64));
    }
    Ok(out)
}

/// Job counts per lane. Lanes without jobs are absent.
pub fn lane_counts(conn: &Connection) -> Result<HashMap<Lane, JobCounts>> {
    let rows = grouped_counts(
        conn,
        "SELECT lane, status, retry_at IS NOT NULL, COUNT(*) FROM jobs
         GROUP BY lane, status, retry_at IS NOT NULL",
        [],
    )?;
    let mut out: HashMap<Lane, JobCounts> = HashMap::new();
    for (lane, status, retrying, n) in rows {
        out.entry(lane.parse()?).or_default().add(status, retrying, n);
    }
    Ok(out)
}

/// Job counts for a single video.
pub fn counts_for_video(conn: &Connection, video_id: VideoId) -> Result<JobCounts> {
    let rows = grouped_counts(
        conn,
        "SELECT video_id, status, retry_at IS NOT NULL, COUNT(*) FROM jobs
         WHERE video_id = ?1
         GROUP BY status, retry_at IS NOT NULL",
        [video_id.to_string()],
    )?;
    let mut counts = JobCounts::default();
    for (_, status, retrying, n) in rows {
        counts.add(status, retrying, n);
    }
    Ok(counts)
}
