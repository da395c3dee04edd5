//! Per-type job dispatch.
//!
//! [`JobExecutor::execute`] runs one attempt of a job against the
//! collaborators and returns its [`JobResult`]. It never touches the job row
//! itself; the worker reports the outcome to the queue. Variant rows are
//! updated here since they describe the artifact being produced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rf_av::{
    MetadataExtractor, PreviewParams, Storage, ThumbnailGenerator, ThumbnailParams,
    TranscodeEngine, TranscodeParams,
};
use rf_core::{Error, OutputFormat, Quality, Result, VariantId, VideoId};
use rf_db::models::{Job, JobPayload, JobResult, VariantOutput};
use rf_db::pool::DbPool;

/// Preview clips are rendered at this width.
const PREVIEW_WIDTH: u32 = 640;

/// The backends a job can be dispatched to.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn TranscodeEngine>,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
    pub storage: Arc<dyn Storage>,
}

/// Storage key of a rendition's primary output file.
pub fn variant_key(video_id: VideoId, quality: Quality, format: OutputFormat) -> String {
    let file = match format {
        OutputFormat::Hls => "index.m3u8".to_string(),
        _ => format!("{quality}.{}", format.extension()),
    };
    format!("variants/{video_id}/{quality}_{format}/{file}")
}

pub fn thumbnails_key(video_id: VideoId) -> String {
    format!("thumbnails/{video_id}")
}

pub fn preview_key(video_id: VideoId) -> String {
    format!("previews/{video_id}/preview.mp4")
}

/// Source file location and known duration of a video.
struct Source {
    path: PathBuf,
    key: String,
    duration: Option<f64>,
}

pub struct JobExecutor {
    db: DbPool,
    collab: Collaborators,
}

impl JobExecutor {
    pub fn new(db: DbPool, collab: Collaborators) -> Self {
        Self { db, collab }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Run one attempt of `job`.
    pub async fn execute(&self, job: &Job) -> Result<JobResult> {
        let source = self.source(job.video_id)?;
        if !self.collab.storage.file_exists(&source.key).await? {
            return Err(Error::Storage(format!("source file '{}' is missing", source.key)));
        }

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempt_count, "Executing job");
        match job.payload {
            JobPayload::Transcode {
                variant_id,
                quality,
                format,
            } => {
                self.transcode(job.video_id, &source.path, variant_id, quality, format)
                    .await
            }
            JobPayload::Thumbnails { count, width } => {
                let dir = self.collab.storage.full_path(&thumbnails_key(job.video_id))?;
                tokio::fs::create_dir_all(&dir).await?;
                let params = ThumbnailParams {
                    count,
                    width,
                    output_dir: dir,
                    duration_hint: source.duration,
                };
                let paths = self
                    .collab
                    .thumbnails
                    .generate_thumbnails(&source.path, &params)
                    .await?;
                Ok(JobResult::Thumbnails { paths })
            }
            JobPayload::Preview { duration_secs } => {
                let output_path = self
                    .collab
                    .storage
                    .prepare_path(&preview_key(job.video_id))
                    .await?;
                let params = PreviewParams {
                    duration_secs,
                    width: PREVIEW_WIDTH,
                    output_path,
                    duration_hint: source.duration,
                };
                let path = self
                    .collab
                    .thumbnails
                    .generate_preview(&source.path, &params)
                    .await?;
                Ok(JobResult::Preview { path })
            }
            JobPayload::Metadata => {
                let metadata = self.collab.extractor.extract_metadata(&source.path).await?;
                let conn = rf_db::pool::get_conn(&self.db)?;
                rf_db::queries::videos::set_metadata(&conn, job.video_id, &metadata)?;
                Ok(JobResult::Metadata { metadata })
            }
        }
    }

    fn source(&self, video_id: VideoId) -> Result<Source> {
        let conn = rf_db::pool::get_conn(&self.db)?;
        let video = rf_db::queries::videos::require_video(&conn, video_id)?;
        Ok(Source {
            path: self.collab.storage.full_path(&video.original_path)?,
            key: video.original_path,
            duration: video.metadata.map(|m| m.duration),
        })
    }

    async fn transcode(
        &self,
        video_id: VideoId,
        input: &Path,
        variant_id: VariantId,
        quality: Quality,
        format: OutputFormat,
    ) -> Result<JobResult> {
        let variant_id = {
            let conn = rf_db::pool::get_conn(&self.db)?;
            let variant = match rf_db::queries::variants::get_variant(&conn, variant_id)? {
                Some(v) if v.status.is_terminal() => {
                    return Err(Error::Conflict(format!(
                        "variant {} is already {}",
                        v.id, v.status
                    )));
                }
                Some(v) => v,
                None => rf_db::queries::variants::create_or_get_open(&conn, video_id, quality, format)?,
            };
            rf_db::queries::variants::mark_processing(&conn, variant.id)?;
            variant.id
        };

        let key = variant_key(video_id, quality, format);
        let output_path = self.collab.storage.prepare_path(&key).await?;
        let params = TranscodeParams::new(quality, format, output_path);
        let out = self.collab.engine.transcode(input, &params).await?;
        if !out.success {
            return Err(Error::tool(
                self.collab.engine.name(),
                format!("{quality}/{format} rendition reported failure"),
            ));
        }

        let conn = rf_db::pool::get_conn(&self.db)?;
        rf_db::queries::variants::complete_variant(
            &conn,
            variant_id,
            &VariantOutput {
                output_path: key,
                file_size: out.file_size,
                width: out.width,
                height: out.height,
                bitrate: out.bitrate,
                duration: out.duration,
                codec: out.codec,
            },
        )?;
        tracing::info!(video_id = %video_id, variant_id = %variant_id, quality = %quality, format = %format, size = out.file_size, "Variant encoded");

        Ok(JobResult::Variant {
            variant_id,
            output_path: out.output_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, FakeExtractor, FakeThumbnails};
    use assert_matches::assert_matches;
    use rf_av::LocalStorage;
    use rf_core::{Lane, VariantStatus};
    use rf_db::queries::jobs::{self, NewJob};
    use rf_db::queries::{variants, videos};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: DbPool,
        exec: JobExecutor,
        video_id: VideoId,
    }

    async fn fixture(engine: FakeEngine, extractor: FakeExtractor) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::open(dir.path()).unwrap());
        storage.save_file("sources/a/clip.mp4", b"not really a video").await.unwrap();

        let db = rf_db::pool::init_memory_pool().unwrap();
        let video_id = crate::queue::tests::sample_video(&db).id;
        let collab = Collaborators {
            engine: Arc::new(engine),
            extractor: Arc::new(extractor),
            thumbnails: Arc::new(FakeThumbnails::new()),
            storage,
        };
        Fixture {
            _dir: dir,
            exec: JobExecutor::new(db.clone(), collab),
            db,
            video_id,
        }
    }

    fn job(db: &DbPool, video_id: VideoId, payload: JobPayload) -> Job {
        let conn = rf_db::pool::get_conn(db).unwrap();
        jobs::create_job(
            &conn,
            &NewJob {
                video_id,
                lane: Lane::Normal,
                priority: 0,
                max_attempts: 3,
                payload,
            },
        )
        .unwrap();
        jobs::dequeue_next(&conn, Lane::Normal, "test").unwrap().unwrap()
    }

    #[test]
    fn keys_are_per_rendition() {
        let id = VideoId::new();
        assert_eq!(
            variant_key(id, Quality::High, OutputFormat::Mp4),
            format!("variants/{id}/high_mp4/high.mp4")
        );
        assert_eq!(
            variant_key(id, Quality::Low, OutputFormat::Hls),
            format!("variants/{id}/low_hls/index.m3u8")
        );
    }

    #[tokio::test]
    async fn transcode_completes_variant() {
        let f = fixture(FakeEngine::new(), FakeExtractor::new()).await;
        let variant = {
            let conn = rf_db::pool::get_conn(&f.db).unwrap();
            variants::create_or_get_open(&conn, f.video_id, Quality::High, OutputFormat::Mp4).unwrap()
        };
        let job = job(
            &f.db,
            f.video_id,
            JobPayload::Transcode {
                variant_id: variant.id,
                quality: Quality::High,
                format: OutputFormat::Mp4,
            },
        );

        let result = f.exec.execute(&job).await.unwrap();
        assert_matches!(result, JobResult::Variant { variant_id, .. } if variant_id == variant.id);

        let conn = rf_db::pool::get_conn(&f.db).unwrap();
        let stored = variants::get_variant(&conn, variant.id).unwrap().unwrap();
        assert_eq!(stored.status, VariantStatus::Completed);
        assert_eq!(stored.height, Some(1080));
        assert_eq!(
            stored.output_path.as_deref(),
            Some(variant_key(f.video_id, Quality::High, OutputFormat::Mp4).as_str())
        );
    }

    #[tokio::test]
    async fn engine_failure_leaves_variant_open() {
        let f = fixture(FakeEngine::new().failing_first(1), FakeExtractor::new()).await;
        let job = job(
            &f.db,
            f.video_id,
            JobPayload::Transcode {
                variant_id: VariantId::new(),
                quality: Quality::Low,
                format: OutputFormat::Webm,
            },
        );

        let err = f.exec.execute(&job).await.unwrap_err();
        assert!(err.is_retryable());

        let conn = rf_db::pool::get_conn(&f.db).unwrap();
        let open = variants::list_for_video(&conn, f.video_id).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, VariantStatus::Processing);
    }

    #[tokio::test]
    async fn metadata_job_stores_metadata() {
        let f = fixture(FakeEngine::new(), FakeExtractor::new()).await;
        let job = job(&f.db, f.video_id, JobPayload::Metadata);

        let result = f.exec.execute(&job).await.unwrap();
        assert_matches!(result, JobResult::Metadata { .. });
        let conn = rf_db::pool::get_conn(&f.db).unwrap();
        let video = videos::require_video(&conn, f.video_id).unwrap();
        assert_eq!(video.metadata, Some(FakeExtractor::sample_metadata()));
    }

    #[tokio::test]
    async fn thumbnails_written_under_video_dir() {
        let f = fixture(FakeEngine::new(), FakeExtractor::new()).await;
        let job = job(&f.db, f.video_id, JobPayload::Thumbnails { count: 3, width: 320 });

        let result = f.exec.execute(&job).await.unwrap();
        let JobResult::Thumbnails { paths } = result else {
            panic!("expected thumbnails");
        };
        assert_eq!(paths.len(), 3);
        for p in &paths {
            assert!(p.exists(), "{}", p.display());
            assert!(p.to_string_lossy().contains(&thumbnails_key(f.video_id)));
        }
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let f = fixture(FakeEngine::new(), FakeExtractor::new()).await;
        f.exec
            .collaborators()
            .storage
            .delete_file("sources/a/clip.mp4")
            .await
            .unwrap();
        let job = job(&f.db, f.video_id, JobPayload::Preview { duration_secs: 5 });

        let err = f.exec.execute(&job).await.unwrap_err();
        assert_matches!(err, Error::Storage(_));
        assert!(!err.is_retryable());
    }
}
