//! Application assembly: config file to database, settings and health.

mod common;

use std::sync::Arc;

use common::TestHarness;
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_core::{Lane, Quality};
use rf_pipeline::testing::FakeEngine;
use rf_pipeline::{HealthStatus, PipelineSettings, ProcessOptions, QueueManager};

#[test]
fn open_database_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database.path = dir.path().join("nested/state/reelforge.db");

    let db = reelforge::open_database(&config).unwrap();
    assert!(config.database.path.is_file());

    // Reopening an existing database runs migrations idempotently.
    drop(db);
    reelforge::open_database(&config).unwrap();
}

#[test]
fn config_file_drives_lane_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reelforge.json");
    std::fs::write(
        &path,
        r#"{
            "queue": {
                "high": { "max_concurrent_jobs": 6 },
                "low": { "max_concurrent_jobs": 1 },
                "max_attempts": 4
            },
            "monitoring": { "queue_backlog_alert": 5 }
        }"#,
    )
    .unwrap();

    let config = Config::load_or_default(Some(&path));
    let settings = PipelineSettings::from_config(&config);
    let db = rf_db::pool::init_memory_pool().unwrap();
    let queue = QueueManager::new(db, Arc::new(EventBus::default()), &settings);

    let stats = queue.get_queue_stats().unwrap();
    let capacity = |name: &str| {
        stats
            .iter()
            .find(|s| s.queue_name == name)
            .unwrap()
            .max_concurrent_jobs
    };
    assert_eq!(capacity("high"), 6);
    assert_eq!(capacity("normal"), 2);
    assert_eq!(capacity("low"), 1);
    assert_eq!(settings.max_attempts, 4);
    assert_eq!(settings.backlog_alert, 5);
}

#[tokio::test]
async fn health_reports_backlog_of_idle_pipeline() {
    let h = TestHarness::builder()
        .engine(FakeEngine::new())
        .settings(|s| s.backlog_alert = 2)
        .build();
    let video = h.upload("clip.mp4").await;
    h.process(
        video.id,
        ProcessOptions {
            qualities: Some(vec![Quality::Low, Quality::Medium, Quality::High]),
            priority: Some(Lane::Low),
            generate_thumbnails: Some(false),
            generate_preview: Some(false),
            ..Default::default()
        },
    )
    .await;

    // Workers are not running, so the work just waits.
    let report = h.pipeline.monitor().health();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.alerts.len(), 1);
    assert!(report.alerts[0].message.starts_with("lane low backlog is 3"));

    let low = report.lanes.iter().find(|l| l.queue_name == "low").unwrap();
    assert_eq!(low.queued_jobs, 3);
    assert_eq!(low.current_active_jobs, 0);
}

#[tokio::test]
async fn health_recovers_once_backlog_drains() {
    let mut h = TestHarness::builder()
        .settings(|s| s.backlog_alert = 0)
        .build();
    let video = h.upload("clip.mp4").await;
    h.process(video.id, ProcessOptions::default()).await;
    assert_eq!(h.pipeline.monitor().health().status, HealthStatus::Degraded);

    h.start();
    assert!(h.wait(video.id).await.success);
    h.stop().await;

    let report = h.pipeline.monitor().health();
    assert_eq!(report.status, HealthStatus::Healthy, "{:?}", report.alerts);
    assert!(report
        .videos
        .iter()
        .any(|(status, n)| status.as_str() == "completed" && *n == 1));
}
