//! Runtime settings derived from [`Config`].

use std::collections::HashMap;
use std::time::Duration;

use rf_core::config::{Config, ProcessingConfig, StorageConfig};
use rf_core::Lane;

use crate::retry::RetryPolicy;

/// Everything the pipeline components need, with durations resolved.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lane_capacity: HashMap<Lane, usize>,
    pub max_attempts: u32,
    pub retry: RetryPolicy,
    /// Deadline for a single job execution.
    pub job_timeout: Duration,
    /// A PROCESSING job older than this is considered abandoned.
    pub reap_after: Duration,
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention: Duration,
    /// How long in-flight jobs may keep running after shutdown is requested.
    pub shutdown_grace: Duration,
    pub monitor_interval: Duration,
    pub metric_retention: Duration,
    pub backlog_alert: u64,
    pub failure_rate_alert: f64,
    pub processing: ProcessingConfig,
    /// Upload limits applied by ingest.
    pub storage: StorageConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let q = &config.queue;
        // The engine limit caps every job, whichever is tighter wins.
        let job_timeout_secs = match config.engine.job_timeout_secs {
            0 => q.job_timeout_secs,
            engine => q.job_timeout_secs.min(engine),
        };
        let job_timeout = Duration::from_secs(job_timeout_secs);

        Self {
            lane_capacity: Lane::ALL
                .iter()
                .map(|lane| (*lane, q.lane(*lane).max_concurrent_jobs))
                .collect(),
            max_attempts: q.max_attempts.max(1),
            retry: RetryPolicy::new(
                Duration::from_millis(q.retry_delay_ms),
                Duration::from_millis(q.max_retry_delay_ms),
            ),
            job_timeout,
            reap_after: job_timeout
                .saturating_add(Duration::from_secs(config.scheduler.reap_grace_secs)),
            poll_interval: Duration::from_millis(q.poll_interval_ms.max(10)),
            tick_interval: Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
            cleanup_interval: Duration::from_secs(config.scheduler.cleanup_interval_secs.max(1)),
            retention: Duration::from_secs(config.scheduler.retention_hours.saturating_mul(3600)),
            shutdown_grace: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(config.monitoring.interval_secs.max(1)),
            metric_retention: Duration::from_secs(config.monitoring.metric_retention_secs),
            backlog_alert: config.monitoring.queue_backlog_alert,
            failure_rate_alert: config.monitoring.failure_rate_alert,
            processing: config.processing.clone(),
            storage: config.storage.clone(),
        }
    }

    pub fn capacity(&self, lane: Lane) -> usize {
        self.lane_capacity.get(&lane).copied().unwrap_or(0)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config() {
        let s = PipelineSettings::default();
        assert_eq!(s.capacity(Lane::High), 4);
        assert_eq!(s.capacity(Lane::Thumbnail), 2);
        assert_eq!(s.max_attempts, 3);
        assert_eq!(s.job_timeout, Duration::from_secs(1800));
        assert_eq!(s.reap_after, Duration::from_secs(1860));
    }

    #[test]
    fn engine_timeout_caps_job_timeout() {
        let mut cfg = Config::default();
        cfg.engine.job_timeout_secs = 60;
        assert_eq!(PipelineSettings::from_config(&cfg).job_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_attempts_means_one() {
        let mut cfg = Config::default();
        cfg.queue.max_attempts = 0;
        assert_eq!(PipelineSettings::from_config(&cfg).max_attempts, 1);
    }

    #[test]
    fn oversized_durations_saturate() {
        let mut cfg = Config::default();
        cfg.scheduler.retention_hours = u64::MAX;
        cfg.scheduler.reap_grace_secs = u64::MAX;
        cfg.queue.job_timeout_secs = u64::MAX;
        cfg.engine.job_timeout_secs = 0;

        let s = PipelineSettings::from_config(&cfg);
        assert_eq!(s.retention, Duration::from_secs(u64::MAX));
        assert_eq!(s.reap_after, Duration::MAX);
    }
}
