//! Queue health and metrics sampling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use rf_core::events::EventPayload;
use rf_core::{Result, VideoStatus};

use crate::queue::{QueueManager, QueueStats};
use crate::settings::PipelineSettings;

/// A lane needs this many finished jobs before its failure rate is judged.
const MIN_FAILURE_SAMPLE: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// The condition behind an alert. Together with the lane it identifies an
/// alert across checks while its message numbers change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DatabaseUnavailable,
    NoCapacity,
    LanePaused,
    Backlog,
    FailureRate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub lane: Option<String>,
    pub message: String,
}

impl Alert {
    fn same_condition(&self, other: &Alert) -> bool {
        self.kind == other.kind && self.lane == other.lane
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub lanes: Vec<QueueStats>,
    pub videos: Vec<(VideoStatus, u64)>,
    pub alerts: Vec<Alert>,
}

/// Point-in-time lane statistics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSample {
    pub at: DateTime<Utc>,
    pub lanes: Vec<QueueStats>,
}

pub struct Monitor {
    queue: Arc<QueueManager>,
    interval: Duration,
    retention: Duration,
    backlog_alert: u64,
    failure_rate_alert: f64,
    samples: Mutex<VecDeque<MetricsSample>>,
    last_alerts: Mutex<Vec<Alert>>,
}

impl Monitor {
    pub fn new(queue: Arc<QueueManager>, settings: &PipelineSettings) -> Self {
        Self {
            queue,
            interval: settings.monitor_interval,
            retention: settings.metric_retention,
            backlog_alert: settings.backlog_alert,
            failure_rate_alert: settings.failure_rate_alert,
            samples: Mutex::new(VecDeque::new()),
            last_alerts: Mutex::new(Vec::new()),
        }
    }

    /// Current lane statistics.
    pub fn snapshot(&self) -> Result<MetricsSample> {
        Ok(MetricsSample {
            at: Utc::now(),
            lanes: self.queue.get_queue_stats()?,
        })
    }

    /// Record a snapshot and drop samples older than the retention window.
    pub fn sample(&self) -> Result<()> {
        let sample = self.snapshot()?;
        let horizon = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|d| sample.at.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        while samples.front().is_some_and(|s| s.at < horizon) {
            samples.pop_front();
        }
        Ok(())
    }

    /// Retained samples, oldest first.
    pub fn history(&self) -> Vec<MetricsSample> {
        self.samples.lock().iter().cloned().collect()
    }

    pub fn health(&self) -> HealthReport {
        let checked_at = Utc::now();
        let lanes = match self.queue.get_queue_stats() {
            Ok(lanes) => lanes,
            Err(e) => {
                return HealthReport {
                    status: HealthStatus::Unhealthy,
                    checked_at,
                    lanes: Vec::new(),
                    videos: Vec::new(),
                    alerts: vec![Alert {
                        kind: AlertKind::DatabaseUnavailable,
                        lane: None,
                        message: format!("database unavailable: {e}"),
                    }],
                };
            }
        };
        let videos = rf_db::pool::get_conn(self.queue.db())
            .and_then(|conn| rf_db::queries::videos::count_by_status(&conn))
            .unwrap_or_default();

        let mut status = HealthStatus::Healthy;
        let mut alerts = Vec::new();
        let mut raise = |level: HealthStatus, kind: AlertKind, lane_name: &str, message: String| {
            status = status.max(level);
            alerts.push(Alert {
                kind,
                lane: Some(lane_name.to_string()),
                message,
            });
        };

        for lane in &lanes {
            let name = lane.queue_name.as_str();
            let backlog = lane.backlog();
            if lane.max_concurrent_jobs == 0 && backlog > 0 {
                raise(
                    HealthStatus::Unhealthy,
                    AlertKind::NoCapacity,
                    name,
                    format!("lane {name} has {backlog} waiting jobs but no capacity"),
                );
            }
            if lane.paused {
                raise(
                    HealthStatus::Degraded,
                    AlertKind::LanePaused,
                    name,
                    format!("lane {name} is paused"),
                );
            }
            if backlog > self.backlog_alert {
                raise(
                    HealthStatus::Degraded,
                    AlertKind::Backlog,
                    name,
                    format!("lane {name} backlog is {backlog} (threshold {})", self.backlog_alert),
                );
            }
            let finished = lane.completed_jobs + lane.failed_jobs;
            if finished >= MIN_FAILURE_SAMPLE {
                let rate = lane.failed_jobs as f64 / finished as f64;
                if rate > self.failure_rate_alert {
                    raise(
                        HealthStatus::Degraded,
                        AlertKind::FailureRate,
                        name,
                        format!(
                            "lane {name} failure rate is {:.0}% (threshold {:.0}%)",
                            rate * 100.0,
                            self.failure_rate_alert * 100.0
                        ),
                    );
                }
            }
        }

        HealthReport {
            status,
            checked_at,
            lanes,
            videos,
            alerts,
        }
    }

    /// Sample and check health every interval until `cancel` fires. An alert
    /// is logged and broadcast when its condition appears, not on every check
    /// while it lasts.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => self.check(),
            }
        }
        tracing::debug!("Monitor stopped");
    }

    fn check(&self) {
        if let Err(e) = self.sample() {
            tracing::warn!(error = %e, "Metrics sample failed");
        }
        let report = self.health();
        let mut last = self.last_alerts.lock();
        for alert in report
            .alerts
            .iter()
            .filter(|a| !last.iter().any(|l| l.same_condition(a)))
        {
            tracing::warn!(status = %report.status, alert = %alert, "Health alert");
            self.queue.events().broadcast(EventPayload::HealthAlert {
                message: alert.message.clone(),
            });
        }
        if report.alerts.is_empty() && !last.is_empty() {
            tracing::info!("Pipeline healthy again");
        }
        *last = report.alerts;
    }
}
