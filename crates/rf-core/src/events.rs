//! Job, video and lane events published by the pipeline.
//!
//! Subscribers get a `tokio::sync::broadcast` receiver. The bus also keeps a
//! short history so a reader that attaches late can see what already happened.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::{JobId, VideoId};
use crate::media::{JobType, Lane};

/// Events kept for late readers.
const HISTORY_LEN: usize = 100;

/// What happened. Serialized with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // -- Job lifecycle -------------------------------------------------------
    JobQueued {
        job_id: JobId,
        video_id: VideoId,
        job_type: JobType,
        lane: Lane,
    },
    JobStarted {
        job_id: JobId,
        attempt: u32,
    },
    JobCompleted {
        job_id: JobId,
    },
    JobRetryScheduled {
        job_id: JobId,
        attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },

    // -- Video lifecycle -----------------------------------------------------
    VideoProcessingStarted {
        video_id: VideoId,
        jobs: usize,
    },
    VideoProgress {
        video_id: VideoId,
        progress: f64,
    },
    VideoCompleted {
        video_id: VideoId,
    },
    VideoFailed {
        video_id: VideoId,
        error: String,
    },

    // -- Lanes and health ----------------------------------------------------
    LanePaused {
        lane: Lane,
    },
    LaneResumed {
        lane: Lane,
    },
    HealthAlert {
        message: String,
    },
}

/// An [`EventPayload`] stamped with an id and the time it was raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The video this event concerns, when the payload names one directly.
    pub fn video_id(&self) -> Option<VideoId> {
        match &self.payload {
            EventPayload::JobQueued { video_id, .. }
            | EventPayload::VideoProcessingStarted { video_id, .. }
            | EventPayload::VideoProgress { video_id, .. }
            | EventPayload::VideoCompleted { video_id }
            | EventPayload::VideoFailed { video_id, .. } => Some(*video_id),
            _ => None,
        }
    }
}

/// Fan-out of pipeline events.
///
/// Sending never blocks and never fails: with no receivers the event is only
/// kept in the history, and a lagging receiver loses the oldest events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// `capacity` bounds the undelivered events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_LEN)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);
        let mut history = self.history.write();
        history.truncate(HISTORY_LEN - 1);
        history.push_front(event.clone());
        drop(history);
        let _ = self.tx.send(event);
    }

    /// Retained events about one video, newest first.
    pub fn recent_for_video(&self, video_id: VideoId) -> Vec<Event> {
        self.history
            .read()
            .iter()
            .filter(|e| e.video_id() == Some(video_id))
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = JobId::new();
        bus.broadcast(EventPayload::JobCancelled { job_id });

        assert_matches!(
            rx.try_recv().unwrap().payload,
            EventPayload::JobCancelled { job_id: got } if got == job_id
        );
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let bus = EventBus::default();
        let video_id = VideoId::new();
        for _ in 0..HISTORY_LEN + 20 {
            bus.broadcast(EventPayload::VideoProgress { video_id, progress: 10.0 });
        }
        bus.broadcast(EventPayload::VideoCompleted { video_id });

        let events = bus.recent_for_video(video_id);
        assert_eq!(events.len(), HISTORY_LEN);
        assert_matches!(events[0].payload, EventPayload::VideoCompleted { .. });
    }

    #[test]
    fn history_filters_by_video() {
        let bus = EventBus::new(4);
        let ours = VideoId::new();
        bus.broadcast(EventPayload::VideoProgress { video_id: ours, progress: 50.0 });
        bus.broadcast(EventPayload::VideoCompleted { video_id: VideoId::new() });
        bus.broadcast(EventPayload::VideoCompleted { video_id: ours });

        let events = bus.recent_for_video(ours);
        assert_eq!(events.len(), 2);
        assert_matches!(events[0].payload, EventPayload::VideoCompleted { .. });
    }

    #[test]
    fn payload_tagged_serialization() {
        let json = serde_json::to_string(&EventPayload::VideoFailed {
            video_id: VideoId::new(),
            error: "2 of 3 jobs failed".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"video_failed\""));
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.broadcast(EventPayload::HealthAlert {
            message: "test".into(),
        });
    }
}
