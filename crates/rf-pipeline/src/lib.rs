//! rf-pipeline: the transcoding job pipeline.
//!
//! Data and control flow:
//!
//! ```text
//! Orchestrator --add_jobs--> QueueManager <--dequeue/report-- WorkerPool --> JobExecutor --> collaborators
//!      ^                          ^                               |
//!      |                          +------ Scheduler (retry, reap, prune)
//!      +---- status::recompute_video <----------------------------+
//! Monitor observes QueueManager stats and video counts.
//! ```
//!
//! Lane capacity lives in memory ([`lanes::LaneState`]); everything else is a
//! row in the database, so a restarted process resumes from the queue.

pub mod executor;
pub mod lanes;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod worker;

pub use executor::{Collaborators, JobExecutor};
pub use monitor::{Alert, AlertKind, HealthReport, HealthStatus, Monitor};
pub use orchestrator::{Orchestrator, ProcessOptions, ProcessResult, ProcessingStatus};
pub use queue::{JobOutcome, JobSpec, OutcomeReport, QueueManager, QueueStats};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use service::Pipeline;
pub use settings::PipelineSettings;
pub use worker::WorkerPool;
