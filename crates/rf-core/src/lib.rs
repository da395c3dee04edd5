//! rf-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other rf-* crates. It
//! holds the typed identifiers, the record state machines (video, variant,
//! job, lane), the unified error type, application configuration, and the
//! broadcast event bus used for job lifecycle notifications.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
