//! Query modules, one per table.

pub mod jobs;
pub mod variants;
pub mod videos;
