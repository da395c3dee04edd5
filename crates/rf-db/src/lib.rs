//! rf-db: durable storage for videos, variants and jobs.
//!
//! SQLite via r2d2 connection pooling, embedded migrations, typed row models
//! and one query module per table. Every status change is a compare-and-set
//! `UPDATE ... WHERE status = ...`; callers learn whether they won the race
//! from the returned row count.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage.
///
/// Fixed-width microsecond precision with a `Z` suffix, so that lexical
/// comparison in SQL matches chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time, formatted for storage.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}
