//! Job status state machine
//!
//! Tracks the statuses this worker has had confirmed by the coordinator:
//! CLAIMED → WORKING → {COMPLETED | FAILED}
//!
//! CLAIMED is held locally after a claim; every later status is recorded only
//! once the coordinator has acknowledged it.

mod job_state;

pub use job_state::{JobStateError, JobStatusData, StatusTransition};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering events within a single machine
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
