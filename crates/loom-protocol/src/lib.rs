//! Loom Protocol Types
//!
//! Defines the JSON bodies exchanged between a worker and the Loom
//! coordinator, plus the route paths the coordinator exposes.

pub mod claim;
pub mod routes;
pub mod status;

pub use claim::{ClaimResponse, ProjectId, ProjectPayload};
pub use status::{JobStatus, StatusUpdate};

/// Progress value sent with the finalize call.
pub const FINAL_PROGRESS: u8 = 100;
