//! In-process coordinator double
//!
//! [`MockCoordinator`] implements [`Coordinator`](crate::coordinator::Coordinator)
//! without a network. It records every call so tests can assert the exact
//! status sequence a run produced, and supports failure injection per call
//! kind for exercising error paths.

mod coordinator;
mod failure;

pub use coordinator::{project_payload, CoordinatorCall, MockCoordinator};
pub use failure::{CallKind, FailureConfig, FailureInjector};
