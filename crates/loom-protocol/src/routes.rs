//! Coordinator route segments.
//!
//! Returned as path segments rather than formatted strings so callers can
//! percent-encode user-supplied parts (the slug) with their URL library.

/// Segments of `jobs/claim/{slug}`.
pub fn claim_segments(slug: &str) -> [&str; 3] {
    ["jobs", "claim", slug]
}

/// Segments of `projects/{id}`.
pub fn project_segments(id: &str) -> [&str; 2] {
    ["projects", id]
}
