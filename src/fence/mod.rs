//! Fence issue and job-completion tracking
//!
//! Every submitted job gets a monotonically increasing 64-bit fence,
//! unique for the lifetime of the device. The tracker records per-job
//! state, delivers completions exactly once, and lets any number of
//! waiters block until a fence reaches a terminal status.

pub mod tracker;
pub mod types;

pub use tracker::FenceTracker;
pub use types::{JobRecord, JobStatus};
