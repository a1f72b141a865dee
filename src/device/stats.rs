//! Device statistics snapshot

use serde::Serialize;

/// Point-in-time statistics for one device instance
///
/// Job and byte counts come from monotonically increasing counters that
/// are safe to read concurrently with writers; the remaining fields are
/// instantaneous gauges.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    /// Jobs accepted by submit since open
    pub jobs_submitted: u64,

    /// Jobs that completed successfully
    pub jobs_completed: u64,

    /// Jobs that ended with a device error
    pub jobs_failed: u64,

    /// Jobs terminated by a wait deadline
    pub jobs_timed_out: u64,

    /// Jobs currently between submit and a terminal state
    pub active_jobs: u64,

    /// Bytes moved between host and device since open
    pub bytes_transferred: u64,

    /// Device memory currently allocated to buffers
    pub memory_used: u64,

    /// Total device memory
    pub memory_total: u64,

    /// Transfer channels not currently leased
    pub free_channels: usize,

    /// Live buffer handles
    pub live_buffers: usize,

    /// Live model handles
    pub live_models: usize,
}
