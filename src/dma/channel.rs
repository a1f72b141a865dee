//! Transfer channel pool
//!
//! A fixed set of channels shared by every submitter. Exactly one
//! in-flight operation may hold a given channel; leases are RAII guards
//! that return the channel on drop, so a timed-out or panicking caller
//! can never strand one. Lease and release are short critical sections
//! over plain bookkeeping; hardware waits happen outside the lock.

use std::sync::{Arc, Mutex};

use crate::error::{AccelError, AccelResult};

/// Default number of transfer channels
pub const DEFAULT_CHANNELS: usize = 4;

/// Identity of one transfer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

impl ChannelId {
    pub fn new(index: usize) -> Self {
        ChannelId(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct PoolState {
    busy: Vec<bool>,
    free: usize,
}

/// Fixed-size pool of transfer channels
///
/// A pool that initialized with zero channels is "unavailable": every
/// lease fails with a no-device error until a future re-init replaces
/// the pool.
#[derive(Debug)]
pub struct ChannelPool {
    /// Shared with the lease guards so release needs no pool reference
    state: Arc<Mutex<PoolState>>,
    count: usize,
}

impl ChannelPool {
    /// Create a pool with `count` channels
    pub fn new(count: usize) -> Arc<Self> {
        if count == 0 {
            tracing::warn!("channel pool initialized with zero channels");
        }
        Arc::new(ChannelPool {
            state: Arc::new(Mutex::new(PoolState {
                busy: vec![false; count],
                free: count,
            })),
            count,
        })
    }

    /// Lease the first free channel in scan order.
    ///
    /// Scan order is fair enough in practice: leases are short-lived and
    /// every submitter contends on the same lock.
    pub fn lease(&self) -> AccelResult<ChannelLease> {
        if self.count == 0 {
            return Err(AccelError::NoDevice);
        }

        let mut state = self.state.lock()?;
        match state.busy.iter().position(|b| !b) {
            Some(idx) => {
                state.busy[idx] = true;
                state.free -= 1;
                tracing::trace!(channel = idx, free = state.free, "channel leased");
                Ok(ChannelLease {
                    id: ChannelId(idx),
                    state: Arc::clone(&self.state),
                })
            }
            None => Err(AccelError::NoChannelsFree),
        }
    }

    /// Number of channels not currently leased
    pub fn free_channels(&self) -> usize {
        self.state.lock().map(|s| s.free).unwrap_or(0)
    }

    /// Total channels in the pool
    pub fn channel_count(&self) -> usize {
        self.count
    }

    /// False when the pool initialized with zero channels
    pub fn is_available(&self) -> bool {
        self.count > 0
    }
}

/// Exclusive lease on one channel; dropping it returns the channel
#[derive(Debug)]
pub struct ChannelLease {
    id: ChannelId,
    state: Arc<Mutex<PoolState>>,
}

impl ChannelLease {
    pub fn id(&self) -> ChannelId {
        self.id
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        debug_assert!(state.busy[self.id.0]);
        state.busy[self.id.0] = false;
        state.free += 1;
        tracing::trace!(channel = self.id.0, free = state.free, "channel released");
    }
}
