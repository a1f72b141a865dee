//! Fence tracker implementation
//!
//! Fences come from an atomic counter, so issue never blocks and never
//! repeats. Job state lives under one mutex paired with a condvar;
//! `complete` wakes every waiter, and all waiters of one fence observe
//! the same terminal status. Completion of fence N says nothing about
//! fence N-1: channels run transfers out of order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::dma::TransferCookie;
use crate::error::{AccelError, AccelResult};
use crate::fence::types::{JobRecord, JobStatus};

/// Issues fences and tracks job completion
#[derive(Debug)]
pub struct FenceTracker {
    next: AtomicU64,
    jobs: Mutex<HashMap<u64, JobRecord>>,
    completed: Condvar,
}

impl FenceTracker {
    pub fn new() -> Self {
        FenceTracker {
            next: AtomicU64::new(0),
            jobs: Mutex::new(HashMap::new()),
            completed: Condvar::new(),
        }
    }

    /// Issue the next fence: strictly increasing, thread-safe, lock-free.
    /// The first fence is 1; 0 is never issued.
    pub fn next_fence(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently issued fence (0 if none yet)
    pub fn last_fence(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Store the initial Pending record for a fence
    pub fn record(&self, record: JobRecord) -> AccelResult<()> {
        let mut jobs = self.jobs.lock()?;
        if jobs.contains_key(&record.fence) {
            return Err(AccelError::Internal(format!(
                "fence {} recorded twice",
                record.fence
            )));
        }
        jobs.insert(record.fence, record);
        Ok(())
    }

    /// Transition Pending -> Running and attach the in-flight cookie.
    ///
    /// A no-op when the job already reached a terminal state: with fast
    /// hardware the completion can land before the submitter gets here.
    pub fn start(&self, fence: u64, cookie: Option<TransferCookie>) -> AccelResult<()> {
        let mut jobs = self.jobs.lock()?;
        let job = jobs
            .get_mut(&fence)
            .ok_or(AccelError::FenceNotFound(fence))?;
        if job.status == JobStatus::Pending {
            job.status = JobStatus::Running;
            job.started_at = Some(Instant::now());
            job.cookie = cookie;
        }
        Ok(())
    }

    /// Transition Pending/Running to the given terminal status.
    ///
    /// Completing an unknown fence or a fence already in a terminal
    /// state is a logic error surfaced to the caller, never silently
    /// ignored. Every waiter is woken.
    pub fn complete(&self, fence: u64, status: JobStatus) -> AccelResult<()> {
        debug_assert!(status.is_terminal());

        let mut jobs = self.jobs.lock()?;
        let job = jobs
            .get_mut(&fence)
            .ok_or(AccelError::FenceNotFound(fence))?;
        if job.status.is_terminal() {
            return Err(AccelError::FenceAlreadyComplete(fence));
        }

        job.status = status;
        job.completed_at = Some(Instant::now());
        job.cookie = None;
        drop(jobs);

        self.completed.notify_all();
        tracing::debug!(fence, ?status, "job completed");
        Ok(())
    }

    /// Transition Running -> TimedOut after a waiter's deadline expired,
    /// returning the in-flight cookie so the caller can terminate the
    /// underlying transfer. Returns `None` when the job is not Running
    /// (still Pending, or already terminal).
    pub fn mark_timed_out(&self, fence: u64) -> AccelResult<Option<TransferCookie>> {
        let mut jobs = self.jobs.lock()?;
        let job = jobs
            .get_mut(&fence)
            .ok_or(AccelError::FenceNotFound(fence))?;
        if job.status != JobStatus::Running {
            return Ok(None);
        }

        let cookie = job.cookie.take();
        job.status = JobStatus::TimedOut;
        job.completed_at = Some(Instant::now());
        drop(jobs);

        self.completed.notify_all();
        tracing::warn!(fence, "job timed out, transfer terminated");
        Ok(cookie)
    }

    /// Non-blocking status query
    pub fn poll(&self, fence: u64) -> AccelResult<JobStatus> {
        self.jobs
            .lock()?
            .get(&fence)
            .map(|j| j.status)
            .ok_or(AccelError::FenceNotFound(fence))
    }

    /// Snapshot of the full job record (profile data)
    pub fn job(&self, fence: u64) -> AccelResult<JobRecord> {
        self.jobs
            .lock()?
            .get(&fence)
            .cloned()
            .ok_or(AccelError::FenceNotFound(fence))
    }

    /// Block until the fence reaches a terminal status or `timeout`
    /// elapses. Every waiter of the same fence observes the same
    /// terminal status.
    pub fn wait(&self, fence: u64, timeout: Duration) -> AccelResult<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.jobs.lock()?;

        loop {
            let status = jobs
                .get(&fence)
                .map(|j| j.status)
                .ok_or(AccelError::FenceNotFound(fence))?;
            if status.is_terminal() {
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AccelError::Timeout(timeout));
            }

            let (guard, _) = self.completed.wait_timeout(jobs, deadline - now)?;
            jobs = guard;
        }
    }

    /// Number of jobs not yet in a terminal state
    pub fn active_jobs(&self) -> usize {
        self.jobs
            .lock()
            .map(|jobs| jobs.values().filter(|j| !j.status.is_terminal()).count())
            .unwrap_or(0)
    }

    /// Force every non-terminal job to the given terminal status and
    /// wake all waiters, returning the in-flight cookies that still need
    /// termination at the bus (device teardown).
    pub fn fail_all(&self, status: JobStatus) -> Vec<TransferCookie> {
        debug_assert!(status.is_terminal());

        let mut cookies = Vec::new();
        if let Ok(mut jobs) = self.jobs.lock() {
            let now = Instant::now();
            for job in jobs.values_mut() {
                if !job.status.is_terminal() {
                    if let Some(cookie) = job.cookie.take() {
                        cookies.push(cookie);
                    }
                    job.status = status;
                    job.completed_at = Some(now);
                }
            }
        }
        self.completed.notify_all();
        cookies
    }
}

impl Default for FenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
