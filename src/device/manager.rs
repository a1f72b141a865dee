//! Device resource manager facade
//!
//! Composes the handle tables, device memory arena, channel pool,
//! transfer engine, and fence tracker behind the operations the
//! driver-facing layer consumes: alloc/free, model load/unload, host
//! buffer I/O, inference submission, and fence waits. One instance
//! models one open device session; everything is torn down together.
//!
//! Locking follows two independent domains: table/arena bookkeeping and
//! channel bookkeeping, both short critical sections. The bus submit and
//! all completion waits happen outside every lock, so one slow transfer
//! never blocks unrelated allocate/free calls.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::device::caps::DeviceCaps;
use crate::device::config::{DeviceConfig, DRIVER_VERSION};
use crate::device::resource::{BufferRecord, DeviceAllocation, ModelRecord};
use crate::device::stats::DeviceStats;
use crate::dma::{
    ChannelPool, Direction, DmaBus, HostRegion, ScatterRegion, SimBus, TransferDescriptor,
    TransferEngine, TransferStatus,
};
use crate::error::{AccelError, AccelResult, ErrorCode};
use crate::fence::{FenceTracker, JobRecord, JobStatus};
use crate::handle::{Handle, HandleTable};
use crate::memory::DeviceArena;
use crate::metrics::Metrics;

/// Device address where the memory window begins
const DEVICE_MEM_BASE: u64 = 0x1000_0000;

/// Parameters of one inference submission
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: Handle,
    pub input: Handle,
    pub output: Handle,
    /// Bytes of input consumed from the input buffer
    pub input_size: u64,
    /// Bytes of output produced into the output buffer
    pub output_size: u64,
    /// Scheduling priority, recorded on the job
    pub priority: u32,
}

/// One open device session
///
/// All state that the hardware driver kept in process-wide singletons
/// (handle tables, channel bitmap, fence counter, statistics) lives here
/// in one explicitly constructed object, so independent instances can
/// coexist in tests and every table dies with the session.
pub struct DeviceManager {
    config: DeviceConfig,
    caps: DeviceCaps,
    buffers: HandleTable<BufferRecord>,
    models: HandleTable<ModelRecord>,
    arena: Arc<Mutex<DeviceArena>>,
    mem_used: Arc<AtomicU64>,
    engine: TransferEngine,
    tracker: Arc<FenceTracker>,
    metrics: Arc<Metrics>,
    closed: AtomicBool,
}

impl DeviceManager {
    /// Open a device backed by the simulated bus
    pub fn new(config: DeviceConfig) -> AccelResult<Self> {
        let bus: Arc<dyn DmaBus> = Arc::new(SimBus::with_latency(config.sim_latency));
        Self::with_bus(config, bus)
    }

    /// Open a device over an explicit bus backend (tests inject failing
    /// backends here)
    pub fn with_bus(config: DeviceConfig, bus: Arc<dyn DmaBus>) -> AccelResult<Self> {
        let arena = Arc::new(Mutex::new(DeviceArena::new(
            DEVICE_MEM_BASE,
            config.memory_size,
        )?));

        let channels = ChannelPool::new(config.num_channels);
        if !channels.is_available() {
            tracing::warn!("device opened without transfer channels; transfers will fail");
        }

        let caps = DeviceCaps {
            version: DRIVER_VERSION,
            engine_count: config.engine_count,
            max_batch: config.max_batch,
            memory_size: config.memory_size,
            max_alloc_size: config.max_alloc_size,
            features: config.features,
        };

        let engine = TransferEngine::new(bus, channels, config.max_alloc_size);

        tracing::info!(
            channels = config.num_channels,
            memory = config.memory_size,
            "device session opened"
        );

        Ok(DeviceManager {
            buffers: HandleTable::new("buffer", config.max_buffers),
            models: HandleTable::new("model", config.max_models),
            arena,
            mem_used: Arc::new(AtomicU64::new(0)),
            engine,
            tracker: Arc::new(FenceTracker::new()),
            metrics: Arc::new(Metrics::new()),
            closed: AtomicBool::new(false),
            caps,
            config,
        })
    }

    fn ensure_open(&self) -> AccelResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AccelError::DeviceError("device closed".to_string()));
        }
        Ok(())
    }

    /// Read-only capability snapshot
    pub fn capabilities(&self) -> DeviceCaps {
        self.caps.clone()
    }

    /// Allocate a device buffer, returning its handle and device address
    pub fn alloc(&self, size: u64, flags: u32) -> AccelResult<(Handle, u64)> {
        self.ensure_open()?;
        if size == 0 || size > self.caps.max_alloc_size {
            return Err(AccelError::InvalidSize {
                size,
                max: self.caps.max_alloc_size,
            });
        }

        let mem =
            DeviceAllocation::new(Arc::clone(&self.arena), Arc::clone(&self.mem_used), size)?;
        let addr = mem.addr();
        // A full table unwinds the allocation through the drop guard
        let handle = self.buffers.allocate(BufferRecord::new(size, flags, mem))?;

        tracing::debug!(%handle, size, addr, "allocated buffer");
        Ok((handle, addr))
    }

    /// Free a buffer. The handle dies immediately; device memory is
    /// reclaimed once the last in-flight borrower drops its reference.
    pub fn free(&self, handle: Handle) -> AccelResult<()> {
        let buf = self.buffers.release(handle)?;
        // Stated postcondition: a freed buffer passes through unmap first
        buf.release_mapping();
        tracing::debug!(%handle, "freed buffer");
        Ok(())
    }

    /// Copy caller bytes into owned storage and register the model
    pub fn load_model(&self, bytes: &[u8], flags: u32) -> AccelResult<Handle> {
        self.ensure_open()?;
        let size = bytes.len() as u64;
        if size == 0 || size > self.caps.max_alloc_size {
            return Err(AccelError::InvalidSize {
                size,
                max: self.caps.max_alloc_size,
            });
        }

        let handle = self.models.allocate(ModelRecord::new(bytes, flags))?;
        tracing::debug!(%handle, size, "loaded model");
        Ok(handle)
    }

    /// Unload a model. Storage outlives the handle while jobs borrow it.
    pub fn unload_model(&self, handle: Handle) -> AccelResult<()> {
        self.models.release(handle)?;
        tracing::debug!(%handle, "unloaded model");
        Ok(())
    }

    /// Transfer a host region into a device buffer, pinning and mapping
    /// the host pages for the duration of the copy
    pub fn write_buffer(
        &self,
        handle: Handle,
        host: HostRegion,
        timeout: Duration,
    ) -> AccelResult<u64> {
        self.host_io(handle, host, Direction::HostToDevice, timeout)
    }

    /// Transfer a device buffer out into a host region
    pub fn read_buffer(
        &self,
        handle: Handle,
        host: HostRegion,
        timeout: Duration,
    ) -> AccelResult<u64> {
        self.host_io(handle, host, Direction::DeviceToHost, timeout)
    }

    fn host_io(
        &self,
        handle: Handle,
        host: HostRegion,
        dir: Direction,
        timeout: Duration,
    ) -> AccelResult<u64> {
        self.ensure_open()?;
        let buf = self.buffers.lookup(handle)?;
        if host.len == 0 {
            return Err(AccelError::InvalidArgument(
                "zero-length host region".to_string(),
            ));
        }
        if host.len > buf.size() {
            return Err(AccelError::InvalidSize {
                size: host.len,
                max: buf.size(),
            });
        }

        // Pin and map the host side; the buffer holds the region so its
        // state reflects the in-progress I/O
        let region = ScatterRegion::build(self.engine.bus(), host, dir)?;
        buf.begin_host_io(region, dir)?;

        let (dst, src) = match dir {
            Direction::HostToDevice => (buf.device_addr(), host.addr),
            Direction::DeviceToHost => (host.addr, buf.device_addr()),
        };

        let started = Instant::now();
        let result = self.engine.transfer_sync(dst, src, host.len, timeout);

        // Unpin in every path; a timed-out transfer was already terminated
        drop(buf.end_host_io());

        match &result {
            Ok(bytes) => {
                self.metrics.bytes_transferred.inc_by(*bytes);
                self.metrics
                    .transfer_duration_seconds
                    .observe(started.elapsed().as_secs_f64());
            }
            Err(AccelError::Timeout(_)) => {
                self.metrics.transfer_timeouts.inc();
            }
            Err(_) => {}
        }

        result
    }

    /// Submit an inference job, returning its fence.
    ///
    /// All three handles must resolve before a fence is issued, and the
    /// channel is leased before the fence too: a rejected submission
    /// consumes nothing observable.
    pub fn submit_inference(&self, req: &InferenceRequest) -> AccelResult<u64> {
        self.ensure_open()?;

        let model = self.models.lookup(req.model)?;
        let input = self.buffers.lookup(req.input)?;
        let output = self.buffers.lookup(req.output)?;

        if req.input_size == 0 || req.input_size > input.size() {
            return Err(AccelError::InvalidSize {
                size: req.input_size,
                max: input.size(),
            });
        }
        if req.output_size == 0 || req.output_size > output.size() {
            return Err(AccelError::InvalidSize {
                size: req.output_size,
                max: output.size(),
            });
        }

        let lease = self.engine.channels().lease()?;

        let bytes = req.input_size + req.output_size;
        let fence = self.tracker.next_fence();
        self.tracker.record(JobRecord::new(fence, req.priority, bytes))?;
        self.metrics.jobs_submitted.inc();
        self.metrics.active_jobs.inc();

        let desc = TransferDescriptor {
            channel: lease.id(),
            dst: output.device_addr(),
            src: input.device_addr(),
            bytes,
        };

        let tracker = Arc::clone(&self.tracker);
        let metrics = Arc::clone(&self.metrics);
        let submitted_at = Instant::now();

        // The completion handler runs on the bus completion context with
        // no caller locks held. It owns the channel lease and the three
        // resource borrows; both end with the job, which is what lets a
        // concurrent free defer safely.
        let submit_result = self.engine.bus().submit(
            desc,
            Box::new(move |notice| {
                drop(lease);

                let status = match notice.status {
                    TransferStatus::Ok => JobStatus::Complete,
                    TransferStatus::Failed(code) => {
                        tracing::warn!(fence, code, "job reported device failure");
                        JobStatus::Error(ErrorCode::DeviceError)
                    }
                };

                match tracker.complete(fence, status) {
                    Ok(()) => {
                        match status {
                            JobStatus::Complete => {
                                metrics.jobs_completed.inc();
                                metrics.bytes_transferred.inc_by(notice.bytes);
                            }
                            _ => {
                                metrics.jobs_failed.inc();
                            }
                        }
                        metrics
                            .transfer_duration_seconds
                            .observe(submitted_at.elapsed().as_secs_f64());
                        metrics.active_jobs.dec();
                    }
                    Err(err) => {
                        // The job timed out or the device tore down first
                        tracing::debug!(fence, %err, "late completion ignored");
                    }
                }

                drop(model);
                drop(input);
                drop(output);
            }),
        );

        let cookie = match submit_result {
            Ok(cookie) => cookie,
            Err(err) => {
                let _ = self
                    .tracker
                    .complete(fence, JobStatus::Error(ErrorCode::DeviceError));
                self.metrics.jobs_failed.inc();
                self.metrics.active_jobs.dec();
                return Err(err);
            }
        };

        self.tracker.start(fence, Some(cookie))?;
        tracing::debug!(fence, priority = req.priority, bytes, "inference submitted");
        Ok(fence)
    }

    /// Block until the job behind `fence` reaches a terminal status.
    ///
    /// If the deadline expires while the job is still running, the
    /// underlying transfer is forcibly terminated, the job transitions
    /// to TimedOut, and `Timeout` is returned; later waiters observe the
    /// TimedOut terminal status.
    pub fn wait(&self, fence: u64, timeout: Duration) -> AccelResult<JobStatus> {
        match self.tracker.wait(fence, timeout) {
            Ok(status) => Ok(status),
            Err(AccelError::Timeout(t)) => {
                if let Some(cookie) = self.tracker.mark_timed_out(fence)? {
                    self.engine.terminate(cookie);
                    self.metrics.jobs_timed_out.inc();
                    self.metrics.active_jobs.dec();
                }
                Err(AccelError::Timeout(t))
            }
            Err(err) => Err(err),
        }
    }

    /// Non-blocking status query for a fence
    pub fn poll(&self, fence: u64) -> AccelResult<JobStatus> {
        self.tracker.poll(fence)
    }

    /// Full job record snapshot (timestamps, bytes, priority)
    pub fn job_profile(&self, fence: u64) -> AccelResult<JobRecord> {
        self.tracker.job(fence)
    }

    /// The most recently issued fence (0 if none)
    pub fn last_fence(&self) -> u64 {
        self.tracker.last_fence()
    }

    /// Point-in-time statistics snapshot
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            jobs_submitted: self.metrics.jobs_submitted.get(),
            jobs_completed: self.metrics.jobs_completed.get(),
            jobs_failed: self.metrics.jobs_failed.get(),
            jobs_timed_out: self.metrics.jobs_timed_out.get(),
            active_jobs: self.metrics.active_jobs.get().max(0) as u64,
            bytes_transferred: self.metrics.bytes_transferred.get(),
            memory_used: self.mem_used.load(Ordering::Acquire),
            memory_total: self.config.memory_size,
            free_channels: self.engine.channels().free_channels(),
            live_buffers: self.buffers.len(),
            live_models: self.models.len(),
        }
    }

    /// Prometheus text exposition of all metrics
    pub fn metrics_text(&self) -> AccelResult<String> {
        self.metrics.encode_text()
    }

    /// Tear down the session: terminate all outstanding transfers, fail
    /// their jobs, wake every waiter, and drain both handle tables.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("device teardown: terminating outstanding work");

        let aborted = self.tracker.active_jobs() as u64;
        let cookies = self.tracker.fail_all(JobStatus::Error(ErrorCode::DeviceError));
        for cookie in cookies {
            self.engine.terminate(cookie);
        }
        self.engine.terminate_all();

        if aborted > 0 {
            self.metrics.jobs_failed.inc_by(aborted);
        }
        self.metrics.active_jobs.set(0);

        for buf in self.buffers.drain() {
            buf.release_mapping();
        }
        let _ = self.models.drain();
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_device() -> DeviceManager {
        DeviceManager::new(
            DeviceConfig::new()
                .with_memory_size(64 * 4096)
                .with_max_alloc_size(16 * 4096)
                .with_sim_latency(Duration::from_micros(50)),
        )
        .unwrap()
    }

    #[test]
    fn test_capabilities_snapshot() {
        let dev = small_device();
        let caps = dev.capabilities();
        assert_eq!(caps.version, DRIVER_VERSION);
        assert_eq!(caps.max_alloc_size, 16 * 4096);
        assert_eq!(caps.version_string(), "1.0.0");
    }

    #[test]
    fn test_invalid_alloc_leaves_table_unchanged() {
        let dev = small_device();
        let before = dev.stats();

        assert!(dev.alloc(0, 0).is_err());
        assert!(dev.alloc(16 * 4096 + 1, 0).is_err());

        let after = dev.stats();
        assert_eq!(before.live_buffers, after.live_buffers);
        assert_eq!(before.memory_used, after.memory_used);
    }

    #[test]
    fn test_memory_accounting_round_trip() {
        let dev = small_device();
        let (handle, addr) = dev.alloc(4096, 0).unwrap();
        assert!(addr >= DEVICE_MEM_BASE);
        assert_eq!(dev.stats().memory_used, 4096);

        dev.free(handle).unwrap();
        assert_eq!(dev.stats().memory_used, 0);
    }

    #[test]
    fn test_operations_fail_after_shutdown() {
        let dev = small_device();
        dev.shutdown();
        assert!(matches!(
            dev.alloc(4096, 0).unwrap_err(),
            AccelError::DeviceError(_)
        ));
        assert!(matches!(
            dev.load_model(&[0u8; 16], 0).unwrap_err(),
            AccelError::DeviceError(_)
        ));
    }
}
