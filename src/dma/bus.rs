//! DMA bus backend seam
//!
//! The scatter builder and transfer engine talk to hardware through the
//! [`DmaBus`] trait: page pinning, segment mapping, and queued copy
//! operations with completion delivery. The in-tree implementation is
//! [`SimBus`], which models the device in host memory the way hardware
//! bring-up ran the driver in simulation mode. Tests substitute failing
//! implementations to exercise the unwind paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dma::channel::ChannelId;
use crate::dma::region::{ScatterSegment, PAGE_SHIFT, PAGE_SIZE};
use crate::error::{AccelError, AccelResult};

/// Direction of a host/device transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

/// Stable reference to a pinned physical page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRef(pub u64);

/// Identifier for one queued operation, usable for forced termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferCookie(u64);

impl TransferCookie {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One copy or execute operation handed to the bus
#[derive(Debug, Clone)]
pub struct TransferDescriptor {
    /// Channel the operation runs on
    pub channel: ChannelId,
    /// Destination device-visible address
    pub dst: u64,
    /// Source device-visible address
    pub src: u64,
    /// Bytes to move
    pub bytes: u64,
}

/// Hardware status of a finished operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    /// Device-reported failure code
    Failed(i32),
}

/// Completion signal, delivered exactly once per finished operation
#[derive(Debug, Clone)]
pub struct CompletionNotice {
    pub status: TransferStatus,
    pub bytes: u64,
    pub finished_at: Instant,
}

/// Handler invoked from the bus completion context
pub type CompletionHandler = Box<dyn FnOnce(CompletionNotice) + Send + 'static>;

/// Backend operations the DMA layer needs from the device
pub trait DmaBus: Send + Sync {
    /// Pin one host page, making it resident for device access.
    /// `page_addr` is page-aligned.
    fn pin_page(&self, page_addr: u64) -> AccelResult<PageRef>;

    /// Release a pinned page
    fn unpin_page(&self, page: PageRef);

    /// Map pinned segments for device access in the given direction.
    /// Returns how many segments the IOMMU accepted.
    fn map_segments(&self, segments: &[ScatterSegment], dir: Direction) -> AccelResult<usize>;

    /// Tear down a mapping created by `map_segments`
    fn unmap_segments(&self, segments: &[ScatterSegment], dir: Direction);

    /// Queue one operation. The handler is invoked exactly once from the
    /// bus completion context, unless the operation is terminated first,
    /// in which case the handler is dropped without being invoked.
    fn submit(
        &self,
        desc: TransferDescriptor,
        on_complete: CompletionHandler,
    ) -> AccelResult<TransferCookie>;

    /// Forcibly terminate an in-flight operation
    fn terminate(&self, cookie: TransferCookie);

    /// Terminate every outstanding operation (device teardown)
    fn terminate_all(&self);
}

/// Simulated bus backend
///
/// Completions are delivered from a worker thread after a configurable
/// latency, which gives timeout paths something real to race against.
/// Pin/map bookkeeping is counted so tests can assert that unwind paths
/// released everything.
#[derive(Debug)]
pub struct SimBus {
    latency: Duration,
    next_cookie: AtomicU64,
    /// Abort flags for operations still in flight, keyed by cookie.
    /// Shared with the completion workers, which deregister themselves.
    inflight: Arc<Mutex<HashMap<u64, Arc<AtomicBool>>>>,
    pinned_pages: AtomicI64,
    mapped_segments: AtomicI64,
}

impl SimBus {
    /// Default simulated completion latency
    pub const DEFAULT_LATENCY: Duration = Duration::from_micros(200);

    pub fn new() -> Self {
        Self::with_latency(Self::DEFAULT_LATENCY)
    }

    /// Create a bus whose operations take `latency` to complete
    pub fn with_latency(latency: Duration) -> Self {
        SimBus {
            latency,
            next_cookie: AtomicU64::new(0),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            pinned_pages: AtomicI64::new(0),
            mapped_segments: AtomicI64::new(0),
        }
    }

    /// Pages currently pinned (for leak assertions in tests)
    pub fn pinned_pages(&self) -> i64 {
        self.pinned_pages.load(Ordering::Acquire)
    }

    /// Segments currently mapped (for leak assertions in tests)
    pub fn mapped_segments(&self) -> i64 {
        self.mapped_segments.load(Ordering::Acquire)
    }

    /// Operations submitted but not yet completed or terminated
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaBus for SimBus {
    fn pin_page(&self, page_addr: u64) -> AccelResult<PageRef> {
        if page_addr % PAGE_SIZE != 0 {
            return Err(AccelError::Internal(format!(
                "pin address {:#x} is not page-aligned",
                page_addr
            )));
        }
        self.pinned_pages.fetch_add(1, Ordering::AcqRel);
        Ok(PageRef(page_addr >> PAGE_SHIFT))
    }

    fn unpin_page(&self, _page: PageRef) {
        self.pinned_pages.fetch_sub(1, Ordering::AcqRel);
    }

    fn map_segments(&self, segments: &[ScatterSegment], _dir: Direction) -> AccelResult<usize> {
        self.mapped_segments
            .fetch_add(segments.len() as i64, Ordering::AcqRel);
        Ok(segments.len())
    }

    fn unmap_segments(&self, segments: &[ScatterSegment], _dir: Direction) {
        self.mapped_segments
            .fetch_sub(segments.len() as i64, Ordering::AcqRel);
    }

    fn submit(
        &self,
        desc: TransferDescriptor,
        on_complete: CompletionHandler,
    ) -> AccelResult<TransferCookie> {
        let cookie = TransferCookie(self.next_cookie.fetch_add(1, Ordering::Relaxed) + 1);
        let aborted = Arc::new(AtomicBool::new(false));
        self.inflight.lock()?.insert(cookie.0, Arc::clone(&aborted));

        let latency = self.latency;
        let inflight = Arc::clone(&self.inflight);
        let spawned = std::thread::Builder::new()
            .name(format!("accelforge-dma{}", desc.channel.index()))
            .spawn(move || {
                std::thread::sleep(latency);
                if let Ok(mut map) = inflight.lock() {
                    map.remove(&cookie.0);
                }
                if aborted.load(Ordering::Acquire) {
                    // Terminated: drop the handler without invoking it
                    return;
                }
                on_complete(CompletionNotice {
                    status: TransferStatus::Ok,
                    bytes: desc.bytes,
                    finished_at: Instant::now(),
                });
            });

        if let Err(e) = spawned {
            self.inflight.lock()?.remove(&cookie.0);
            return Err(AccelError::DeviceError(format!(
                "completion worker spawn failed: {}",
                e
            )));
        }

        tracing::trace!(
            cookie = cookie.0,
            channel = desc.channel.index(),
            bytes = desc.bytes,
            "operation queued"
        );
        Ok(cookie)
    }

    fn terminate(&self, cookie: TransferCookie) {
        if let Ok(inflight) = self.inflight.lock() {
            if let Some(flag) = inflight.get(&cookie.0) {
                flag.store(true, Ordering::Release);
                tracing::debug!(cookie = cookie.0, "terminated in-flight operation");
            }
        }
    }

    fn terminate_all(&self) {
        if let Ok(inflight) = self.inflight.lock() {
            for flag in inflight.values() {
                flag.store(true, Ordering::Release);
            }
            if !inflight.is_empty() {
                tracing::info!(count = inflight.len(), "terminated all in-flight operations");
            }
        }
    }
}
