//! Scatter region construction and unwind tests
//!
//! Failure injection uses small DmaBus wrappers around SimBus so the
//! pin/map bookkeeping can be checked after each unwind.

use accelforge::dma::{
    CompletionHandler, Direction, DmaBus, HostRegion, PageRef, ScatterRegion, ScatterSegment,
    SimBus, TransferCookie, TransferDescriptor, PAGE_SIZE,
};
use accelforge::error::{AccelError, ErrorCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_segments_sum_to_requested_length() {
    let sim = Arc::new(SimBus::new());
    let bus: Arc<dyn DmaBus> = sim.clone();

    // 100 bytes into a page, spanning three pages
    let host = HostRegion::new(0x10064, 10_000);
    let region = ScatterRegion::build(&bus, host, Direction::HostToDevice).unwrap();

    assert_eq!(region.segment_count(), 3);
    let total: u64 = region.segments().iter().map(|s| s.len as u64).sum();
    assert_eq!(total, 10_000);

    // Only segment 0 starts mid-page; the last is clipped
    assert_eq!(region.segments()[0].offset, 0x64);
    assert_eq!(region.segments()[0].len as u64, PAGE_SIZE - 0x64);
    for seg in &region.segments()[1..] {
        assert_eq!(seg.offset, 0);
    }
    assert_eq!(sim.pinned_pages(), 3);
    assert_eq!(sim.mapped_segments(), 3);

    drop(region);
    assert_eq!(sim.pinned_pages(), 0);
    assert_eq!(sim.mapped_segments(), 0);
}

#[test]
fn test_single_page_region() {
    let sim = Arc::new(SimBus::new());
    let bus: Arc<dyn DmaBus> = sim.clone();

    let region =
        ScatterRegion::build(&bus, HostRegion::new(0x20010, 64), Direction::DeviceToHost).unwrap();
    assert_eq!(region.segment_count(), 1);
    assert_eq!(region.segments()[0].offset, 0x10);
    assert_eq!(region.segments()[0].len, 64);
}

#[test]
fn test_zero_length_region_rejected() {
    let sim = Arc::new(SimBus::new());
    let bus: Arc<dyn DmaBus> = sim.clone();

    let err =
        ScatterRegion::build(&bus, HostRegion::new(0x10000, 0), Direction::HostToDevice)
            .unwrap_err();
    assert!(matches!(err, AccelError::InvalidArgument(_)));
    assert_eq!(sim.pinned_pages(), 0);
}

/// Fails the pin of one specific page, forwarding everything else
struct FlakyPinBus {
    inner: SimBus,
    fail_at: usize,
    pins: AtomicUsize,
}

impl DmaBus for FlakyPinBus {
    fn pin_page(&self, page_addr: u64) -> accelforge::AccelResult<PageRef> {
        if self.pins.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(AccelError::Fault("pin_user_pages failed".to_string()));
        }
        self.inner.pin_page(page_addr)
    }

    fn unpin_page(&self, page: PageRef) {
        self.inner.unpin_page(page);
    }

    fn map_segments(
        &self,
        segments: &[ScatterSegment],
        dir: Direction,
    ) -> accelforge::AccelResult<usize> {
        self.inner.map_segments(segments, dir)
    }

    fn unmap_segments(&self, segments: &[ScatterSegment], dir: Direction) {
        self.inner.unmap_segments(segments, dir);
    }

    fn submit(
        &self,
        desc: TransferDescriptor,
        on_complete: CompletionHandler,
    ) -> accelforge::AccelResult<TransferCookie> {
        self.inner.submit(desc, on_complete)
    }

    fn terminate(&self, cookie: TransferCookie) {
        self.inner.terminate(cookie);
    }

    fn terminate_all(&self) {
        self.inner.terminate_all();
    }
}

#[test]
fn test_partial_pin_unwinds_to_zero() {
    let flaky = Arc::new(FlakyPinBus {
        inner: SimBus::new(),
        fail_at: 2,
        pins: AtomicUsize::new(0),
    });
    let bus: Arc<dyn DmaBus> = flaky.clone();

    // Four pages requested, pin of page 2 fails
    let err = ScatterRegion::build(
        &bus,
        HostRegion::new(0x40000, 4 * PAGE_SIZE),
        Direction::HostToDevice,
    )
    .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Fault);
    assert_eq!(flaky.inner.pinned_pages(), 0, "pinned prefix not released");
    assert_eq!(flaky.inner.mapped_segments(), 0);
}

/// Reports zero mapped segments, forwarding everything else
struct ZeroMapBus {
    inner: SimBus,
}

impl DmaBus for ZeroMapBus {
    fn pin_page(&self, page_addr: u64) -> accelforge::AccelResult<PageRef> {
        self.inner.pin_page(page_addr)
    }

    fn unpin_page(&self, page: PageRef) {
        self.inner.unpin_page(page);
    }

    fn map_segments(
        &self,
        _segments: &[ScatterSegment],
        _dir: Direction,
    ) -> accelforge::AccelResult<usize> {
        Ok(0)
    }

    fn unmap_segments(&self, segments: &[ScatterSegment], dir: Direction) {
        self.inner.unmap_segments(segments, dir);
    }

    fn submit(
        &self,
        desc: TransferDescriptor,
        on_complete: CompletionHandler,
    ) -> accelforge::AccelResult<TransferCookie> {
        self.inner.submit(desc, on_complete)
    }

    fn terminate(&self, cookie: TransferCookie) {
        self.inner.terminate(cookie);
    }

    fn terminate_all(&self) {
        self.inner.terminate_all();
    }
}

#[test]
fn test_zero_mapped_segments_unpins_everything() {
    let zero = Arc::new(ZeroMapBus { inner: SimBus::new() });
    let bus: Arc<dyn DmaBus> = zero.clone();

    let err = ScatterRegion::build(
        &bus,
        HostRegion::new(0x50000, 2 * PAGE_SIZE),
        Direction::DeviceToHost,
    )
    .unwrap_err();

    assert_eq!(err.code(), ErrorCode::DeviceError);
    assert_eq!(zero.inner.pinned_pages(), 0);
}

#[test]
fn test_contiguous_mode_owns_no_pins() {
    let sim = Arc::new(SimBus::new());

    let region =
        ScatterRegion::contiguous(0x4000_0000, 3 * PAGE_SIZE, Direction::HostToDevice).unwrap();
    assert!(region.is_contiguous());
    assert_eq!(region.device_addr(), Some(0x4000_0000));

    drop(region);
    // Nothing was pinned, nothing was released
    assert_eq!(sim.pinned_pages(), 0);
}
