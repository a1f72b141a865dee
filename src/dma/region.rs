//! Scatter-gather regions
//!
//! Turns a flat (address, length) host range into page-aligned segments
//! a channel can walk. Building a region pins every page and maps the
//! segment list for the transfer direction; the region owns both, and
//! dropping it unmaps then unpins in reverse order. A partially built
//! region is never left pinned: each step unwinds everything acquired so
//! far before the error propagates.

use std::fmt;
use std::sync::Arc;

use crate::dma::bus::{Direction, DmaBus, PageRef};
use crate::error::{AccelError, AccelResult, ErrorCode};

/// Device page size in bytes
pub const PAGE_SIZE: u64 = 4096;
/// log2(PAGE_SIZE)
pub const PAGE_SHIFT: u32 = 12;

/// A flat caller-owned host memory range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRegion {
    /// Host virtual address of the first byte
    pub addr: u64,
    /// Length in bytes
    pub len: u64,
}

impl HostRegion {
    pub fn new(addr: u64, len: u64) -> Self {
        HostRegion { addr, len }
    }

    /// Byte offset of the first byte within its page
    pub fn page_offset(&self) -> u64 {
        self.addr & (PAGE_SIZE - 1)
    }

    /// Number of pages the range touches
    pub fn page_count(&self) -> u64 {
        (self.len + self.page_offset()).div_ceil(PAGE_SIZE)
    }

    /// Address of the first page the range touches
    pub fn first_page(&self) -> u64 {
        self.addr & !(PAGE_SIZE - 1)
    }
}

/// One page-bounded piece of a scatter transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterSegment {
    /// Pinned page backing this segment
    pub page: PageRef,
    /// Byte offset within the page; non-zero only for segment 0
    pub offset: u32,
    /// Byte length; the last segment is clipped to the remaining count
    pub len: u32,
}

/// An ordered sequence of segments describing one logical transfer
///
/// Owns its pins and mapping. In contiguous mode (memory that is already
/// device-visible, e.g. a coherent buffer) there is nothing to pin and
/// the region is a single descriptor wrapping the existing address.
pub struct ScatterRegion {
    /// Present only when the region owns pinned pages
    bus: Option<Arc<dyn DmaBus>>,
    segments: Vec<ScatterSegment>,
    pins: Vec<PageRef>,
    dir: Direction,
    mapped: bool,
    len: u64,
    /// Wrapped address in contiguous mode
    device_addr: Option<u64>,
}

impl ScatterRegion {
    /// Pin and map a host range for the given direction.
    ///
    /// Either every page ends up pinned and the segment list mapped, or
    /// nothing is left acquired and the error is returned.
    pub fn build(
        bus: &Arc<dyn DmaBus>,
        region: HostRegion,
        dir: Direction,
    ) -> AccelResult<Self> {
        if region.len == 0 {
            return Err(AccelError::InvalidArgument(
                "zero-length host region".to_string(),
            ));
        }

        let nr_pages = region.page_count();
        let first_page = region.first_page();

        // Pin every page; a shortfall unpins the prefix that succeeded
        let mut pins: Vec<PageRef> = Vec::with_capacity(nr_pages as usize);
        for i in 0..nr_pages {
            match bus.pin_page(first_page + i * PAGE_SIZE) {
                Ok(page) => pins.push(page),
                Err(err) => {
                    for page in pins.drain(..).rev() {
                        bus.unpin_page(page);
                    }
                    return Err(match err.code() {
                        ErrorCode::ResourceExhausted => err,
                        _ => AccelError::Fault(format!(
                            "pinned {} of {} pages: {}",
                            i, nr_pages, err
                        )),
                    });
                }
            }
        }

        // Segment 0 may start mid-page; all later segments start at
        // offset 0; the last is clipped to the remaining byte count.
        let mut segments = Vec::with_capacity(pins.len());
        let mut remaining = region.len;
        for (i, page) in pins.iter().enumerate() {
            let offset = if i == 0 { region.page_offset() } else { 0 };
            let len = remaining.min(PAGE_SIZE - offset);
            segments.push(ScatterSegment {
                page: *page,
                offset: offset as u32,
                len: len as u32,
            });
            remaining -= len;
        }
        debug_assert_eq!(remaining, 0);

        // Map the segment list for device access
        let mapped = match bus.map_segments(&segments, dir) {
            Ok(n) => n,
            Err(err) => {
                for page in pins.drain(..).rev() {
                    bus.unpin_page(page);
                }
                return Err(err);
            }
        };
        if mapped == 0 {
            for page in pins.drain(..).rev() {
                bus.unpin_page(page);
            }
            return Err(AccelError::DeviceError(
                "no scatter segments mapped".to_string(),
            ));
        }

        tracing::trace!(
            pages = pins.len(),
            bytes = region.len,
            "scatter region built"
        );

        Ok(ScatterRegion {
            bus: Some(Arc::clone(bus)),
            segments,
            pins,
            dir,
            mapped: true,
            len: region.len,
            device_addr: None,
        })
    }

    /// Wrap memory that is already device-visible.
    ///
    /// Skips pinning entirely; the region does not own the address and
    /// dropping it releases nothing.
    pub fn contiguous(device_addr: u64, len: u64, dir: Direction) -> AccelResult<Self> {
        if len == 0 {
            return Err(AccelError::InvalidArgument(
                "zero-length contiguous region".to_string(),
            ));
        }
        Ok(ScatterRegion {
            bus: None,
            segments: Vec::new(),
            pins: Vec::new(),
            dir,
            mapped: false,
            len,
            device_addr: Some(device_addr),
        })
    }

    /// Total bytes described by the region
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the region wraps an existing device-visible address
    pub fn is_contiguous(&self) -> bool {
        self.device_addr.is_some()
    }

    /// The wrapped address in contiguous mode
    pub fn device_addr(&self) -> Option<u64> {
        self.device_addr
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn segments(&self) -> &[ScatterSegment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Debug for ScatterRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatterRegion")
            .field("segments", &self.segments.len())
            .field("len", &self.len)
            .field("dir", &self.dir)
            .field("mapped", &self.mapped)
            .field("device_addr", &self.device_addr)
            .finish()
    }
}

impl Drop for ScatterRegion {
    fn drop(&mut self) {
        if let Some(bus) = &self.bus {
            // Reverse of construction: unmap first, then unpin back to front
            if self.mapped {
                bus.unmap_segments(&self.segments, self.dir);
            }
            for page in self.pins.drain(..).rev() {
                bus.unpin_page(page);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count_aligned() {
        let r = HostRegion::new(0x10000, 4096);
        assert_eq!(r.page_offset(), 0);
        assert_eq!(r.page_count(), 1);
    }

    #[test]
    fn test_page_count_with_offset() {
        // 100 bytes into a page, 4096 bytes long: spans two pages
        let r = HostRegion::new(0x10064, 4096);
        assert_eq!(r.page_offset(), 0x64);
        assert_eq!(r.page_count(), 2);
        assert_eq!(r.first_page(), 0x10000);
    }

    #[test]
    fn test_page_count_small_region() {
        let r = HostRegion::new(0x10010, 16);
        assert_eq!(r.page_count(), 1);
    }

    #[test]
    fn test_contiguous_region() {
        let region = ScatterRegion::contiguous(0x4000_0000, 8192, Direction::HostToDevice).unwrap();
        assert!(region.is_contiguous());
        assert_eq!(region.device_addr(), Some(0x4000_0000));
        assert_eq!(region.len(), 8192);
        assert_eq!(region.segment_count(), 0);
    }

    #[test]
    fn test_contiguous_zero_length_rejected() {
        let err = ScatterRegion::contiguous(0x4000_0000, 0, Direction::DeviceToHost).unwrap_err();
        assert!(matches!(err, AccelError::InvalidArgument(_)));
    }
}
