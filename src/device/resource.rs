//! Buffer and model resource records
//!
//! Records are owned by the handle tables; transfers hold `Arc` borrows
//! for the duration of one operation. A buffer's device memory is
//! reclaimed by the `DeviceAllocation` RAII guard when the last borrower
//! drops, so releasing a handle mid-transfer can never free memory the
//! transfer is still using.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::dma::{Direction, ScatterRegion};
use crate::error::{AccelError, AccelResult};
use crate::memory::DeviceArena;

/// Buffer allocation flags from the boundary interface
pub mod alloc_flags {
    pub const CACHED: u32 = 1 << 0;
    pub const WRITE_COMBINE: u32 = 1 << 1;
    pub const COHERENT: u32 = 1 << 2;
}

/// Pin state of a buffer's host-side staging range
#[derive(Debug, Default)]
pub enum PinState {
    #[default]
    Unpinned,
    /// Host pages pinned for an in-progress host I/O; the region owns
    /// the pins and unpins on drop
    Pinned(ScatterRegion),
}

/// Device-mapping state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapState {
    #[default]
    Unmapped,
    Mapped(Direction),
}

#[derive(Debug, Default)]
struct BufferState {
    pin: PinState,
    map: MapState,
}

/// One device memory range, freed back to the arena on drop
pub struct DeviceAllocation {
    addr: u64,
    size: u64,
    arena: Arc<Mutex<DeviceArena>>,
    mem_used: Arc<AtomicU64>,
}

impl DeviceAllocation {
    /// Carve `size` bytes out of the arena (rounded to page granularity)
    pub fn new(
        arena: Arc<Mutex<DeviceArena>>,
        mem_used: Arc<AtomicU64>,
        size: u64,
    ) -> AccelResult<Self> {
        let aligned = DeviceArena::page_align(size);
        let addr = arena.lock()?.allocate(aligned)?;
        mem_used.fetch_add(aligned, Ordering::AcqRel);
        Ok(DeviceAllocation {
            addr,
            size: aligned,
            arena,
            mem_used,
        })
    }

    /// Device-visible address of the range
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Page-aligned size of the range
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        if let Ok(mut arena) = self.arena.lock() {
            arena.free(self.addr, self.size);
        }
        self.mem_used.fetch_sub(self.size, Ordering::AcqRel);
    }
}

impl fmt::Debug for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("size", &self.size)
            .finish()
    }
}

/// A device memory buffer owned by the buffer handle table
#[derive(Debug)]
pub struct BufferRecord {
    /// Requested size in bytes (the allocation may be page-padded)
    size: u64,
    flags: u32,
    mem: DeviceAllocation,
    state: Mutex<BufferState>,
}

impl BufferRecord {
    pub fn new(size: u64, flags: u32, mem: DeviceAllocation) -> Self {
        BufferRecord {
            size,
            flags,
            mem,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn device_addr(&self) -> u64 {
        self.mem.addr()
    }

    /// Attach a pinned host region for the duration of one host I/O.
    ///
    /// Only one host I/O may be staged on a buffer at a time; a second
    /// caller gets an error and its region unwinds via drop.
    pub fn begin_host_io(
        &self,
        region: ScatterRegion,
        dir: Direction,
    ) -> AccelResult<()> {
        let mut state = self.state.lock()?;
        if !matches!(state.pin, PinState::Unpinned) {
            return Err(AccelError::InvalidArgument(
                "buffer already pinned for host I/O".to_string(),
            ));
        }
        state.pin = PinState::Pinned(region);
        state.map = MapState::Mapped(dir);
        Ok(())
    }

    /// Detach the pinned host region after a host I/O.
    ///
    /// Returns the region for the caller to drop (unmap, then unpin).
    /// Tolerates an already-unpinned buffer: a concurrent free may have
    /// performed the implicit unmap first.
    pub fn end_host_io(&self) -> Option<ScatterRegion> {
        let mut state = self.state.lock().ok()?;
        state.map = MapState::Unmapped;
        match std::mem::take(&mut state.pin) {
            PinState::Unpinned => None,
            PinState::Pinned(region) => Some(region),
        }
    }

    /// Explicit unmap-if-mapped step used by free: a freed buffer always
    /// passes through Unmapped before its record drops.
    pub fn release_mapping(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.map = MapState::Unmapped;
            state.pin = PinState::Unpinned;
        }
    }

    /// True while a host I/O holds pinned pages on this buffer
    pub fn is_pinned(&self) -> bool {
        self.state
            .lock()
            .map(|s| matches!(s.pin, PinState::Pinned(_)))
            .unwrap_or(false)
    }

    /// True while mapped for device access
    pub fn is_mapped(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.map != MapState::Unmapped)
            .unwrap_or(false)
    }
}

/// An immutable model blob owned by the model handle table
#[derive(Debug)]
pub struct ModelRecord {
    /// Owned copy of the caller-supplied bytes; never mutated after load
    data: Box<[u8]>,
    flags: u32,
}

impl ModelRecord {
    pub fn new(bytes: &[u8], flags: u32) -> Self {
        ModelRecord {
            data: bytes.to_vec().into_boxed_slice(),
            flags,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }
}
