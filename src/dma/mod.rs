//! DMA subsystem
//!
//! Scatter-gather region building, the transfer channel pool, and the
//! transfer engine, all sitting on the [`bus::DmaBus`] backend seam.
//! Host memory is pinned only for the lifetime of one region; channels
//! are leased per operation and returned by RAII guards.

pub mod bus;
pub mod channel;
pub mod engine;
pub mod region;

pub use bus::{
    CompletionHandler, CompletionNotice, Direction, DmaBus, PageRef, SimBus, TransferCookie,
    TransferDescriptor, TransferStatus,
};
pub use channel::{ChannelId, ChannelLease, ChannelPool, DEFAULT_CHANNELS};
pub use engine::TransferEngine;
pub use region::{HostRegion, ScatterRegion, ScatterSegment, PAGE_SHIFT, PAGE_SIZE};
