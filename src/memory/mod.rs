//! Device memory management
//!
//! The device exposes one flat memory window; buffer allocation carves
//! page-aligned ranges out of it with a best-fit free-block allocator.
//! Keeping the bookkeeping host-side means allocation and release never
//! touch the device, so they stay cheap and lock-friendly.

pub mod arena;

pub use arena::DeviceArena;
