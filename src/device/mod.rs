//! Device facade
//!
//! One [`DeviceManager`] models one open device session. It owns the
//! buffer and model handle tables, the device memory arena, the transfer
//! channel pool, and the fence tracker, and exposes the operations the
//! driver-facing layer consumes.
//!
//! ## Module Structure
//!
//! - [`caps`] - Capability snapshot and feature bits
//! - [`config`] - Device configuration and builder
//! - [`resource`] - Buffer and model records
//! - [`manager`] - The `DeviceManager` facade
//! - [`stats`] - Statistics snapshot

pub mod caps;
pub mod config;
pub mod manager;
pub mod resource;
pub mod stats;

pub use caps::{features, DeviceCaps};
pub use config::{DeviceConfig, DRIVER_VERSION};
pub use manager::{DeviceManager, InferenceRequest};
pub use resource::{alloc_flags, BufferRecord, DeviceAllocation, MapState, ModelRecord, PinState};
pub use stats::DeviceStats;
