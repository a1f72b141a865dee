//! AccelForge - AI Accelerator Resource Manager
//!
//! A device-resource manager for accelerator-style hardware: opaque
//! handles for device buffers and loaded models, scatter-gather DMA
//! transfers over a pool of channels, and fence-based tracking of
//! asynchronous job completion. The hardware itself is behind the
//! [`dma::DmaBus`] seam; the in-tree backend simulates the device the
//! way bring-up ran the driver in simulation mode.

#![allow(clippy::type_complexity)] // Completion handler signatures
#![allow(clippy::collapsible_if)] // Sometimes clearer for control flow

pub mod device;
pub mod dma;
pub mod error;
pub mod fence;
pub mod handle;
pub mod logging;
pub mod memory;
pub mod metrics;

pub use device::{DeviceCaps, DeviceConfig, DeviceManager, DeviceStats, InferenceRequest};
pub use dma::{ChannelPool, HostRegion, ScatterRegion, SimBus, TransferEngine};
pub use error::{AccelError, AccelResult, ErrorCode};
pub use fence::{FenceTracker, JobStatus};
pub use handle::{Handle, HandleTable};
pub use metrics::Metrics;
