//! Configuration for the device manager

use std::time::Duration;

use crate::device::caps::features;
use crate::dma::DEFAULT_CHANNELS;

/// Packed driver version: 1.0.0
pub const DRIVER_VERSION: u32 = 0x010000;

/// Configuration for one device-manager instance
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Number of transfer channels in the pool
    pub num_channels: usize,

    /// Number of compute engines advertised in the capabilities
    pub engine_count: u32,

    /// Maximum batch size per job
    pub max_batch: u32,

    /// Device memory window in bytes
    pub memory_size: u64,

    /// Maximum single allocation in bytes
    pub max_alloc_size: u64,

    /// Maximum simultaneously live buffer handles
    pub max_buffers: usize,

    /// Maximum simultaneously live model handles
    pub max_models: usize,

    /// Feature bitmask advertised in the capabilities
    pub features: u32,

    /// Simulated completion latency of the bus backend
    pub sim_latency: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            num_channels: DEFAULT_CHANNELS,
            engine_count: 4,
            max_batch: 32,
            memory_size: 1 << 30,       // 1 GiB
            max_alloc_size: 256 << 20,  // 256 MiB
            max_buffers: 1024,
            max_models: 64,
            features: features::FP32 | features::FP16 | features::INT8 | features::BATCH,
            sim_latency: Duration::from_micros(200),
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of transfer channels
    pub fn with_num_channels(mut self, num_channels: usize) -> Self {
        self.num_channels = num_channels;
        self
    }

    /// Set the advertised engine count
    pub fn with_engine_count(mut self, engine_count: u32) -> Self {
        self.engine_count = engine_count;
        self
    }

    /// Set the maximum batch size
    pub fn with_max_batch(mut self, max_batch: u32) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Set the device memory window size
    pub fn with_memory_size(mut self, memory_size: u64) -> Self {
        self.memory_size = memory_size;
        self
    }

    /// Set the maximum single allocation size
    pub fn with_max_alloc_size(mut self, max_alloc_size: u64) -> Self {
        self.max_alloc_size = max_alloc_size;
        self
    }

    /// Set the buffer handle capacity
    pub fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    /// Set the model handle capacity
    pub fn with_max_models(mut self, max_models: usize) -> Self {
        self.max_models = max_models;
        self
    }

    /// Set the advertised feature bitmask
    pub fn with_features(mut self, features: u32) -> Self {
        self.features = features;
        self
    }

    /// Set the simulated bus latency
    pub fn with_sim_latency(mut self, sim_latency: Duration) -> Self {
        self.sim_latency = sim_latency;
        self
    }
}
