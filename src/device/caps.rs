//! Device capability reporting

use serde::Serialize;

/// Feature bits advertised in [`DeviceCaps::features`]
pub mod features {
    pub const FP32: u32 = 1 << 0;
    pub const FP16: u32 = 1 << 1;
    pub const INT8: u32 = 1 << 2;
    pub const INT4: u32 = 1 << 3;
    pub const SPARSE: u32 = 1 << 4;
    pub const BATCH: u32 = 1 << 5;
}

/// Read-only capability snapshot for one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCaps {
    /// Packed driver version (major << 16 | minor << 8 | patch)
    pub version: u32,
    /// Number of compute engines
    pub engine_count: u32,
    /// Maximum batch size per job
    pub max_batch: u32,
    /// Device memory in bytes
    pub memory_size: u64,
    /// Maximum single allocation in bytes
    pub max_alloc_size: u64,
    /// Feature bitmask (see [`features`])
    pub features: u32,
}

impl DeviceCaps {
    pub fn has_feature(&self, feature: u32) -> bool {
        self.features & feature != 0
    }

    /// Human-readable version string
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            (self.version >> 16) & 0xff,
            (self.version >> 8) & 0xff,
            self.version & 0xff
        )
    }
}
