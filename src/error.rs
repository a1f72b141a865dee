//! Unified error handling for AccelForge
//!
//! This module provides a centralized error type covering every subsystem:
//! handle tables, device memory, the DMA engine, fence tracking, and the
//! device facade. Each variant maps onto a stable reported code via
//! [`AccelError::code`], so callers at the reporting boundary can act on
//! the class of failure without matching every variant.

use std::fmt;
use std::time::Duration;

/// Unified error type for AccelForge
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccelError {
    // ========== Caller errors ==========
    /// Bad argument from the caller (zero length, out-of-range value)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested size is outside the allowed window
    #[error("invalid size: {size} bytes (limit {max})")]
    InvalidSize { size: u64, max: u64 },

    // ========== Lookup failures ==========
    /// Handle does not name a live resource in its namespace
    #[error("handle {0} not found")]
    HandleNotFound(u32),

    /// Fence was never issued or its job record is gone
    #[error("fence {0} not found")]
    FenceNotFound(u64),

    // ========== Resource exhaustion ==========
    /// Handle namespace is at capacity
    #[error("no free handle slots")]
    OutOfHandles,

    /// Every transfer channel is leased
    #[error("no free transfer channels")]
    NoChannelsFree,

    /// Device memory window cannot satisfy the allocation
    #[error("device memory exhausted: requested {requested} bytes, {free} free")]
    OutOfDeviceMemory { requested: u64, free: u64 },

    // ========== Transfer failures ==========
    /// A copy to or from caller-supplied host memory failed
    #[error("host memory fault: {0}")]
    Fault(String),

    /// Deadline elapsed before the operation completed
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The channel pool initialized with zero usable channels
    #[error("no transfer channels initialized")]
    NoDevice,

    /// The underlying transfer reported a hardware status code
    #[error("transfer failed with device status {0}")]
    TransferFailed(i32),

    /// Device-level failure outside a specific transfer
    #[error("device error: {0}")]
    DeviceError(String),

    // ========== Logic errors ==========
    /// Completion was delivered for a fence already in a terminal state
    #[error("fence {0} already reached a terminal state")]
    FenceAlreadyComplete(u64),

    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),

    /// Lock poisoned (indicates a bug or panicked holder)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Reported error code, one per user-visible failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Bad size, zero length, or out-of-range value
    InvalidArgument,
    /// Unknown handle or fence
    NotFound,
    /// No free channel, handle slot, or device memory
    ResourceExhausted,
    /// Copy to/from caller-supplied memory failed
    Fault,
    /// Wait deadline exceeded
    Timeout,
    /// Underlying transfer or device reported failure
    DeviceError,
    /// Logic error inside the manager
    Internal,
}

impl AccelError {
    /// Classify the error for reporting decisions
    pub fn code(&self) -> ErrorCode {
        match self {
            AccelError::InvalidArgument(_) | AccelError::InvalidSize { .. } => {
                ErrorCode::InvalidArgument
            }

            AccelError::HandleNotFound(_) | AccelError::FenceNotFound(_) => ErrorCode::NotFound,

            AccelError::OutOfHandles
            | AccelError::NoChannelsFree
            | AccelError::OutOfDeviceMemory { .. } => ErrorCode::ResourceExhausted,

            AccelError::Fault(_) => ErrorCode::Fault,

            AccelError::Timeout(_) => ErrorCode::Timeout,

            AccelError::NoDevice
            | AccelError::TransferFailed(_)
            | AccelError::DeviceError(_) => ErrorCode::DeviceError,

            AccelError::FenceAlreadyComplete(_)
            | AccelError::Internal(_)
            | AccelError::LockPoisoned(_) => ErrorCode::Internal,
        }
    }

    /// Check if the caller can fix this by changing its request
    pub fn is_caller_error(&self) -> bool {
        matches!(self.code(), ErrorCode::InvalidArgument | ErrorCode::NotFound)
    }

    /// Check if the operation may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ResourceExhausted | ErrorCode::Timeout
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidArgument => write!(f, "InvalidArgument"),
            ErrorCode::NotFound => write!(f, "NotFound"),
            ErrorCode::ResourceExhausted => write!(f, "ResourceExhausted"),
            ErrorCode::Fault => write!(f, "Fault"),
            ErrorCode::Timeout => write!(f, "Timeout"),
            ErrorCode::DeviceError => write!(f, "DeviceError"),
            ErrorCode::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for AccelError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AccelError::LockPoisoned(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type AccelResult<T> = std::result::Result<T, AccelError>;
