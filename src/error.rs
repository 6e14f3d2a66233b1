//! Error types for the device layer.
//!
//! Per-frame operations (pool gets, staged writes) report failure through
//! `Option`/`bool` returns plus a log line; `DeviceError` is reserved for the
//! creation paths and for conditions the frame loop must react to.

use thiserror::Error;

/// Errors surfaced by [`RenderDevice`](crate::device::RenderDevice)
/// implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Out of device memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Internal device error: {0}")]
    Internal(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::ResourceCreationFailed("buffer too large".into());
        assert_eq!(err.to_string(), "Failed to create resource: buffer too large");
        assert_eq!(DeviceError::OutOfMemory.to_string(), "Out of device memory");
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(DeviceError::DeviceLost, DeviceError::DeviceLost);
        assert_ne!(
            DeviceError::OutOfMemory,
            DeviceError::Internal("oom".into())
        );
    }
}
