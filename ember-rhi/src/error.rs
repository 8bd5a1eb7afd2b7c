//! Error taxonomy for the RHI.

use ash::vk;
use thiserror::Error;

/// Errors surfaced by creation, mapping, and wait operations.
///
/// Recording operations on a command list do not return errors; contract
/// violations during recording are logged and the eventual submit is expected
/// to fail validation instead.
#[derive(Debug, Error)]
pub enum RhiError {
    /// A requested feature, format, or extension is not available.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// No physical device satisfies the required queue families, extensions,
    /// and features.
    #[error("no suitable physical device found")]
    NoSuitableDevice,

    /// Device or host allocation was rejected.
    #[error("out of device or host memory")]
    OutOfMemory,

    /// The upload manager exceeded its memory limit. The caller may split the
    /// operation or wait for prior submissions to retire chunks.
    #[error("upload manager memory limit exceeded")]
    OutOfUploadMemory,

    /// A static API contract was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The backend reported a non-recoverable device loss. The device is
    /// unusable afterwards.
    #[error("device lost")]
    DeviceLost,

    /// A queue wait or swapchain acquire exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// Any other backend error code.
    #[error("vulkan error: {0}")]
    Backend(vk::Result),
}

impl From<vk::Result> for RhiError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                RhiError::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => RhiError::Timeout,
            other => RhiError::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_result_mapping() {
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RhiError::OutOfMemory
        ));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_DEVICE_LOST),
            RhiError::DeviceLost
        ));
        assert!(matches!(RhiError::from(vk::Result::TIMEOUT), RhiError::Timeout));
        assert!(matches!(
            RhiError::from(vk::Result::ERROR_FRAGMENTED_POOL),
            RhiError::Backend(_)
        ));
    }
}
