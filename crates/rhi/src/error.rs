//! RHI-specific error types.

use thiserror::Error;

use crate::state::UsageState;

/// RHI-specific error type.
///
/// Any graphics-backend failure is unrecoverable for the process: callers
/// propagate these to the top-level loop driver, which logs and terminates.
/// The state-tracking variants mark programming errors (stale bookkeeping)
/// and are never silently coerced.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("no suitable GPU found")]
    NoSuitableGpu,

    /// Shader blob error
    #[error("shader error: {0}")]
    ShaderError(String),

    /// Swapchain error
    #[error("swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("pipeline error: {0}")]
    PipelineError(String),

    /// Invalid handle or argument
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// A transition was requested from a state the resource is not in.
    ///
    /// This means the caller's picture of the resource has gone stale; it is
    /// a programming error upstream, not a recoverable condition.
    #[error("resource '{resource}' tracked in state {actual:?}, transition expected {expected:?}")]
    StateMismatch {
        /// Label of the resource the transition targeted.
        resource: String,
        /// The `from` state the caller claimed.
        expected: UsageState,
        /// The state the tracker actually has on record.
        actual: UsageState,
    },

    /// A resource id was used that was never registered with the tracker.
    #[error("resource id {0} is not registered with the state tracker")]
    UnknownResource(u64),

    /// The recorder was reset while a submission from its allocator may
    /// still be executing on the GPU.
    #[error("recorder reset with fence value {pending} still pending (retired value {retired})")]
    RecorderInUse {
        /// Fence value the last submission from this recorder will signal.
        pending: u64,
        /// Highest fence value known to have been reached.
        retired: u64,
    },

    /// The recorder was opened or closed in the wrong state.
    #[error("recorder state error: {0}")]
    RecorderState(String),

    /// An upload's completion wait timed out.
    ///
    /// Uploads are synchronous; a timeout here means the transfer queue has
    /// hung or the device was lost.
    #[error("upload did not complete within the timeout (fence value {0})")]
    UploadTimeout(u64),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_failure() {
        let err = RhiError::PipelineError("layout creation failed".into());
        assert_eq!(err.to_string(), "pipeline error: layout creation failed");

        let err = RhiError::StateMismatch {
            resource: "depth buffer".into(),
            expected: UsageState::Present,
            actual: UsageState::DepthWrite,
        };
        assert!(err.to_string().contains("depth buffer"));

        let err = RhiError::UploadTimeout(7);
        assert!(err.to_string().contains("fence value 7"));
    }
}
