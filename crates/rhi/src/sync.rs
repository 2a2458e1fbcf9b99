//! Binary synchronization primitives.
//!
//! Host-visible completion tracking goes through the timeline-based
//! [`CompletionFence`](crate::timeline::CompletionFence); this module only
//! provides the binary [`Semaphore`] the swapchain requires for the
//! acquire/present handoff (the presentation extension does not accept
//! timeline semaphores).

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore for GPU-to-GPU ordering within a frame.
///
/// Two are used per frame: one signaled when the acquired swapchain image
/// is ready, one signaled when rendering finishes and waited on by present.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a semaphore in the unsignaled state.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Raw semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("destroyed semaphore");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }
}
