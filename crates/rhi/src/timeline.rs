//! Host/device completion tracking.
//!
//! The [`CompletionFence`] is the sole primitive through which the host
//! learns that GPU work has finished. It wraps a Vulkan timeline semaphore:
//! a monotonically increasing 64-bit counter that the queue raises after all
//! previously submitted work completes, and that the host can block on.
//!
//! The protocol is strict: the caller obtains the next counter value, has
//! the queue signal it (either with [`CompletionFence::signal_on_queue`] or
//! by embedding the signal in a batched submit via
//! [`CompletionFence::next_signal_value`]), and later waits on that exact
//! value. Reusing a stale value reintroduces the race the fence exists to
//! prevent, so the counter only ever moves forward for the lifetime of the
//! object.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Outcome of a bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The observed counter reached the requested value.
    Reached,
    /// The timeout elapsed first. Fatal in steady-state rendering (it means
    /// a hang or device loss); tolerated only by the shutdown drain.
    TimedOut,
}

/// Monotonic completion counter bridging the host and device timelines.
pub struct CompletionFence {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
    /// Last value handed out for signaling. Only ever incremented.
    counter: u64,
}

impl CompletionFence {
    /// Creates a fence with its counter at zero.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);

        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("created completion fence");

        Ok(Self {
            device,
            semaphore,
            counter: 0,
        })
    }

    /// Raw semaphore handle, for embedding signals in batched submits.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Last value handed out for signaling.
    #[inline]
    pub fn last_signaled_value(&self) -> u64 {
        self.counter
    }

    /// Reserves and returns the next counter value.
    ///
    /// The caller must arrange for the queue to signal exactly this value
    /// (typically in the same `queue_submit` that carries the frame's
    /// command buffer). Every reserved value must be signaled; skipping one
    /// would leave waiters on it blocked forever.
    #[inline]
    pub fn next_signal_value(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Enqueues a standalone signal on `queue` and returns the new value.
    ///
    /// The counter rises once every command submitted to the queue before
    /// this point has completed. Used for upload completion and for the
    /// final drain at shutdown.
    pub fn signal_on_queue(&mut self, queue: vk::Queue) -> RhiResult<u64> {
        let value = self.next_signal_value();

        let signal_values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&signal_values);

        let signal_semaphores = [self.semaphore];
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .handle()
                .queue_submit(queue, &[submit_info], vk::Fence::null())?;
        }

        Ok(value)
    }

    /// Reads the counter value the device has reached so far.
    pub fn completed_value(&self) -> RhiResult<u64> {
        let value = unsafe {
            self.device
                .handle()
                .get_semaphore_counter_value(self.semaphore)?
        };
        Ok(value)
    }

    /// Blocks until the observed counter reaches `value` or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// Only genuine device errors are returned as `Err`; an elapsed timeout
    /// is reported as [`WaitOutcome::TimedOut`] so the caller can decide
    /// whether it is fatal (steady state) or tolerable (shutdown drain).
    pub fn wait_until(&self, value: u64, timeout: Duration) -> RhiResult<WaitOutcome> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let timeout_ns = timeout.as_nanos().min(u64::MAX as u128) as u64;

        match unsafe { self.device.handle().wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(WaitOutcome::Reached),
            Err(vk::Result::TIMEOUT) => Ok(WaitOutcome::TimedOut),
            Err(e) => Err(RhiError::from(e)),
        }
    }
}

impl Drop for CompletionFence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("destroyed completion fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_outcome_equality() {
        assert_eq!(WaitOutcome::Reached, WaitOutcome::Reached);
        assert_ne!(WaitOutcome::Reached, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_completion_fence_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CompletionFence>();
    }
}
