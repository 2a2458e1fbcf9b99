//! Command recording.
//!
//! A [`CommandRecorder`] is a reusable (command pool, primary command
//! buffer) pair. The pool is the backing allocator: resetting it while a
//! command buffer allocated from it is still executing on the GPU is
//! undefined behavior at the driver level, so the recorder refuses to reset
//! until the fence value signaled after its last submission has been
//! retired. That check lives in the [`SubmissionGate`], a small piece of
//! pure bookkeeping that turns a silent-corruption bug into a hard error.
//!
//! Recording follows an explicit open/close protocol:
//!
//! ```text
//! recorder.reset(retired)?;      // precondition: last submission retired
//! recorder.open()?;              // fails if already recording
//! recorder.image_barrier(...);   // typed record calls
//! recorder.draw(...);
//! recorder.close()?;             // fails if not recording
//! // submit; then recorder.mark_submitted(fence_value)
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::state::Transition;

/// Tracks the fence value a recorder's last submission will signal.
///
/// Reset is only legal once that value has been retired (observed as
/// reached on the completion fence). Kept separate from the recorder so the
/// rule itself is trivially testable.
#[derive(Debug, Default)]
pub struct SubmissionGate {
    pending: Option<u64>,
}

impl SubmissionGate {
    /// Creates a gate with no submission outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the owning recorder was submitted and will be retired
    /// once the fence reaches `fence_value`.
    pub fn mark_submitted(&mut self, fence_value: u64) {
        self.pending = Some(fence_value);
    }

    /// Fence value the last submission will signal, if any is outstanding.
    #[inline]
    pub fn pending(&self) -> Option<u64> {
        self.pending
    }

    /// Checks that resetting is safe given the highest retired fence value.
    ///
    /// # Errors
    ///
    /// [`RhiError::RecorderInUse`] if the last submission's value has not
    /// been retired. This is a programming error in the caller's frame
    /// sequencing, not a condition to retry.
    pub fn check_reset(&self, retired: u64) -> RhiResult<()> {
        match self.pending {
            Some(pending) if pending > retired => {
                Err(RhiError::RecorderInUse { pending, retired })
            }
            _ => Ok(()),
        }
    }
}

/// Recording state of a [`CommandRecorder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    /// Not recording; must be opened before record calls.
    Closed,
    /// Between `open()` and `close()`.
    Recording,
}

/// Reusable command allocator + primary command buffer pair.
///
/// One recorder is reused every frame in the baseline design. Not
/// thread-safe; all recording happens on the render thread.
pub struct CommandRecorder {
    device: Arc<Device>,
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    state: RecorderState,
    gate: SubmissionGate,
}

impl CommandRecorder {
    /// Creates a recorder for the given queue family.
    ///
    /// The pool is created without per-buffer reset: the whole allocator is
    /// reset between frames, mirroring its role as the unit of reuse.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(queue_family_index);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { device.handle().allocate_command_buffers(&alloc_info)? };

        info!("command recorder created for queue family {queue_family_index}");

        Ok(Self {
            device,
            pool,
            buffer: buffers[0],
            state: RecorderState::Closed,
            gate: SubmissionGate::new(),
        })
    }

    /// Raw command buffer handle, for submission.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Current recording state.
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Resets the allocator and its command buffer.
    ///
    /// `retired` is the highest fence value known to have been reached.
    ///
    /// # Errors
    ///
    /// [`RhiError::RecorderInUse`] if the GPU may still be executing the
    /// recorder's last submission, [`RhiError::RecorderState`] if called
    /// while recording.
    pub fn reset(&mut self, retired: u64) -> RhiResult<()> {
        if self.state == RecorderState::Recording {
            return Err(RhiError::RecorderState(
                "cannot reset while recording".into(),
            ));
        }
        self.gate.check_reset(retired)?;

        unsafe {
            self.device
                .handle()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }

    /// Begins recording.
    ///
    /// # Errors
    ///
    /// [`RhiError::RecorderState`] if already recording.
    pub fn open(&mut self) -> RhiResult<()> {
        if self.state == RecorderState::Recording {
            return Err(RhiError::RecorderState("recorder is already open".into()));
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.state = RecorderState::Recording;
        Ok(())
    }

    /// Ends recording; the buffer is then ready for submission.
    ///
    /// # Errors
    ///
    /// [`RhiError::RecorderState`] if not currently recording.
    pub fn close(&mut self) -> RhiResult<()> {
        if self.state != RecorderState::Recording {
            return Err(RhiError::RecorderState("recorder is not open".into()));
        }

        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        self.state = RecorderState::Closed;
        Ok(())
    }

    /// Records that this recorder's buffer was submitted and will be safe
    /// to reset once the fence reaches `fence_value`.
    pub fn mark_submitted(&mut self, fence_value: u64) {
        debug!("recorder submitted, retires at fence value {fence_value}");
        self.gate.mark_submitted(fence_value);
    }

    // =========================================================================
    // Barriers
    // =========================================================================

    /// Records an image transition barrier.
    ///
    /// `discard` drops the previous contents (first use of an image whose
    /// data has never been written).
    pub fn image_barrier(
        &self,
        transition: &Transition,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        discard: bool,
    ) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        let barrier = transition.image_barrier(image, aspect_mask, discard);
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                transition.src_stage(),
                transition.dst_stage(),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Records a buffer transition barrier covering the whole buffer.
    pub fn buffer_barrier(
        &self,
        transition: &Transition,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        let barrier = transition.buffer_barrier(buffer, size);
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                transition.src_stage(),
                transition.dst_stage(),
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }

    // =========================================================================
    // Dynamic rendering
    // =========================================================================

    /// Begins dynamic rendering with the given attachments.
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    /// Ends dynamic rendering.
    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    // =========================================================================
    // Binding and draw
    // =========================================================================

    /// Binds a graphics pipeline.
    pub fn bind_pipeline(&self, pipeline: vk::Pipeline) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );
        }
    }

    /// Binds vertex buffers starting at binding 0.
    pub fn bind_vertex_buffers(&self, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        unsafe {
            self.device
                .handle()
                .cmd_bind_vertex_buffers(self.buffer, 0, buffers, offsets);
        }
    }

    /// Sets the viewport dynamically.
    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    /// Sets the scissor rectangle dynamically.
    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// Issues a non-indexed draw.
    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        unsafe {
            self.device
                .handle()
                .cmd_draw(self.buffer, vertex_count, instance_count, 0, 0);
        }
    }

    // =========================================================================
    // Copies
    // =========================================================================

    /// Records a buffer-to-buffer copy.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    /// Records a buffer-to-image copy; the image must be in the transfer
    /// destination layout.
    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        debug_assert_eq!(self.state, RecorderState::Recording);
        unsafe {
            self.device.handle().cmd_copy_buffer_to_image(
                self.buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        info!("command recorder destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_allows_reset_with_no_submission() {
        let gate = SubmissionGate::new();
        assert!(gate.check_reset(0).is_ok());
    }

    #[test]
    fn test_gate_blocks_reset_before_retirement() {
        let mut gate = SubmissionGate::new();
        gate.mark_submitted(5);

        // Reset ordered before the wait: must be detected, not tolerated.
        let err = gate.check_reset(4).unwrap_err();
        match err {
            RhiError::RecorderInUse { pending, retired } => {
                assert_eq!(pending, 5);
                assert_eq!(retired, 4);
            }
            other => panic!("expected RecorderInUse, got {other:?}"),
        }
    }

    #[test]
    fn test_gate_allows_reset_after_retirement() {
        let mut gate = SubmissionGate::new();
        gate.mark_submitted(5);
        assert!(gate.check_reset(5).is_ok());
        assert!(gate.check_reset(9).is_ok());
    }

    #[test]
    fn test_gate_tracks_latest_submission() {
        let mut gate = SubmissionGate::new();
        gate.mark_submitted(1);
        gate.mark_submitted(2);
        assert!(gate.check_reset(1).is_err());
        assert!(gate.check_reset(2).is_ok());
        assert_eq!(gate.pending(), Some(2));
    }
}
