//! Resource usage-state tracking and barrier generation.
//!
//! Every device resource the renderer touches has exactly one tracked
//! [`UsageState`] at any point in time. Before a command buffer uses a
//! resource in a way its current state does not allow, the caller asks the
//! [`ResourceStateTracker`] for a transition; the tracker validates the
//! request against its records, updates them, and hands back a
//! [`Transition`] that lowers to the matching `vkCmdPipelineBarrier`
//! arguments.
//!
//! A transition whose `from` state does not match the tracked state is a
//! programming error (stale bookkeeping upstream) and fails hard with
//! [`RhiError::StateMismatch`] — it is never silently corrected, because the
//! GPU-side consequence of a wrong barrier is silent corruption, not an
//! error code.
//!
//! # Usage
//!
//! ```text
//! let id = tracker.register("back buffer 0", UsageState::Present);
//! ...
//! let t = tracker.transition(id, UsageState::Present, UsageState::RenderTarget)?;
//! recorder.image_barrier(&t, image, vk::ImageAspectFlags::COLOR, false);
//! ```

use std::collections::HashMap;
use std::fmt;

use ash::vk;

use crate::error::{RhiError, RhiResult};

/// The closed set of usage states a tracked resource can be in.
///
/// Modeled as an enum rather than raw access/layout bitmasks so that an
/// illegal transition is a fail-fast runtime error instead of undefined
/// behavior on the device timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UsageState {
    /// Destination of a transfer (staging copies land here).
    CopyDestination,
    /// Source of a transfer.
    CopySource,
    /// Host-visible staging memory, readable by the device.
    GenericRead,
    /// Color attachment being rendered to.
    RenderTarget,
    /// Depth attachment being written.
    DepthWrite,
    /// Sampled in the fragment stage.
    PixelShaderResource,
    /// Bound as vertex or index input.
    VertexOrIndexInput,
    /// Owned by the presentation engine.
    Present,
}

impl UsageState {
    /// Image layout a resource in this state occupies.
    ///
    /// Buffer-only states map to `GENERAL`; they never appear in an image
    /// barrier.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            UsageState::CopyDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            UsageState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            UsageState::GenericRead => vk::ImageLayout::GENERAL,
            UsageState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            UsageState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            UsageState::PixelShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            UsageState::VertexOrIndexInput => vk::ImageLayout::GENERAL,
            UsageState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Memory accesses commands perform on a resource in this state.
    pub fn access_flags(self) -> vk::AccessFlags {
        match self {
            UsageState::CopyDestination => vk::AccessFlags::TRANSFER_WRITE,
            UsageState::CopySource => vk::AccessFlags::TRANSFER_READ,
            UsageState::GenericRead => vk::AccessFlags::HOST_WRITE | vk::AccessFlags::MEMORY_READ,
            UsageState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            UsageState::DepthWrite => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            UsageState::PixelShaderResource => vk::AccessFlags::SHADER_READ,
            UsageState::VertexOrIndexInput => {
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ
            }
            // The presentation engine synchronizes through the present
            // semaphore, not through memory dependencies.
            UsageState::Present => vk::AccessFlags::empty(),
        }
    }

    /// Pipeline stages that touch a resource in this state.
    pub fn stage_flags(self) -> vk::PipelineStageFlags {
        match self {
            UsageState::CopyDestination | UsageState::CopySource => {
                vk::PipelineStageFlags::TRANSFER
            }
            UsageState::GenericRead => vk::PipelineStageFlags::HOST,
            UsageState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            UsageState::DepthWrite => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            }
            UsageState::PixelShaderResource => vk::PipelineStageFlags::FRAGMENT_SHADER,
            UsageState::VertexOrIndexInput => vk::PipelineStageFlags::VERTEX_INPUT,
            UsageState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }
    }
}

impl fmt::Display for UsageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque handle identifying a tracked resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Raw numeric value, for diagnostics.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A validated state transition, ready to be recorded as a barrier.
///
/// Produced only by the tracker — [`ResourceStateTracker::transition`] for
/// real state changes and [`ResourceStateTracker::activate`] for first-use
/// layout activation; by the time one of these exists, the tracker's record
/// already matches `to`.
#[derive(Clone, Copy, Debug)]
pub struct Transition {
    id: ResourceId,
    from: UsageState,
    to: UsageState,
}

impl Transition {
    /// Resource the transition applies to.
    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// State the resource is leaving.
    #[inline]
    pub fn from(&self) -> UsageState {
        self.from
    }

    /// State the resource is entering.
    #[inline]
    pub fn to(&self) -> UsageState {
        self.to
    }

    /// Source pipeline stages for the barrier.
    #[inline]
    pub fn src_stage(&self) -> vk::PipelineStageFlags {
        self.from.stage_flags()
    }

    /// Destination pipeline stages for the barrier.
    #[inline]
    pub fn dst_stage(&self) -> vk::PipelineStageFlags {
        self.to.stage_flags()
    }

    /// Lowers the transition to an image memory barrier.
    ///
    /// `discard` replaces the old layout with `UNDEFINED`, for the first use
    /// of an image whose contents have never been written: Vulkan images are
    /// born in the undefined layout regardless of the state we track for
    /// them, and a discard transition is how that gap is bridged.
    pub fn image_barrier(
        &self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        discard: bool,
    ) -> vk::ImageMemoryBarrier<'static> {
        let old_layout = if discard {
            vk::ImageLayout::UNDEFINED
        } else {
            self.from.image_layout()
        };

        vk::ImageMemoryBarrier::default()
            .src_access_mask(self.from.access_flags())
            .dst_access_mask(self.to.access_flags())
            .old_layout(old_layout)
            .new_layout(self.to.image_layout())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(1),
            )
    }

    /// Lowers the transition to a buffer memory barrier covering the whole
    /// buffer.
    pub fn buffer_barrier(
        &self,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
    ) -> vk::BufferMemoryBarrier<'static> {
        vk::BufferMemoryBarrier::default()
            .src_access_mask(self.from.access_flags())
            .dst_access_mask(self.to.access_flags())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(size)
    }
}

struct TrackedResource {
    label: String,
    state: UsageState,
}

/// Per-resource record of current usage state.
///
/// The tracker is the only code allowed to mutate a resource's tracked
/// state, and it does so exactly when a transition (and therefore a barrier)
/// is produced. All recording happens on one thread, so no interior locking
/// is needed; fence gating, not mutual exclusion, protects the GPU side.
#[derive(Default)]
pub struct ResourceStateTracker {
    resources: HashMap<ResourceId, TrackedResource>,
    next_id: u64,
}

impl ResourceStateTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource in its initial state and returns its id.
    pub fn register(&mut self, label: impl Into<String>, initial: UsageState) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        let label = label.into();
        tracing::debug!("tracking '{}' in state {:?}", label, initial);
        self.resources
            .insert(id, TrackedResource { label, state: initial });
        id
    }

    /// Removes a resource from tracking (on destruction).
    pub fn unregister(&mut self, id: ResourceId) {
        if let Some(res) = self.resources.remove(&id) {
            tracing::debug!("untracking '{}'", res.label);
        }
    }

    /// Returns the current tracked state of a resource.
    pub fn current(&self, id: ResourceId) -> RhiResult<UsageState> {
        self.resources
            .get(&id)
            .map(|r| r.state)
            .ok_or(RhiError::UnknownResource(id.raw()))
    }

    /// Validates and applies a state transition.
    ///
    /// The request is valid only if `from` equals the tracked state. On
    /// success the tracked state becomes `to` and the returned [`Transition`]
    /// must be recorded as a barrier in the command buffer that relies on
    /// the new state, after the commands that required the old one.
    ///
    /// # Errors
    ///
    /// [`RhiError::StateMismatch`] when `from` is stale and
    /// [`RhiError::UnknownResource`] for an unregistered id. Both indicate
    /// bugs in the caller, not recoverable conditions.
    pub fn transition(
        &mut self,
        id: ResourceId,
        from: UsageState,
        to: UsageState,
    ) -> RhiResult<Transition> {
        let res = self
            .resources
            .get_mut(&id)
            .ok_or(RhiError::UnknownResource(id.raw()))?;

        if res.state != from {
            return Err(RhiError::StateMismatch {
                resource: res.label.clone(),
                expected: from,
                actual: res.state,
            });
        }

        res.state = to;
        Ok(Transition { id, from, to })
    }

    /// Produces a first-use activation barrier for a resource.
    ///
    /// Vulkan images are created in the undefined layout no matter what
    /// state is tracked for them. The activation transition re-enters the
    /// tracked state and must be recorded with the discard flag, which
    /// replaces its old layout with `UNDEFINED`. The tracked state is not
    /// changed.
    ///
    /// # Errors
    ///
    /// [`RhiError::UnknownResource`] for an unregistered id.
    pub fn activate(&self, id: ResourceId) -> RhiResult<Transition> {
        let state = self.current(id)?;
        Ok(Transition {
            id,
            from: state,
            to: state,
        })
    }

    /// Number of resources currently tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the tracker is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_updates_tracked_state() {
        let mut tracker = ResourceStateTracker::new();
        let id = tracker.register("back buffer", UsageState::Present);

        let t = tracker
            .transition(id, UsageState::Present, UsageState::RenderTarget)
            .unwrap();
        assert_eq!(t.from, UsageState::Present);
        assert_eq!(t.to, UsageState::RenderTarget);
        assert_eq!(tracker.current(id).unwrap(), UsageState::RenderTarget);

        tracker
            .transition(id, UsageState::RenderTarget, UsageState::Present)
            .unwrap();
        assert_eq!(tracker.current(id).unwrap(), UsageState::Present);
    }

    #[test]
    fn test_stale_from_state_fails_fast() {
        let mut tracker = ResourceStateTracker::new();
        let id = tracker.register("vertex buffer", UsageState::CopyDestination);

        // Deliberately claim the wrong current state.
        let err = tracker
            .transition(id, UsageState::VertexOrIndexInput, UsageState::CopySource)
            .unwrap_err();

        match err {
            RhiError::StateMismatch {
                resource,
                expected,
                actual,
            } => {
                assert_eq!(resource, "vertex buffer");
                assert_eq!(expected, UsageState::VertexOrIndexInput);
                assert_eq!(actual, UsageState::CopyDestination);
            }
            other => panic!("expected StateMismatch, got {other:?}"),
        }

        // The failed request must not have mutated the record.
        assert_eq!(tracker.current(id).unwrap(), UsageState::CopyDestination);
    }

    #[test]
    fn test_unknown_resource_is_rejected() {
        let mut tracker = ResourceStateTracker::new();
        let id = tracker.register("temp", UsageState::GenericRead);
        tracker.unregister(id);

        assert!(matches!(
            tracker.current(id),
            Err(RhiError::UnknownResource(_))
        ));
        assert!(matches!(
            tracker.transition(id, UsageState::GenericRead, UsageState::CopySource),
            Err(RhiError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_activation_re_enters_tracked_state() {
        let mut tracker = ResourceStateTracker::new();
        let id = tracker.register("depth buffer", UsageState::DepthWrite);

        let init = tracker.activate(id).unwrap();
        assert_eq!(init.from(), UsageState::DepthWrite);
        assert_eq!(init.to(), UsageState::DepthWrite);
        // Activation never moves the tracked state.
        assert_eq!(tracker.current(id).unwrap(), UsageState::DepthWrite);

        // Recorded with discard, it bridges from the undefined layout.
        let barrier = init.image_barrier(vk::Image::null(), vk::ImageAspectFlags::DEPTH, true);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            barrier.new_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        tracker.unregister(id);
        assert!(matches!(
            tracker.activate(id),
            Err(RhiError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut tracker = ResourceStateTracker::new();
        let a = tracker.register("a", UsageState::Present);
        let b = tracker.register("b", UsageState::Present);
        assert_ne!(a, b);
    }

    #[test]
    fn test_image_layout_mapping() {
        assert_eq!(
            UsageState::Present.image_layout(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            UsageState::RenderTarget.image_layout(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            UsageState::CopyDestination.image_layout(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            UsageState::DepthWrite.image_layout(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_discard_barrier_uses_undefined_old_layout() {
        let t = Transition {
            id: ResourceId(0),
            from: UsageState::Present,
            to: UsageState::RenderTarget,
        };
        let barrier = t.image_barrier(vk::Image::null(), vk::ImageAspectFlags::COLOR, true);
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            barrier.new_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );

        let barrier = t.image_barrier(vk::Image::null(), vk::ImageAspectFlags::COLOR, false);
        assert_eq!(barrier.old_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_buffer_barrier_covers_full_range() {
        let t = Transition {
            id: ResourceId(0),
            from: UsageState::CopyDestination,
            to: UsageState::VertexOrIndexInput,
        };
        let barrier = t.buffer_barrier(vk::Buffer::null(), 256);
        assert_eq!(barrier.offset, 0);
        assert_eq!(barrier.size, 256);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert!(barrier
            .dst_access_mask
            .contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ));
    }
}
