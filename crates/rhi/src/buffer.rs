//! GPU buffer management.
//!
//! Vertex and index buffers are device-local and reachable only through the
//! staging upload path; staging buffers are host-writable, device-readable,
//! and live for exactly one upload. Every buffer is registered with the
//! [`ResourceStateTracker`](crate::state::ResourceStateTracker) at creation
//! so barrier bookkeeping starts from a known state.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::state::{ResourceId, ResourceStateTracker, UsageState};

/// Buffer role.
///
/// Determines Vulkan usage flags, memory location, and the initial tracked
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local vertex buffer, filled by a staged copy.
    Vertex,
    /// Device-local index buffer, filled by a staged copy.
    Index,
    /// Transient host-writable upload source.
    Staging,
}

impl BufferKind {
    /// Converts to Vulkan buffer usage flags.
    pub fn usage_flags(self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Memory location for this buffer role.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferKind::Vertex | BufferKind::Index => MemoryLocation::GpuOnly,
            BufferKind::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Usage state the buffer is created in.
    ///
    /// Device-local buffers are born as copy destinations and transitioned
    /// to their steady state by the upload that fills them.
    pub fn initial_state(self) -> UsageState {
        match self {
            BufferKind::Vertex | BufferKind::Index => UsageState::CopyDestination,
            BufferKind::Staging => UsageState::GenericRead,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            BufferKind::Vertex => "vertex",
            BufferKind::Index => "index",
            BufferKind::Staging => "staging",
        }
    }
}

/// GPU buffer with managed memory and a tracked usage state.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    kind: BufferKind,
    resource_id: ResourceId,
}

impl Buffer {
    /// Creates a buffer of the given role and registers it with the tracker.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or buffer/memory creation fails.
    pub fn new(
        device: Arc<Device>,
        tracker: &mut ResourceStateTracker,
        kind: BufferKind,
        size: vk::DeviceSize,
        label: &str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(kind.usage_flags())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: kind.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        let resource_id = tracker.register(label, kind.initial_state());

        debug!("created {} buffer '{}': {} bytes", kind.name(), label, size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            kind,
            resource_id,
        })
    }

    /// Writes bytes into a host-visible buffer through its mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is not host-mapped (device-local
    /// buffers are filled by the upload path, never written directly) or
    /// the write would exceed the buffer size.
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidHandle(format!(
                "write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let allocation = self
            .allocation
            .as_ref()
            .ok_or_else(|| RhiError::InvalidHandle("buffer allocation missing".to_string()))?;

        let mapped_ptr = allocation.mapped_ptr().ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "{} buffer memory is not host-mapped",
                self.kind.name()
            ))
        })?;

        unsafe {
            let dst = mapped_ptr.as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
        }

        Ok(())
    }

    /// Raw Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Buffer role.
    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// State-tracker id of this buffer.
    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("failed to free buffer allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("destroyed {} buffer", self.kind.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert!(BufferKind::Vertex
            .usage_flags()
            .contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferKind::Vertex
            .usage_flags()
            .contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(BufferKind::Index
            .usage_flags()
            .contains(vk::BufferUsageFlags::INDEX_BUFFER));
        assert!(BufferKind::Staging
            .usage_flags()
            .contains(vk::BufferUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_memory_locations() {
        assert_eq!(BufferKind::Vertex.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferKind::Index.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(
            BufferKind::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_initial_states() {
        assert_eq!(
            BufferKind::Vertex.initial_state(),
            UsageState::CopyDestination
        );
        assert_eq!(
            BufferKind::Index.initial_state(),
            UsageState::CopyDestination
        );
        assert_eq!(BufferKind::Staging.initial_state(), UsageState::GenericRead);
    }
}
