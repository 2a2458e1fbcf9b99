//! Vulkan logical device and queue management.
//!
//! The [`Device`] owns the logical device handle and the single graphics
//! submission queue the rest of the renderer records against (plus the
//! present queue, which may be the same family). It also hosts the
//! gpu-allocator instance behind a mutex.
//!
//! Created once at startup and destroyed at shutdown, after all outstanding
//! GPU work has been drained.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Shared across the renderer via `Arc`. The internal allocator is behind a
/// `Mutex`; everything else is immutable after creation.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator.
    allocator: Mutex<Allocator>,
    /// Graphics (submission) queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle (may equal the graphics queue).
    present_queue: vk::Queue,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the logical device.
    ///
    /// Enables the swapchain extension, timeline semaphores (Vulkan 1.2)
    /// and dynamic rendering + synchronization2 (Vulkan 1.3), then
    /// initializes the gpu-allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialization
    /// fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = &physical_device_info.queue_families;

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "creating {} queue(s) for families {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_family = queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families
            .present_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("graphics queue retrieved from family {graphics_family}");

        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!("present queue retrieved from family {present_family}");

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: Mutex::new(allocator),
            graphics_queue,
            present_queue,
            queue_families: physical_device_info.queue_families,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics submission queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Blocks until all outstanding operations on all queues complete.
    ///
    /// Last-resort synchronization used only at teardown; everything in the
    /// frame path goes through the completion fence.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("logical device destroyed");
    }
}

// Safety: the raw handles are plain identifiers, and the allocator is
// behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
