//! Presentation surface (swapchain) management.
//!
//! A fixed-size, non-resizing swapchain with a preferred depth of two
//! images. Back buffers are registered with the state tracker in the
//! `Present` state; each carries a first-use flag so the initial
//! `UNDEFINED`-layout transition can be recorded as a discard.
//!
//! Acquire and present use per-call binary semaphores supplied by the
//! caller; host-side completion is the completion fence's job and never
//! flows through here.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::state::{ResourceId, ResourceStateTracker, UsageState};

/// Preferred number of back buffers.
pub const PREFERRED_IMAGE_COUNT: u32 = 2;

/// Swapchain wrapper owning the images, views, and their tracked states.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    ids: Vec<ResourceId>,
    first_use: Vec<bool>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates the swapchain for a surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface reports no formats or swapchain
    /// creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        tracker: &mut ResourceStateTracker,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        window_extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let physical_device = device.physical_device();

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        if formats.is_empty() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats".to_string(),
            ));
        }

        let format = choose_surface_format(&formats);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = clamp_image_count(
            PREFERRED_IMAGE_COUNT,
            capabilities.min_image_count,
            capabilities.max_image_count,
        );

        debug!(
            "swapchain: {}x{}, {:?}, {} image(s) requested",
            extent.width, extent.height, format.format, image_count
        );

        let queue_families = device.queue_families();
        let graphics_family = queue_families.graphics_family.ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families.present_family.ok_or(RhiError::NoSuitableGpu)?;
        let family_indices = [graphics_family, present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            // FIFO is always available and paces presentation to vblank.
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        create_info = if graphics_family != present_family {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

        let images = unsafe { loader.get_swapchain_images(swapchain)? };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            views.push(unsafe { device.handle().create_image_view(&view_info, None)? });
        }

        // Back buffers belong to the presentation engine until a frame
        // claims them.
        let ids: Vec<ResourceId> = (0..images.len())
            .map(|i| tracker.register(format!("back buffer {i}"), UsageState::Present))
            .collect();
        let first_use = vec![true; images.len()];

        info!(
            "swapchain created with {} image(s) at {}x{}",
            images.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            views,
            ids,
            first_use,
            format,
            extent,
        })
    }

    /// Acquires the next back buffer, signaling `semaphore` when the
    /// presentation engine releases it.
    ///
    /// # Errors
    ///
    /// A surface that has become out of date is an error here; the
    /// fixed-size design never recreates the swapchain.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<u32> {
        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )?
        };
        if suboptimal {
            debug!("acquired suboptimal swapchain image {index}");
        }
        Ok(index)
    }

    /// Queues presentation of a back buffer after `wait_semaphore`.
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<()> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let suboptimal = unsafe {
            self.loader
                .queue_present(self.device.present_queue(), &present_info)?
        };
        if suboptimal {
            debug!("present reported suboptimal swapchain");
        }
        Ok(())
    }

    /// Consumes the first-use flag for a back buffer.
    ///
    /// Returns `true` exactly once per image: the first transition recorded
    /// against it must discard the undefined initial layout.
    pub fn take_first_use(&mut self, image_index: u32) -> bool {
        let flag = &mut self.first_use[image_index as usize];
        std::mem::replace(flag, false)
    }

    /// Raw image handle of a back buffer.
    #[inline]
    pub fn image(&self, image_index: u32) -> vk::Image {
        self.images[image_index as usize]
    }

    /// Image view of a back buffer.
    #[inline]
    pub fn view(&self, image_index: u32) -> vk::ImageView {
        self.views[image_index as usize]
    }

    /// State-tracker id of a back buffer.
    #[inline]
    pub fn resource_id(&self, image_index: u32) -> ResourceId {
        self.ids[image_index as usize]
    }

    /// Number of back buffers actually created.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Surface format in use.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        info!("swapchain destroyed");
    }
}

/// Prefers an sRGB BGRA format, falling back to the first reported one.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

/// Resolves the swapchain extent from surface capabilities.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    // current_extent == u32::MAX means the surface lets the swapchain pick.
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Clamps the preferred image count to the surface's supported range.
///
/// A max of zero means unbounded.
fn clamp_image_count(preferred: u32, min: u32, max: u32) -> u32 {
    let count = preferred.max(min);
    if max > 0 {
        count.min(max)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_image_count() {
        assert_eq!(clamp_image_count(2, 2, 8), 2);
        assert_eq!(clamp_image_count(2, 3, 8), 3);
        assert_eq!(clamp_image_count(2, 1, 0), 2);
        assert_eq!(clamp_image_count(8, 1, 3), 3);
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_choose_extent_clamps_to_capabilities() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 4000,
                height: 50,
            },
        );
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 100);
    }
}
