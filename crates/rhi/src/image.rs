//! GPU image management.
//!
//! Device-local 2D images created as copy destinations and filled through
//! the staging upload path, plus the depth attachment. [`PixelData`]
//! describes a CPU-side texel payload laid out mip-by-mip in a single
//! staging buffer.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::state::{ResourceId, ResourceStateTracker, UsageState};

/// CPU-side texel payload for an image upload.
///
/// Mip levels are stored tightly packed, largest first, in one contiguous
/// byte range.
#[derive(Clone, Debug)]
pub struct PixelData {
    /// Width of mip 0 in texels.
    pub width: u32,
    /// Height of mip 0 in texels.
    pub height: u32,
    /// Texel format of every mip.
    pub format: vk::Format,
    /// Number of mip levels present in the payload.
    pub mip_levels: u32,
}

impl PixelData {
    /// Bytes per texel for the formats the uploader accepts.
    ///
    /// # Errors
    ///
    /// Returns an error for block-compressed or otherwise unsupported
    /// formats.
    pub fn bytes_per_texel(&self) -> RhiResult<vk::DeviceSize> {
        match self.format {
            vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_UNORM => {
                Ok(4)
            }
            vk::Format::R8_UNORM => Ok(1),
            vk::Format::R16G16B16A16_SFLOAT => Ok(8),
            vk::Format::R32G32B32A32_SFLOAT => Ok(16),
            other => Err(RhiError::InvalidHandle(format!(
                "unsupported upload format {other:?}"
            ))),
        }
    }

    /// Total payload size across all mips, in bytes.
    pub fn total_size(&self) -> RhiResult<vk::DeviceSize> {
        let texel = self.bytes_per_texel()?;
        let mut size = 0;
        for mip in 0..self.mip_levels {
            let w = (self.width >> mip).max(1) as vk::DeviceSize;
            let h = (self.height >> mip).max(1) as vk::DeviceSize;
            size += w * h * texel;
        }
        Ok(size)
    }

    /// Buffer-to-image copy regions, one per mip, with buffer offsets
    /// matching the packed payload layout.
    pub fn copy_regions(&self) -> RhiResult<Vec<vk::BufferImageCopy>> {
        let texel = self.bytes_per_texel()?;
        let mut regions = Vec::with_capacity(self.mip_levels as usize);
        let mut offset: vk::DeviceSize = 0;

        for mip in 0..self.mip_levels {
            let w = (self.width >> mip).max(1);
            let h = (self.height >> mip).max(1);

            regions.push(
                vk::BufferImageCopy::default()
                    .buffer_offset(offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(mip)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: w,
                        height: h,
                        depth: 1,
                    }),
            );

            offset += w as vk::DeviceSize * h as vk::DeviceSize * texel;
        }

        Ok(regions)
    }
}

/// Device-local 2D image with an attached view and a tracked usage state.
pub struct GpuImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    aspect_mask: vk::ImageAspectFlags,
    resource_id: ResourceId,
}

impl GpuImage {
    /// Creates a sampled texture image, registered as a copy destination.
    ///
    /// The image starts in `UNDEFINED` layout; the first barrier recorded
    /// against it must use the discard path.
    ///
    /// # Errors
    ///
    /// Returns an error if image, memory, or view creation fails.
    pub fn new_texture(
        device: Arc<Device>,
        tracker: &mut ResourceStateTracker,
        pixels: &PixelData,
        label: &str,
    ) -> RhiResult<Self> {
        Self::new(
            device,
            tracker,
            vk::Extent2D {
                width: pixels.width,
                height: pixels.height,
            },
            pixels.format,
            pixels.mip_levels,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
            UsageState::CopyDestination,
            label,
        )
    }

    /// Creates the depth attachment, registered in the depth-write state.
    ///
    /// # Errors
    ///
    /// Returns an error if image, memory, or view creation fails.
    pub fn new_depth(
        device: Arc<Device>,
        tracker: &mut ResourceStateTracker,
        extent: vk::Extent2D,
        format: vk::Format,
        label: &str,
    ) -> RhiResult<Self> {
        Self::new(
            device,
            tracker,
            extent,
            format,
            1,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            UsageState::DepthWrite,
            label,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        device: Arc<Device>,
        tracker: &mut ResourceStateTracker,
        extent: vk::Extent2D,
        format: vk::Format,
        mip_levels: u32,
        usage: vk::ImageUsageFlags,
        aspect_mask: vk::ImageAspectFlags,
        initial_state: UsageState,
        label: &str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "image extent must be non-zero".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { device.handle().create_image_view(&view_info, None)? };

        let resource_id = tracker.register(label, initial_state);

        debug!(
            "created image '{}': {}x{}, {:?}, {} mip(s)",
            label, extent.width, extent.height, format, mip_levels
        );

        Ok(Self {
            device,
            image,
            view,
            allocation: Some(allocation),
            format,
            extent,
            mip_levels,
            aspect_mask,
            resource_id,
        })
    }

    /// Raw Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Image view handle.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Texel format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Mip level count.
    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Aspect mask used for barriers against this image.
    #[inline]
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    /// State-tracker id of this image.
    #[inline]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("failed to free image allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }

        debug!("destroyed image");
    }
}

/// Picks a supported depth format, preferring higher precision.
///
/// # Errors
///
/// Returns an error if no candidate format supports depth attachment with
/// optimal tiling.
pub fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> RhiResult<vk::Format> {
    const CANDIDATES: &[vk::Format] = &[
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];

    for &format in CANDIDATES {
        let props =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return Ok(format);
        }
    }

    Err(RhiError::NoSuitableGpu)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(width: u32, height: u32, mip_levels: u32) -> PixelData {
        PixelData {
            width,
            height,
            format: vk::Format::R8G8B8A8_UNORM,
            mip_levels,
        }
    }

    #[test]
    fn test_total_size_single_mip() {
        let pixels = rgba(64, 32, 1);
        assert_eq!(pixels.total_size().unwrap(), 64 * 32 * 4);
    }

    #[test]
    fn test_total_size_mip_chain() {
        let pixels = rgba(4, 4, 3);
        // 4x4 + 2x2 + 1x1 texels, 4 bytes each
        assert_eq!(pixels.total_size().unwrap(), (16 + 4 + 1) * 4);
    }

    #[test]
    fn test_copy_regions_offsets_and_extents() {
        let pixels = rgba(8, 4, 2);
        let regions = pixels.copy_regions().unwrap();
        assert_eq!(regions.len(), 2);

        assert_eq!(regions[0].buffer_offset, 0);
        assert_eq!(regions[0].image_extent.width, 8);
        assert_eq!(regions[0].image_extent.height, 4);
        assert_eq!(regions[0].image_subresource.mip_level, 0);

        assert_eq!(regions[1].buffer_offset, 8 * 4 * 4);
        assert_eq!(regions[1].image_extent.width, 4);
        assert_eq!(regions[1].image_extent.height, 2);
        assert_eq!(regions[1].image_subresource.mip_level, 1);
    }

    #[test]
    fn test_mip_extents_clamp_to_one() {
        let pixels = rgba(4, 1, 3);
        let regions = pixels.copy_regions().unwrap();
        assert_eq!(regions[2].image_extent.width, 1);
        assert_eq!(regions[2].image_extent.height, 1);
    }

    #[test]
    fn test_unsupported_format_rejected() {
        let pixels = PixelData {
            width: 4,
            height: 4,
            format: vk::Format::BC7_UNORM_BLOCK,
            mip_levels: 1,
        };
        assert!(pixels.bytes_per_texel().is_err());
    }
}
