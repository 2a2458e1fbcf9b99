//! Physical device (GPU) selection.
//!
//! Enumerates adapters and picks one that can drive the frame pipeline:
//! graphics + present queue families, swapchain support, and the timeline
//! semaphore and dynamic rendering features the renderer depends on.
//! Discrete GPUs are preferred over integrated ones.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Queue family indices for the operations the renderer needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics (and transfer).
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to the surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks if the minimum required queue families are available.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the unique queue family indices.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family {
            if !families.contains(&present) {
                families.push(present);
            }
        }
        families
    }
}

/// Information about a selected physical device.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Queue family indices.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable physical device for rendering.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no adapter provides the required
/// queues, extensions, and features.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("no Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("found {} GPU(s)", devices.len());

    let mut suitable: Vec<(PhysicalDeviceInfo, u32)> = Vec::new();

    for device in devices {
        if let Some(info) = check_suitability(instance, device, surface, surface_loader) {
            let score = rate_device(&info);
            debug!(
                "GPU '{}' ({}) - score {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            suitable.push((info, score));
        }
    }

    if suitable.is_empty() {
        warn!("no GPU with required queues and features");
        return Err(RhiError::NoSuitableGpu);
    }

    suitable.sort_by(|a, b| b.1.cmp(&a.1));
    let (selected, score) = suitable.remove(0);

    info!(
        "selected GPU '{}' ({}), score {}",
        selected.device_name(),
        selected.device_type_name(),
        score
    );

    Ok(selected)
}

/// Checks whether a device has the queues, extensions, and features the
/// frame pipeline needs. Returns its info when suitable.
fn check_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        return None;
    }

    if !supports_swapchain_extension(instance, device) {
        return None;
    }

    // Timeline semaphores (1.2) and dynamic rendering (1.3) are the two
    // features the frame pipeline is built on.
    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features2) };

    if features_1_2.timeline_semaphore != vk::TRUE {
        debug!("skipping {:?}: no timeline semaphore support", properties.device_type);
        return None;
    }
    if features_1_3.dynamic_rendering != vk::TRUE {
        debug!("skipping {:?}: no dynamic rendering support", properties.device_type);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        queue_families,
    })
}

/// Finds graphics and present queue families for a device.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };

    for (i, family) in families.iter().enumerate() {
        let index = i as u32;

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(index);
        }

        if indices.present_family.is_none() {
            let supports_present = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            };
            if supports_present {
                indices.present_family = Some(index);
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// Checks that the swapchain device extension is available.
fn supports_swapchain_extension(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let extensions = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(extensions) => extensions,
        Err(_) => return false,
    };

    let wanted = ash::khr::swapchain::NAME.to_bytes_with_nul();
    extensions.iter().any(|ext| {
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name.to_bytes_with_nul() == wanted
    })
}

/// Scores a device; higher is better.
fn rate_device(info: &PhysicalDeviceInfo) -> u32 {
    let mut score = 0;

    score += match info.properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 10,
    };

    // Fewer queue-family hops is marginally better.
    if info.queue_families.graphics_family == info.queue_families.present_family {
        score += 10;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_queue_families() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());

        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_unique_families_deduplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0]);

        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }
}
