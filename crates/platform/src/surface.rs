//! Native Vulkan surface creation.

use ash::vk;
use glint_core::{Error, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;
use winit::window::Window;

/// Vulkan surface bound to a window.
///
/// Must be dropped before the instance it was created from.
pub struct Surface {
    loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Creates a surface for the given window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Surface`] if the window's native handles are
    /// unavailable or surface creation fails.
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, window: &Window) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| Error::Surface(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| Error::Surface(e.to_string()))?;

        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(e.to_string()))?
        };

        let loader = ash::khr::surface::Instance::new(entry, instance);

        info!("Vulkan surface created");

        Ok(Self { loader, surface })
    }

    /// Raw surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader, for capability queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
        info!("Vulkan surface destroyed");
    }
}
