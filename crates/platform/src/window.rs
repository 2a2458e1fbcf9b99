//! Window creation.
//!
//! The renderer draws into a fixed-size, non-resizable window; swapchain
//! recreation on resize is out of scope, so the window is simply not allowed
//! to resize.

use glint_core::{Error, Result};
use tracing::info;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

/// Window configuration.
#[derive(Clone, Debug)]
pub struct WindowConfig {
    /// Title bar text.
    pub title: String,
    /// Client area width in physical pixels.
    pub width: u32,
    /// Client area height in physical pixels.
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "glint".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Creates the window from an active event loop.
///
/// # Errors
///
/// Returns [`Error::Window`] if the platform refuses the window.
pub fn build_window(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Window> {
    let attributes = WindowAttributes::default()
        .with_title(config.title.clone())
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .with_resizable(false);

    let window = event_loop
        .create_window(attributes)
        .map_err(|e| Error::Window(e.to_string()))?;

    info!(
        "window created: '{}' {}x{}",
        config.title, config.width, config.height
    );

    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WindowConfig::default();
        assert!(config.width > 0);
        assert!(config.height > 0);
    }
}
