//! Frame sequencing and the Vulkan renderer.

pub mod frame;
pub mod renderer;

pub use frame::{FrameError, FrameHost, FrameLoop, DRAIN_TIMEOUT, FRAME_WAIT_TIMEOUT};
pub use renderer::{Renderer, RendererConfig, RendererError};
