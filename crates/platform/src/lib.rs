//! Windowing and native surface glue.

pub mod surface;
pub mod window;

pub use surface::Surface;
pub use window::{build_window, WindowConfig};
