//! Shared foundation for the glint renderer.
//!
//! Logging setup, the platform-level error type, and the frame timer live
//! here so every other crate can depend on them without pulling in any
//! graphics code.

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
