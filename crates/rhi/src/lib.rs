//! Vulkan rendering hardware interface.
//!
//! Thin, explicitly synchronized wrappers over ash: instance and device
//! bootstrap, the timeline-based completion fence, resource usage-state
//! tracking with validated barriers, fence-gated command recording, staged
//! uploads, and the presentation swapchain.
//!
//! Synchronization model in one paragraph: the host learns about GPU
//! progress only through the [`CompletionFence`]; command allocators are
//! reused only after their last submission's fence value retires; every
//! resource use is preceded by a tracker-validated state transition; and
//! staging memory outlives the copy that reads it, enforced by the same
//! fence.

pub mod buffer;
pub mod command;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod state;
pub mod swapchain;
pub mod sync;
pub mod timeline;
pub mod upload;
pub mod vertex;

pub use buffer::{Buffer, BufferKind};
pub use command::{CommandRecorder, RecorderState, SubmissionGate};
pub use device::Device;
pub use error::{RhiError, RhiResult};
pub use image::{find_depth_format, GpuImage, PixelData};
pub use instance::Instance;
pub use physical_device::{select_physical_device, PhysicalDeviceInfo, QueueFamilyIndices};
pub use pipeline::{GraphicsPipeline, PipelineDesc};
pub use shader::ShaderModule;
pub use state::{ResourceId, ResourceStateTracker, Transition, UsageState};
pub use swapchain::{Swapchain, PREFERRED_IMAGE_COUNT};
pub use sync::Semaphore;
pub use timeline::{CompletionFence, WaitOutcome};
pub use upload::{upload_bytes, GpuUploadTarget, GpuUploader, UploadBackend};
pub use vertex::Vertex;

// Re-exported so downstream crates name Vulkan types without depending on
// ash directly.
pub use ash;
