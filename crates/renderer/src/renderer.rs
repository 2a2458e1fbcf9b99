//! The Vulkan frame host.
//!
//! Owns the whole GPU stack for one window: instance, device, swapchain,
//! depth buffer, pipeline, the frame recorder, and the completion fence.
//! Implements [`FrameHost`](crate::frame::FrameHost) so the frame loop can
//! drive it; everything here is mechanism, the loop owns the ordering.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use glint_platform::Surface;
use glint_rhi::{
    find_depth_format, select_physical_device, upload_bytes, Buffer, BufferKind, CommandRecorder,
    CompletionFence, Device, GpuImage, GpuUploadTarget, GpuUploader, GraphicsPipeline, Instance,
    PipelineDesc, ResourceStateTracker, RhiError, Semaphore, ShaderModule, Swapchain, UsageState,
    Vertex, WaitOutcome,
};
use thiserror::Error;
use tracing::info;
use winit::window::Window;

use crate::frame::FrameHost;

/// Bound on the synchronous vertex upload at startup.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// The demo triangle, one vertex per primary color.
const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

/// Renderer-level errors.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Graphics backend failure.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Windowing or IO failure.
    #[error(transparent)]
    Platform(#[from] glint_core::Error),
}

/// Renderer configuration.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Directory holding the compiled SPIR-V shader blobs.
    pub shader_dir: PathBuf,
    /// Whether to request the validation layer.
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            validation: cfg!(debug_assertions),
        }
    }
}

/// Vulkan renderer for a single fixed-size window.
///
/// Field order is drop order: everything holding an `Arc<Device>` comes
/// before `device`, and the surface drops before the instance.
pub struct Renderer {
    vertex_buffer: Buffer,
    pipeline: GraphicsPipeline,
    depth: GpuImage,
    swapchain: Swapchain,
    recorder: CommandRecorder,
    fence: CompletionFence,
    image_available: Semaphore,
    render_finished: Semaphore,
    tracker: ResourceStateTracker,
    timer: glint_core::Timer,
    closing: Arc<AtomicBool>,
    depth_initialized: bool,
    device: Arc<Device>,
    _surface: Surface,
    _instance: Instance,
}

impl Renderer {
    /// Brings up the full GPU stack for `window` and uploads the triangle.
    ///
    /// # Errors
    ///
    /// Any failure during bootstrap is fatal and propagates.
    pub fn new(
        window: &Window,
        closing: Arc<AtomicBool>,
        config: &RendererConfig,
    ) -> Result<Self, RendererError> {
        let instance = Instance::new(config.validation)?;
        let surface = Surface::new(instance.entry(), instance.handle(), window)?;

        let physical =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical)?;

        let mut tracker = ResourceStateTracker::new();

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            &mut tracker,
            surface.handle(),
            surface.loader(),
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        )?;

        let depth_format = find_depth_format(instance.handle(), device.physical_device())?;
        let depth = GpuImage::new_depth(
            device.clone(),
            &mut tracker,
            swapchain.extent(),
            depth_format,
            "depth buffer",
        )?;

        let vert_bytes = std::fs::read(config.shader_dir.join("triangle.vert.spv"))
            .map_err(glint_core::Error::from)?;
        let frag_bytes = std::fs::read(config.shader_dir.join("triangle.frag.spv"))
            .map_err(glint_core::Error::from)?;

        let vert = ShaderModule::from_spirv_bytes(device.clone(), &vert_bytes, "triangle.vert")?;
        let frag = ShaderModule::from_spirv_bytes(device.clone(), &frag_bytes, "triangle.frag")?;

        let pipeline = GraphicsPipeline::new(
            device.clone(),
            &vert,
            &frag,
            &PipelineDesc {
                color_format: swapchain.format(),
                depth_format: Some(depth_format),
            },
        )?;

        let vertex_data: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let vertex_buffer = Buffer::new(
            device.clone(),
            &mut tracker,
            BufferKind::Vertex,
            vertex_data.len() as u64,
            "triangle vertices",
        )?;

        {
            let mut uploader = GpuUploader::new(device.clone(), &mut tracker)?;
            let target = GpuUploadTarget::for_buffer(&vertex_buffer);
            upload_bytes(
                &mut uploader,
                vertex_data,
                &target,
                UsageState::VertexOrIndexInput,
                UPLOAD_TIMEOUT,
            )?;
        }
        info!("triangle vertices uploaded");

        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let recorder = CommandRecorder::new(device.clone(), graphics_family)?;

        let fence = CompletionFence::new(device.clone())?;
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;

        info!("renderer ready");

        Ok(Self {
            vertex_buffer,
            pipeline,
            depth,
            swapchain,
            recorder,
            fence,
            image_available,
            render_finished,
            tracker,
            timer: glint_core::Timer::new(),
            closing,
            depth_initialized: false,
            device,
            _surface: surface,
            _instance: instance,
        })
    }

    /// Clear color animated over elapsed time.
    fn clear_color(&self) -> [f32; 4] {
        let t = self.timer.elapsed_secs();
        let pulse = (t * 1.5).sin() * 0.5 + 0.5;
        [0.05 + 0.25 * pulse, 0.2, 0.4 - 0.2 * pulse, 1.0]
    }
}

impl FrameHost for Renderer {
    type Error = RendererError;

    fn poll_closing(&mut self) -> bool {
        self.closing.load(Ordering::Relaxed)
    }

    fn acquire_image(&mut self) -> Result<u32, Self::Error> {
        let index = self
            .swapchain
            .acquire_next_image(self.image_available.handle())?;
        Ok(index)
    }

    fn begin_recording(&mut self, retired: u64) -> Result<(), Self::Error> {
        self.recorder.reset(retired)?;
        self.recorder.open()?;
        Ok(())
    }

    fn record(&mut self, image_index: u32) -> Result<(), Self::Error> {
        let back_buffer = self.swapchain.resource_id(image_index);
        let image = self.swapchain.image(image_index);
        let extent = self.swapchain.extent();

        // Claim the back buffer from the presentation engine. The first
        // frame on each image discards the undefined initial layout.
        let discard = self.swapchain.take_first_use(image_index);
        let to_render =
            self.tracker
                .transition(back_buffer, UsageState::Present, UsageState::RenderTarget)?;
        self.recorder
            .image_barrier(&to_render, image, vk::ImageAspectFlags::COLOR, discard);

        if !self.depth_initialized {
            // Depth is tracked as DepthWrite from creation but the Vulkan
            // layout is still UNDEFINED; bridge the gap once.
            let init = self.tracker.activate(self.depth.resource_id())?;
            self.recorder
                .image_barrier(&init, self.depth.handle(), vk::ImageAspectFlags::DEPTH, true);
            self.depth_initialized = true;
        }

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(self.swapchain.view(image_index))
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color(),
                },
            })];

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth.view())
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        self.recorder.begin_rendering(&rendering_info);

        self.recorder.bind_pipeline(self.pipeline.handle());
        self.recorder.set_viewport(
            &vk::Viewport::default()
                .width(extent.width as f32)
                .height(extent.height as f32)
                .max_depth(1.0),
        );
        self.recorder.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        });
        self.recorder
            .bind_vertex_buffers(&[self.vertex_buffer.handle()], &[0]);
        self.recorder.draw(TRIANGLE.len() as u32, 1);

        self.recorder.end_rendering();

        // Hand the back buffer back to the presentation engine.
        let to_present =
            self.tracker
                .transition(back_buffer, UsageState::RenderTarget, UsageState::Present)?;
        self.recorder
            .image_barrier(&to_present, image, vk::ImageAspectFlags::COLOR, false);

        Ok(())
    }

    fn submit(&mut self) -> Result<u64, Self::Error> {
        self.recorder.close()?;

        let value = self.fence.next_signal_value();

        let wait_semaphores = [self.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.recorder.handle()];
        let signal_semaphores = [self.render_finished.handle(), self.fence.handle()];

        // Binary semaphore slots carry placeholder values; only the
        // timeline slot is meaningful.
        let wait_values = [0u64];
        let signal_values = [0u64, value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .handle()
                .queue_submit(
                    self.device.graphics_queue(),
                    &[submit_info],
                    vk::Fence::null(),
                )
                .map_err(RhiError::from)?;
        }

        self.recorder.mark_submitted(value);
        Ok(value)
    }

    fn present(&mut self, image_index: u32) -> Result<(), Self::Error> {
        self.swapchain
            .present(image_index, self.render_finished.handle())?;
        Ok(())
    }

    fn wait_until(&mut self, value: u64, timeout: Duration) -> Result<WaitOutcome, Self::Error> {
        let outcome = self.fence.wait_until(value, timeout)?;
        Ok(outcome)
    }

    fn signal(&mut self) -> Result<u64, Self::Error> {
        let value = self.fence.signal_on_queue(self.device.graphics_queue())?;
        Ok(value)
    }
}
