//! Graphics pipeline creation.
//!
//! One dynamic-rendering pipeline: vertex + fragment stages, the packed
//! vertex format, optional depth test, dynamic viewport and scissor. No
//! render pass objects; attachment formats are baked into the pipeline via
//! `VkPipelineRenderingCreateInfo`.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::ShaderModule;
use crate::vertex::Vertex;

/// Attachment formats and depth behavior for pipeline creation.
#[derive(Clone, Copy, Debug)]
pub struct PipelineDesc {
    /// Color attachment format (the swapchain format).
    pub color_format: vk::Format,
    /// Depth attachment format, if depth testing is wanted.
    pub depth_format: Option<vk::Format>,
}

/// Graphics pipeline with its layout.
pub struct GraphicsPipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Builds the pipeline from vertex and fragment modules.
    ///
    /// # Errors
    ///
    /// Returns an error if layout or pipeline creation fails.
    pub fn new(
        device: Arc<Device>,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        desc: &PipelineDesc,
    ) -> RhiResult<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe {
            device
                .handle()
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| RhiError::PipelineError(format!("layout creation failed: {e}")))?
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.handle())
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.handle())
                .name(c"main"),
        ];

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_format.is_some())
            .depth_compare_op(vk::CompareOp::LESS);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [desc.color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = desc.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let result = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };
        let pipelines = match result {
            Ok(pipelines) => pipelines,
            Err((_, e)) => {
                // The layout is not owned by anything yet on this path.
                unsafe { device.handle().destroy_pipeline_layout(layout, None) };
                return Err(RhiError::PipelineError(format!(
                    "pipeline creation failed: {e}"
                )));
            }
        };

        info!("graphics pipeline created");

        Ok(Self {
            device,
            pipeline: pipelines[0],
            layout,
        })
    }

    /// Raw pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout handle.
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        info!("graphics pipeline destroyed");
    }
}
