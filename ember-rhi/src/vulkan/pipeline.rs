//! Graphics and compute pipelines, plus the vertex input layout resource.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::error::{Result, RhiError};
use crate::types::{PrimitiveTopology, ShaderStage, VertexAttributeDesc};

use super::bindings::BindingLayoutHandle;
use super::convert;
use super::render_pass::RenderPassHandle;
use super::shader::ShaderHandle;
use super::VulkanContext;

/// Vertex attribute list resolved to Vulkan binding/attribute descriptions.
pub struct InputLayout {
    pub attributes: Vec<VertexAttributeDesc>,
    pub(crate) bindings: Vec<vk::VertexInputBindingDescription>,
    pub(crate) vk_attributes: Vec<vk::VertexInputAttributeDescription>,
}

pub type InputLayoutHandle = Arc<InputLayout>;

pub(crate) fn create_input_layout(attributes: Vec<VertexAttributeDesc>) -> InputLayoutHandle {
    let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
    let mut vk_attributes = Vec::with_capacity(attributes.len());

    for (location, attribute) in attributes.iter().enumerate() {
        if !bindings
            .iter()
            .any(|binding| binding.binding == attribute.buffer_index)
        {
            bindings.push(
                vk::VertexInputBindingDescription::default()
                    .binding(attribute.buffer_index)
                    .stride(attribute.element_stride)
                    .input_rate(if attribute.is_instanced {
                        vk::VertexInputRate::INSTANCE
                    } else {
                        vk::VertexInputRate::VERTEX
                    }),
            );
        }

        vk_attributes.push(
            vk::VertexInputAttributeDescription::default()
                .location(location as u32)
                .binding(attribute.buffer_index)
                .format(convert::format_to_vk(attribute.format))
                .offset(attribute.offset),
        );
    }

    Arc::new(InputLayout {
        attributes,
        bindings,
        vk_attributes,
    })
}

impl std::fmt::Debug for InputLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputLayout")
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub primitive_topology: PrimitiveTopology,
    pub use_depth_test: bool,
    pub use_blending: bool,
    pub use_dynamic_scissor: bool,
    pub vertex_push_constant_size: u32,
    pub fragment_push_constant_size: u32,
    pub input_layout: Option<InputLayoutHandle>,
    pub binding_layout: Option<BindingLayoutHandle>,
    pub render_pass: RenderPassHandle,
    pub vertex_shader: ShaderHandle,
    pub fragment_shader: Option<ShaderHandle>,
    pub geometry_shader: Option<ShaderHandle>,
}

pub struct GraphicsPipeline {
    context: Arc<VulkanContext>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) push_constant_stages: vk::ShaderStageFlags,
    pub desc: GraphicsPipelineDesc,
}

pub type GraphicsPipelineHandle = Arc<GraphicsPipeline>;

fn stage_create_info<'a>(
    shader: &'a ShaderHandle,
    entry: &'a CString,
    stage: ShaderStage,
) -> vk::PipelineShaderStageCreateInfo<'a> {
    // Every stage binds its own module.
    vk::PipelineShaderStageCreateInfo::default()
        .stage(convert::shader_stage_to_vk(stage))
        .module(shader.module)
        .name(entry)
}

pub(crate) fn create_graphics_pipeline(
    context: &Arc<VulkanContext>,
    desc: GraphicsPipelineDesc,
) -> Result<GraphicsPipelineHandle> {
    let vertex_entry = CString::new(desc.vertex_shader.desc.entry.as_str())
        .map_err(|_| RhiError::InvalidArgument("shader entry point contains NUL"))?;
    let fragment_entry = match &desc.fragment_shader {
        Some(shader) => Some(
            CString::new(shader.desc.entry.as_str())
                .map_err(|_| RhiError::InvalidArgument("shader entry point contains NUL"))?,
        ),
        None => None,
    };
    let geometry_entry = match &desc.geometry_shader {
        Some(shader) => Some(
            CString::new(shader.desc.entry.as_str())
                .map_err(|_| RhiError::InvalidArgument("shader entry point contains NUL"))?,
        ),
        None => None,
    };

    let mut stages = Vec::with_capacity(3);
    stages.push(stage_create_info(
        &desc.vertex_shader,
        &vertex_entry,
        ShaderStage::Vertex,
    ));
    if let (Some(shader), Some(entry)) = (&desc.fragment_shader, &fragment_entry) {
        stages.push(stage_create_info(shader, entry, ShaderStage::Fragment));
    }
    if let (Some(shader), Some(entry)) = (&desc.geometry_shader, &geometry_entry) {
        stages.push(stage_create_info(shader, entry, ShaderStage::Geometry));
    }

    let empty_bindings: &[vk::VertexInputBindingDescription] = &[];
    let empty_attributes: &[vk::VertexInputAttributeDescription] = &[];
    let (bindings, attributes) = match &desc.input_layout {
        Some(layout) => (layout.bindings.as_slice(), layout.vk_attributes.as_slice()),
        None => (empty_bindings, empty_attributes),
    };
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(bindings)
        .vertex_attribute_descriptions(attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert::topology_to_vk(desc.primitive_topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let blend_attachment = if desc.use_blending {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    };
    let blend_attachments = [blend_attachment];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let depth_stencil = if desc.use_depth_test {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
    } else {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .stencil_test_enable(false)
    };

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let mut push_constant_ranges = Vec::new();
    let mut push_constant_stages = vk::ShaderStageFlags::empty();
    if desc.vertex_push_constant_size > 0 {
        push_constant_ranges.push(
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::VERTEX)
                .offset(0)
                .size(desc.vertex_push_constant_size),
        );
        push_constant_stages |= vk::ShaderStageFlags::VERTEX;
    }
    if desc.fragment_push_constant_size > 0 {
        push_constant_ranges.push(
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                .offset(0)
                .size(desc.fragment_push_constant_size),
        );
        push_constant_stages |= vk::ShaderStageFlags::FRAGMENT;
    }

    let set_layouts: Vec<vk::DescriptorSetLayout> = desc
        .binding_layout
        .iter()
        .map(|layout| layout.layout)
        .collect();

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    let pipeline_layout = unsafe { context.device.create_pipeline_layout(&layout_info, None)? };

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .depth_stencil_state(&depth_stencil)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(desc.render_pass.render_pass)
        .subpass(0);

    let pipelines = unsafe {
        context
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };
    let pipelines = match pipelines {
        Ok(pipelines) => pipelines,
        Err((_, err)) => {
            unsafe { context.device.destroy_pipeline_layout(pipeline_layout, None) };
            return Err(err.into());
        }
    };

    Ok(Arc::new(GraphicsPipeline {
        context: Arc::clone(context),
        pipeline: pipelines[0],
        pipeline_layout,
        push_constant_stages,
        desc,
    }))
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.pipeline, None);
            self.context
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ComputePipelineDesc {
    pub shader: ShaderHandle,
    pub binding_layout: Option<BindingLayoutHandle>,
    pub push_constant_size: u32,
}

pub struct ComputePipeline {
    context: Arc<VulkanContext>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub desc: ComputePipelineDesc,
}

pub type ComputePipelineHandle = Arc<ComputePipeline>;

pub(crate) fn create_compute_pipeline(
    context: &Arc<VulkanContext>,
    desc: ComputePipelineDesc,
) -> Result<ComputePipelineHandle> {
    let entry = CString::new(desc.shader.desc.entry.as_str())
        .map_err(|_| RhiError::InvalidArgument("shader entry point contains NUL"))?;

    let set_layouts: Vec<vk::DescriptorSetLayout> = desc
        .binding_layout
        .iter()
        .map(|layout| layout.layout)
        .collect();

    let mut push_constant_ranges = Vec::new();
    if desc.push_constant_size > 0 {
        push_constant_ranges.push(
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(desc.push_constant_size),
        );
    }

    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    let pipeline_layout = unsafe { context.device.create_pipeline_layout(&layout_info, None)? };

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(desc.shader.module)
        .name(&entry);

    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(pipeline_layout);

    let pipelines = unsafe {
        context
            .device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };
    let pipelines = match pipelines {
        Ok(pipelines) => pipelines,
        Err((_, err)) => {
            unsafe { context.device.destroy_pipeline_layout(pipeline_layout, None) };
            return Err(err.into());
        }
    };

    Ok(Arc::new(ComputePipeline {
        context: Arc::clone(context),
        pipeline: pipelines[0],
        pipeline_layout,
        desc,
    }))
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.pipeline, None);
            self.context
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
        }
    }
}

impl std::fmt::Debug for ComputePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipeline").finish_non_exhaustive()
    }
}
