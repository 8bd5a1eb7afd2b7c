//! Conversions from RHI vocabulary to Vulkan enums, including the resource
//! state table the barrier tracker is built on.

use ash::vk;

use crate::format::Format;
use crate::types::{
    AddressMode, BorderColor, CompareOp, FilterMode, PrimitiveTopology, ResourceStates,
    ShaderStage, ShaderStageFlags, TextureDimension,
};

/// Backend triple one resource state maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStateMapping {
    pub stage_flags: vk::PipelineStageFlags,
    pub access_mask: vk::AccessFlags,
    pub image_layout: vk::ImageLayout,
}

const RESOURCE_STATE_MAP: &[(ResourceStates, ResourceStateMapping)] = &[
    (
        ResourceStates::COMMON,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::TOP_OF_PIPE,
            access_mask: vk::AccessFlags::empty(),
            image_layout: vk::ImageLayout::UNDEFINED,
        },
    ),
    (
        ResourceStates::CONSTANT_BUFFER,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::UNIFORM_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
    ),
    (
        ResourceStates::VERTEX_BUFFER,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::VERTEX_INPUT,
            access_mask: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
    ),
    (
        ResourceStates::INDEX_BUFFER,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::VERTEX_INPUT,
            access_mask: vk::AccessFlags::INDEX_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
    ),
    (
        ResourceStates::INDIRECT_ARGUMENT,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::DRAW_INDIRECT,
            access_mask: vk::AccessFlags::INDIRECT_COMMAND_READ,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
    ),
    (
        ResourceStates::SHADER_RESOURCE,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::SHADER_READ,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
    ),
    (
        ResourceStates::UNORDERED_ACCESS,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::from_raw(
                vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::SHADER_WRITE.as_raw(),
            ),
            image_layout: vk::ImageLayout::GENERAL,
        },
    ),
    (
        ResourceStates::RENDER_TARGET,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            access_mask: vk::AccessFlags::from_raw(
                vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw(),
            ),
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
    ),
    (
        ResourceStates::DEPTH_WRITE,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            access_mask: vk::AccessFlags::from_raw(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
            ),
            image_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
    ),
    (
        ResourceStates::DEPTH_READ,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
            ),
            access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            image_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
    ),
    (
        ResourceStates::STREAM_OUT,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::TRANSFORM_FEEDBACK_EXT,
            access_mask: vk::AccessFlags::TRANSFORM_FEEDBACK_WRITE_EXT,
            image_layout: vk::ImageLayout::UNDEFINED,
        },
    ),
    (
        ResourceStates::COPY_DEST,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::TRANSFER,
            access_mask: vk::AccessFlags::TRANSFER_WRITE,
            image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
    ),
    (
        ResourceStates::COPY_SOURCE,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::TRANSFER,
            access_mask: vk::AccessFlags::TRANSFER_READ,
            image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        },
    ),
    (
        ResourceStates::RESOLVE_DEST,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::TRANSFER,
            access_mask: vk::AccessFlags::TRANSFER_WRITE,
            image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
    ),
    (
        ResourceStates::RESOLVE_SOURCE,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::TRANSFER,
            access_mask: vk::AccessFlags::TRANSFER_READ,
            image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        },
    ),
    (
        ResourceStates::PRESENT,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::ALL_COMMANDS,
            access_mask: vk::AccessFlags::MEMORY_READ,
            image_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
    ),
    (
        ResourceStates::SHADING_RATE_SURFACE,
        ResourceStateMapping {
            stage_flags: vk::PipelineStageFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_KHR,
            access_mask: vk::AccessFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR,
            image_layout: vk::ImageLayout::FRAGMENT_SHADING_RATE_ATTACHMENT_OPTIMAL_KHR,
        },
    ),
];

/// Folds every set state bit into one combined (stage, access, layout). When
/// several bits carry a layout, the last non-undefined one wins; the tracker
/// only combines layout-compatible bits.
pub fn convert_resource_state(state: ResourceStates) -> ResourceStateMapping {
    let mut result = ResourceStateMapping {
        stage_flags: vk::PipelineStageFlags::empty(),
        access_mask: vk::AccessFlags::empty(),
        image_layout: vk::ImageLayout::UNDEFINED,
    };

    for (bit, mapping) in RESOURCE_STATE_MAP {
        if state.contains(*bit) {
            result.stage_flags |= mapping.stage_flags;
            result.access_mask |= mapping.access_mask;
            if mapping.image_layout != vk::ImageLayout::UNDEFINED {
                result.image_layout = mapping.image_layout;
            }
        }
    }

    if result.stage_flags.is_empty() {
        result.stage_flags = vk::PipelineStageFlags::TOP_OF_PIPE;
    }

    result
}

pub fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8Snorm => vk::Format::R8_SNORM,
        Format::R8Uint => vk::Format::R8_UINT,
        Format::R8Sint => vk::Format::R8_SINT,
        Format::Rg8Unorm => vk::Format::R8G8_UNORM,
        Format::Rg8Uint => vk::Format::R8G8_UINT,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::R16Unorm => vk::Format::R16_UNORM,
        Format::R16Uint => vk::Format::R16_UINT,
        Format::R16Sint => vk::Format::R16_SINT,
        Format::Rg16Float => vk::Format::R16G16_SFLOAT,
        Format::Rg16Unorm => vk::Format::R16G16_UNORM,
        Format::Rg16Uint => vk::Format::R16G16_UINT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Sint => vk::Format::R32_SINT,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Format::Rgba8Snorm => vk::Format::R8G8B8A8_SNORM,
        Format::Rgba8Uint => vk::Format::R8G8B8A8_UINT,
        Format::Rgba8Sint => vk::Format::R8G8B8A8_SINT,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Rgba16Unorm => vk::Format::R16G16B16A16_UNORM,
        Format::Rgba16Uint => vk::Format::R16G16B16A16_UINT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::Rg32Uint => vk::Format::R32G32_UINT,
        Format::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        Format::Rgb32Uint => vk::Format::R32G32B32_UINT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        Format::Rgba32Sint => vk::Format::R32G32B32A32_SINT,
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        Format::D32Float => vk::Format::D32_SFLOAT,
    }
}

pub fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8UnormSrgb,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        vk::Format::D32_SFLOAT => Format::D32Float,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        vk::Format::D16_UNORM => Format::D16Unorm,
        _ => Format::Unknown,
    }
}

/// Aspect flags inferred from the format alone: depth and/or stencil when the
/// format carries them, color otherwise.
pub fn image_aspect_flags(format: Format) -> vk::ImageAspectFlags {
    let info = format.info();
    let mut flags = vk::ImageAspectFlags::empty();
    if info.has_depth {
        flags |= vk::ImageAspectFlags::DEPTH;
    }
    if info.has_stencil {
        flags |= vk::ImageAspectFlags::STENCIL;
    }
    if flags.is_empty() {
        flags = vk::ImageAspectFlags::COLOR;
    }
    flags
}

pub fn image_type(dimension: TextureDimension) -> vk::ImageType {
    match dimension {
        TextureDimension::D1 | TextureDimension::D1Array => vk::ImageType::TYPE_1D,
        TextureDimension::D3 => vk::ImageType::TYPE_3D,
        _ => vk::ImageType::TYPE_2D,
    }
}

pub fn image_view_type(dimension: TextureDimension) -> vk::ImageViewType {
    match dimension {
        TextureDimension::D1 => vk::ImageViewType::TYPE_1D,
        TextureDimension::D1Array => vk::ImageViewType::TYPE_1D_ARRAY,
        TextureDimension::D2 | TextureDimension::D2Ms => vk::ImageViewType::TYPE_2D,
        TextureDimension::D2Array | TextureDimension::D2MsArray => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureDimension::Cube => vk::ImageViewType::CUBE,
        TextureDimension::CubeArray => vk::ImageViewType::CUBE_ARRAY,
        TextureDimension::D3 => vk::ImageViewType::TYPE_3D,
    }
}

pub fn image_create_flags(dimension: TextureDimension) -> vk::ImageCreateFlags {
    match dimension {
        TextureDimension::Cube | TextureDimension::CubeArray => {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        }
        _ => vk::ImageCreateFlags::empty(),
    }
}

pub fn sample_count_to_vk(sample_count: u32) -> vk::SampleCountFlags {
    match sample_count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

pub fn shader_stage_to_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn shader_stage_flags_to_vk(flags: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if flags.contains(ShaderStageFlags::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if flags.contains(ShaderStageFlags::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if flags.contains(ShaderStageFlags::GEOMETRY) {
        result |= vk::ShaderStageFlags::GEOMETRY;
    }
    if flags.contains(ShaderStageFlags::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }
    result
}

pub fn topology_to_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub fn filter_to_vk(filter: FilterMode) -> vk::Filter {
    match filter {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn mipmap_mode_to_vk(filter: FilterMode) -> vk::SamplerMipmapMode {
    match filter {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn address_mode_to_vk(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn border_color_to_vk(color: BorderColor) -> vk::BorderColor {
    match color {
        BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        BorderColor::OpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        BorderColor::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    }
}

pub fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_dest_maps_to_transfer_write() {
        let mapping = convert_resource_state(ResourceStates::COPY_DEST);
        assert_eq!(mapping.stage_flags, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(mapping.access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(mapping.image_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn combined_buffer_states_accumulate() {
        let mapping = convert_resource_state(
            ResourceStates::VERTEX_BUFFER | ResourceStates::INDEX_BUFFER,
        );
        assert_eq!(mapping.stage_flags, vk::PipelineStageFlags::VERTEX_INPUT);
        assert!(mapping
            .access_mask
            .contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ));
        assert_eq!(mapping.image_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn unknown_state_stays_at_top_of_pipe() {
        let mapping = convert_resource_state(ResourceStates::UNKNOWN);
        assert_eq!(mapping.stage_flags, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(mapping.access_mask, vk::AccessFlags::empty());
        assert_eq!(mapping.image_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn depth_aspect_inference() {
        assert_eq!(
            image_aspect_flags(Format::D32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            image_aspect_flags(Format::D24UnormS8Uint),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            image_aspect_flags(Format::Rgba8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }
}
