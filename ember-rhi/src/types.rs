//! Backend-agnostic descriptor and state vocabulary shared by the whole RHI.

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::format::Format;

/// Queues a command list can be recorded for and submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandQueue {
    Graphics = 0,
    Present = 1,
    Compute = 2,
}

pub const COMMAND_QUEUE_COUNT: usize = 3;

impl CommandQueue {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u64) -> CommandQueue {
        match index {
            0 => CommandQueue::Graphics,
            1 => CommandQueue::Present,
            _ => CommandQueue::Compute,
        }
    }
}

/// Host access mode requested for a buffer at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuAccessMode {
    #[default]
    None,
    Read,
    Write,
}

bitflags::bitflags! {
    /// Logical resource states used by the automatic barrier tracker.
    /// Each bit maps to a (pipeline stage, access mask, image layout) triple.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 1 << 0;
        const CONSTANT_BUFFER = 1 << 1;
        const VERTEX_BUFFER = 1 << 2;
        const INDEX_BUFFER = 1 << 3;
        const INDIRECT_ARGUMENT = 1 << 4;
        const SHADER_RESOURCE = 1 << 5;
        const UNORDERED_ACCESS = 1 << 6;
        const RENDER_TARGET = 1 << 7;
        const DEPTH_WRITE = 1 << 8;
        const DEPTH_READ = 1 << 9;
        const STREAM_OUT = 1 << 10;
        const COPY_DEST = 1 << 11;
        const COPY_SOURCE = 1 << 12;
        const RESOLVE_DEST = 1 << 13;
        const RESOLVE_SOURCE = 1 << 14;
        const PRESENT = 1 << 15;
        const SHADING_RATE_SURFACE = 1 << 20;
    }
}

impl ResourceStates {
    /// State of a resource the tracker has not seen yet.
    pub const UNKNOWN: ResourceStates = ResourceStates::empty();
}

impl Default for ResourceStates {
    fn default() -> Self {
        ResourceStates::UNKNOWN
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const COPY_SRC = 1 << 5;
        const COPY_DST = 1 << 6;
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub byte_size: u64,
    pub usage: BufferUsage,
    pub debug_name: String,
    /// Volatile buffers are rewritten every submission and are never
    /// state-tracked.
    pub is_volatile: bool,
    pub cpu_access: CpuAccessMode,
    pub initial_state: ResourceStates,
    pub keep_initial_state: bool,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            byte_size: 0,
            usage: BufferUsage::empty(),
            debug_name: String::new(),
            is_volatile: false,
            cpu_access: CpuAccessMode::None,
            initial_state: ResourceStates::COMMON,
            keep_initial_state: false,
        }
    }
}

/// A sub-range of a buffer. `byte_size == u64::MAX` denotes "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub byte_offset: u64,
    pub byte_size: u64,
}

pub const ENTIRE_BUFFER: BufferRange = BufferRange {
    byte_offset: 0,
    byte_size: u64::MAX,
};

impl BufferRange {
    pub fn new(byte_offset: u64, byte_size: u64) -> Self {
        Self { byte_offset, byte_size }
    }

    pub fn resolve(&self, desc: &BufferDesc) -> BufferRange {
        let offset = self.byte_offset.min(desc.byte_size);
        let size = if self.byte_size == u64::MAX {
            desc.byte_size - offset
        } else {
            self.byte_size.min(desc.byte_size - offset)
        };
        BufferRange {
            byte_offset: offset,
            byte_size: size,
        }
    }

    pub fn is_entire_buffer(&self, desc: &BufferDesc) -> bool {
        self.byte_offset == 0 && (self.byte_size == u64::MAX || self.byte_size == desc.byte_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    D1,
    D1Array,
    #[default]
    D2,
    D2Array,
    Cube,
    CubeArray,
    D2Ms,
    D2MsArray,
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub sample_count: u32,
    pub format: Format,
    pub dimension: TextureDimension,
    pub debug_name: String,
    pub is_render_target: bool,
    pub is_storage: bool,
    pub clear_value: Option<Color>,
    pub initial_state: ResourceStates,
    pub keep_initial_state: bool,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            sample_count: 1,
            format: Format::Unknown,
            dimension: TextureDimension::D2,
            debug_name: String::new(),
            is_render_target: false,
            is_storage: false,
            clear_value: None,
            initial_state: ResourceStates::UNKNOWN,
            keep_initial_state: false,
        }
    }
}

/// A rectangle of texture subresources: `num_*` counts starting at `base_*`.
/// [`ALL_SUBRESOURCES`] is the whole-texture sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSubresourceSet {
    pub base_mip_level: u32,
    pub num_mip_levels: u32,
    pub base_array_layer: u32,
    pub num_array_layers: u32,
}

pub const ALL_SUBRESOURCES: TextureSubresourceSet = TextureSubresourceSet {
    base_mip_level: 0,
    num_mip_levels: u32::MAX,
    base_array_layer: 0,
    num_array_layers: u32::MAX,
};

impl TextureSubresourceSet {
    pub fn new(
        base_mip_level: u32,
        num_mip_levels: u32,
        base_array_layer: u32,
        num_array_layers: u32,
    ) -> Self {
        Self {
            base_mip_level,
            num_mip_levels,
            base_array_layer,
            num_array_layers,
        }
    }

    /// Clamps the set against the texture dimensions, expanding the "all"
    /// sentinel to the full range.
    pub fn resolve(&self, mip_levels: u32, array_layers: u32, single_mip_level: bool) -> Self {
        let base_mip = self.base_mip_level.min(mip_levels.saturating_sub(1));
        let num_mips = if single_mip_level {
            1
        } else {
            self.num_mip_levels.min(mip_levels - base_mip)
        };
        let base_layer = self.base_array_layer.min(array_layers.saturating_sub(1));
        let num_layers = self.num_array_layers.min(array_layers - base_layer);
        Self {
            base_mip_level: base_mip,
            num_mip_levels: num_mips,
            base_array_layer: base_layer,
            num_array_layers: num_layers,
        }
    }

    pub fn is_entire_texture(&self, mip_levels: u32, array_layers: u32) -> bool {
        self.base_mip_level == 0
            && self.num_mip_levels >= mip_levels
            && self.base_array_layer == 0
            && self.num_array_layers >= array_layers
    }
}

/// One region of a texture: an origin and extent inside a single
/// (mip, array layer). `u32::MAX` extents resolve to the full mip size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureSlice {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_level: u32,
    pub array_layer: u32,
}

impl Default for TextureSlice {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            z: 0,
            width: u32::MAX,
            height: u32::MAX,
            depth: u32::MAX,
            mip_level: 0,
            array_layer: 0,
        }
    }
}

impl TextureSlice {
    pub fn resolve(&self, desc: &TextureDesc) -> TextureSlice {
        let mut slice = *self;
        let (mip_width, mip_height, mip_depth) = mip_level_extent(desc, self.mip_level);
        if slice.width == u32::MAX {
            slice.width = mip_width - slice.x.min(mip_width);
        }
        if slice.height == u32::MAX {
            slice.height = mip_height - slice.y.min(mip_height);
        }
        if slice.depth == u32::MAX {
            slice.depth = mip_depth - slice.z.min(mip_depth);
        }
        slice
    }
}

/// Extent of one mip level, clamped to 1 in every dimension.
pub fn mip_level_extent(desc: &TextureDesc, mip_level: u32) -> (u32, u32, u32) {
    (
        (desc.width >> mip_level).max(1),
        (desc.height >> mip_level).max(1),
        (desc.depth >> mip_level).max(1),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderColor {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Debug, Clone)]
pub struct SamplerDesc {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub max_anisotropy: Option<f32>,
    pub compare: Option<CompareOp>,
    pub border_color: BorderColor,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mip_filter: FilterMode::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            max_anisotropy: None,
            compare: None,
            border_color: BorderColor::TransparentBlack,
            mip_lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: LOD_CLAMP_NONE,
        }
    }
}

/// Effectively-unbounded LOD clamp.
pub const LOD_CLAMP_NONE: f32 = 1000.0;

/// Pipeline stage a shader module runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

bitflags::bitflags! {
    /// Shader-stage visibility for binding layouts and push constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const GEOMETRY = 1 << 2;
        const COMPUTE = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct ShaderDesc {
    pub stage: ShaderStage,
    pub entry: String,
    pub debug_name: String,
}

impl ShaderDesc {
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            entry: "main".to_string(),
            debug_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    LineStrip,
    PointList,
}

/// One vertex attribute of an input layout.
#[derive(Debug, Clone)]
pub struct VertexAttributeDesc {
    pub name: String,
    pub format: Format,
    pub buffer_index: u32,
    pub offset: u32,
    pub element_stride: u32,
    pub is_instanced: bool,
}

bitflags::bitflags! {
    /// Flags steering a render pass's layout transitions and dependencies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderPassFlags: u32 {
        /// First pass of the frame: attachments start UNDEFINED.
        const FIRST = 1 << 0;
        /// Last pass of the frame: color ends PRESENT_SRC.
        const LAST = 1 << 1;
        /// Renders to textures sampled later: attachments end SHADER_READ_ONLY
        /// with fragment-read dependencies in both directions.
        const OFFSCREEN = 1 << 2;
        /// Continues a prior offscreen pass: attachments are loaded from
        /// SHADER_READ_ONLY, preserving their contents.
        const OFFSCREEN_INTERNAL = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub color_format: Format,
    pub depth_format: Format,
    pub use_depth: bool,
    pub clear_color: bool,
    pub clear_depth: bool,
    pub flags: RenderPassFlags,
}

impl Default for RenderPassDesc {
    fn default() -> Self {
        Self {
            color_format: Format::Bgra8Unorm,
            depth_format: Format::D32Float,
            use_depth: false,
            clear_color: false,
            clear_depth: false,
            flags: RenderPassFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewportState {
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<Rect>,
}

/// Buffer binding kinds of a binding layout, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBinding {
    Uniform,
    Storage,
}

/// Image binding kinds of a binding layout, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBinding {
    /// Combined image + sampler.
    Sampled,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageArrayBinding {
    pub binding: ImageBinding,
    pub count: u32,
}

/// Descriptor-set layout description. Slot indices are assigned sequentially
/// over the concatenation `buffers ++ images ++ image_arrays`.
#[derive(Debug, Clone)]
pub struct BindingLayoutDesc {
    pub visibility: ShaderStageFlags,
    pub buffers: Vec<BufferBinding>,
    pub images: Vec<ImageBinding>,
    pub image_arrays: Vec<ImageArrayBinding>,
    /// Descriptor pool capacity multiplier over the per-type counts.
    pub pool_count_multiplier: u32,
}

impl Default for BindingLayoutDesc {
    fn default() -> Self {
        Self {
            visibility: ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT,
            buffers: Vec::new(),
            images: Vec::new(),
            image_arrays: Vec::new(),
            pool_count_multiplier: 3,
        }
    }
}

/// Descriptor layout with a single large, partially-bound, update-after-bind
/// array binding per item.
#[derive(Debug, Clone)]
pub struct BindlessLayoutDesc {
    pub visibility: ShaderStageFlags,
    pub max_capacity: u32,
    pub bindings: Vec<ImageBinding>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrawArguments {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub start_index_location: u32,
    pub start_vertex_location: u32,
    pub start_instance_location: u32,
}

impl DrawArguments {
    pub fn vertices(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count: 1,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandListParameters {
    pub queue: CommandQueue,
    pub upload_chunk_size: u64,
    pub upload_memory_limit: u64,
}

impl Default for CommandListParameters {
    fn default() -> Self {
        Self {
            queue: CommandQueue::Graphics,
            upload_chunk_size: 32 * 1024,
            upload_memory_limit: 128 * 1024,
        }
    }
}

/// Everything needed to stand up a device: a surface source and the initial
/// framebuffer size. Extra device extensions are requested on top of the
/// built-in swapchain requirement.
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    pub display_handle: RawDisplayHandle,
    pub window_handle: RawWindowHandle,
    pub device_extensions: Vec<std::ffi::CString>,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc_2d(mips: u32, layers: u32) -> TextureDesc {
        TextureDesc {
            width: 256,
            height: 256,
            mip_levels: mips,
            array_layers: layers,
            format: Format::Rgba8Unorm,
            ..Default::default()
        }
    }

    #[test]
    fn all_subresources_resolves_to_full_range() {
        let desc = desc_2d(4, 6);
        let resolved = ALL_SUBRESOURCES.resolve(desc.mip_levels, desc.array_layers, false);
        assert_eq!(resolved, TextureSubresourceSet::new(0, 4, 0, 6));
        assert!(resolved.is_entire_texture(desc.mip_levels, desc.array_layers));
    }

    #[test]
    fn resolve_clamps_out_of_range_sets() {
        let desc = desc_2d(4, 2);
        let resolved =
            TextureSubresourceSet::new(2, 8, 1, 8).resolve(desc.mip_levels, desc.array_layers, false);
        assert_eq!(resolved, TextureSubresourceSet::new(2, 2, 1, 1));
        assert!(!resolved.is_entire_texture(desc.mip_levels, desc.array_layers));
    }

    #[test]
    fn resolve_single_mip() {
        let desc = desc_2d(4, 1);
        let resolved = ALL_SUBRESOURCES.resolve(desc.mip_levels, desc.array_layers, true);
        assert_eq!(resolved.num_mip_levels, 1);
    }

    #[test]
    fn buffer_range_resolve() {
        let desc = BufferDesc {
            byte_size: 1024,
            ..Default::default()
        };
        let range = ENTIRE_BUFFER.resolve(&desc);
        assert_eq!(range, BufferRange::new(0, 1024));
        assert!(ENTIRE_BUFFER.is_entire_buffer(&desc));
        let partial = BufferRange::new(512, 4096).resolve(&desc);
        assert_eq!(partial, BufferRange::new(512, 512));
    }

    #[test]
    fn texture_slice_resolves_mip_extent() {
        let desc = desc_2d(4, 1);
        let slice = TextureSlice {
            mip_level: 2,
            ..Default::default()
        }
        .resolve(&desc);
        assert_eq!((slice.width, slice.height, slice.depth), (64, 64, 1));
    }
}
