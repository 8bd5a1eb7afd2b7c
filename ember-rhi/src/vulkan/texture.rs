//! Texture resource with its subresource-view cache, and the buffer-backed
//! staging texture used as a CPU-visible mirror for texture copies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::error::{Result, RhiError};
use crate::format::Format;
use crate::state_tracker::{TextureStateSource, TextureTracking};
use crate::types::{
    BufferDesc, CpuAccessMode, TextureDesc, TextureDimension, TextureSubresourceSet,
};

use super::buffer::{create_buffer, BufferHandle};
use super::convert;
use super::VulkanContext;

/// Which aspects a cached view exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSubresourceViewType {
    AllAspects,
    DepthOnly,
    StencilOnly,
}

/// A cached view over a subresource rectangle. The view's lifetime is the
/// texture's; the handle value is freely copyable.
#[derive(Debug, Clone, Copy)]
pub struct TextureSubresourceView {
    pub view: vk::ImageView,
    pub subresource_range: vk::ImageSubresourceRange,
    pub subresources: TextureSubresourceSet,
}

type ViewCacheKey = (TextureSubresourceSet, TextureSubresourceViewType, TextureDimension);

pub struct Texture {
    context: Arc<VulkanContext>,
    pub(crate) image: vk::Image,
    memory: vk::DeviceMemory,
    pub desc: TextureDesc,
    pub(crate) tracking: TextureTracking,
    views: Mutex<HashMap<ViewCacheKey, TextureSubresourceView>>,
    managed: bool,
}

pub type TextureHandle = Arc<Texture>;

fn image_usage_for_desc(desc: &TextureDesc) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::TRANSFER_SRC;
    if desc.is_render_target {
        if desc.format.is_depth_stencil() {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }
    if desc.is_storage {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    usage
}

pub(crate) fn create_texture(
    context: &Arc<VulkanContext>,
    desc: TextureDesc,
) -> Result<TextureHandle> {
    if desc.format == Format::Unknown {
        return Err(RhiError::InvalidArgument("texture format must be known"));
    }

    let create_info = vk::ImageCreateInfo::default()
        .image_type(convert::image_type(desc.dimension))
        .format(convert::format_to_vk(desc.format))
        .extent(vk::Extent3D {
            width: desc.width.max(1),
            height: desc.height.max(1),
            depth: desc.depth.max(1),
        })
        .mip_levels(desc.mip_levels.max(1))
        .array_layers(desc.array_layers.max(1))
        .samples(convert::sample_count_to_vk(desc.sample_count))
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(image_usage_for_desc(&desc))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .flags(convert::image_create_flags(desc.dimension))
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { context.device.create_image(&create_info, None)? };

    let requirements = unsafe { context.device.get_image_memory_requirements(image) };
    let memory_type_index = match context
        .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
    {
        Some(index) => index,
        None => {
            unsafe { context.device.destroy_image(image, None) };
            return Err(RhiError::OutOfMemory);
        }
    };

    let allocate_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { context.device.allocate_memory(&allocate_info, None) } {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { context.device.destroy_image(image, None) };
            return Err(err.into());
        }
    };

    unsafe { context.device.bind_image_memory(image, memory, 0)? };

    let tracking = TextureTracking::new(&desc);

    Ok(Arc::new(Texture {
        context: Arc::clone(context),
        image,
        memory,
        desc,
        tracking,
        views: Mutex::new(HashMap::new()),
        managed: true,
    }))
}

/// Wraps a pre-existing VkImage (for example a swapchain image). With
/// `take_ownership`, the handle destroys the image on drop.
pub(crate) fn create_handle_for_native_texture(
    context: &Arc<VulkanContext>,
    image: vk::Image,
    desc: TextureDesc,
    take_ownership: bool,
) -> TextureHandle {
    let tracking = TextureTracking::new(&desc);
    Arc::new(Texture {
        context: Arc::clone(context),
        image,
        memory: vk::DeviceMemory::null(),
        desc,
        tracking,
        views: Mutex::new(HashMap::new()),
        managed: take_ownership,
    })
}

fn subresource_aspect_flags(
    format: Format,
    view_type: TextureSubresourceViewType,
) -> vk::ImageAspectFlags {
    match view_type {
        TextureSubresourceViewType::AllAspects => convert::image_aspect_flags(format),
        TextureSubresourceViewType::DepthOnly => vk::ImageAspectFlags::DEPTH,
        TextureSubresourceViewType::StencilOnly => vk::ImageAspectFlags::STENCIL,
    }
}

/// View type a binding format selects: depth-only or stencil-only for the
/// matching formats, all aspects otherwise.
pub(crate) fn view_type_for_format(format: Format) -> TextureSubresourceViewType {
    let info = format.info();
    if info.has_depth && !info.has_stencil {
        TextureSubresourceViewType::DepthOnly
    } else if info.has_stencil && !info.has_depth {
        TextureSubresourceViewType::StencilOnly
    } else if info.has_depth {
        TextureSubresourceViewType::DepthOnly
    } else {
        TextureSubresourceViewType::AllAspects
    }
}

impl Texture {
    pub fn num_subresources(&self) -> u32 {
        self.desc.mip_levels * self.desc.array_layers
    }

    /// Returns the cached view for `(subresources, dimension, view_type)`,
    /// creating it on first use. Equal keys always yield the same view.
    pub fn get_view(
        &self,
        subresources: TextureSubresourceSet,
        dimension: Option<TextureDimension>,
        view_type: TextureSubresourceViewType,
    ) -> Result<TextureSubresourceView> {
        let dimension = dimension.unwrap_or(self.desc.dimension);
        let subresources =
            subresources.resolve(self.desc.mip_levels, self.desc.array_layers, false);

        let key = (subresources, view_type, dimension);
        let mut cache = self.views.lock().unwrap();
        if let Some(view) = cache.get(&key) {
            return Ok(*view);
        }

        let subresource_range = vk::ImageSubresourceRange::default()
            .aspect_mask(subresource_aspect_flags(self.desc.format, view_type))
            .base_mip_level(subresources.base_mip_level)
            .level_count(subresources.num_mip_levels)
            .base_array_layer(subresources.base_array_layer)
            .layer_count(subresources.num_array_layers);

        let mut view_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(convert::image_view_type(dimension))
            .format(convert::format_to_vk(self.desc.format))
            .subresource_range(subresource_range);

        if view_type == TextureSubresourceViewType::StencilOnly {
            // Shaders expect stencil in the second component.
            view_info.components.g = vk::ComponentSwizzle::R;
        }

        let view = unsafe { self.context.device.create_image_view(&view_info, None)? };
        let entry = TextureSubresourceView {
            view,
            subresource_range,
            subresources,
        };
        cache.insert(key, entry);
        Ok(entry)
    }
}

impl TextureStateSource for Texture {
    fn tracking(&self) -> &TextureTracking {
        &self.tracking
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            for (_, view) in self.views.lock().unwrap().drain() {
                self.context.device.destroy_image_view(view.view, None);
            }
            if self.managed && self.image != vk::Image::null() {
                self.context.device.destroy_image(self.image, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.context.device.free_memory(self.memory, None);
            }
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("extent", &(self.desc.width, self.desc.height, self.desc.depth))
            .field("format", &self.desc.format)
            .field("mips", &self.desc.mip_levels)
            .field("layers", &self.desc.array_layers)
            .finish_non_exhaustive()
    }
}

/// One (mip, layer, slice) region inside a staging texture's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingRegion {
    pub offset: u64,
    pub size: u64,
}

/// A buffer-backed CPU-accessible mirror of a texture, with precomputed
/// regions for every (mip, layer, slice).
pub struct StagingTexture {
    pub desc: TextureDesc,
    pub(crate) buffer: BufferHandle,
    regions: Vec<StagingRegion>,
}

pub type StagingTextureHandle = Arc<StagingTexture>;

const STAGING_OFFSET_ALIGNMENT: u64 = 4;

fn align_region_offset(offset: u64) -> u64 {
    (offset + (STAGING_OFFSET_ALIGNMENT - 1)) & !(STAGING_OFFSET_ALIGNMENT - 1)
}

/// Byte pitch of one row of texel blocks at `mip_level`.
pub(crate) fn mip_row_pitch(desc: &TextureDesc, mip_level: u32) -> u64 {
    let info = desc.format.info();
    let block_size = info.block_size.max(1) as u64;
    let mip_width = (desc.width >> mip_level).max(1) as u64;
    let width_blocks = mip_width.div_ceil(block_size);
    width_blocks * info.bytes_per_block as u64
}

fn mip_slice_size(desc: &TextureDesc, mip_level: u32) -> u64 {
    let info = desc.format.info();
    let block_size = info.block_size.max(1) as u64;
    let mip_height = (desc.height >> mip_level).max(1) as u64;
    let height_blocks = mip_height.div_ceil(block_size);
    mip_row_pitch(desc, mip_level) * height_blocks
}

/// Mip-major region layout: for each mip, one region per (layer x depth
/// slice), every offset aligned to 4 bytes.
pub(crate) fn compute_staging_regions(desc: &TextureDesc) -> Vec<StagingRegion> {
    let mut regions = Vec::new();
    let mut offset = 0u64;

    for mip in 0..desc.mip_levels.max(1) {
        let slice_size = mip_slice_size(desc, mip);
        let mip_depth = (desc.depth >> mip).max(1);
        let num_slices = desc.array_layers.max(1) * mip_depth;

        for _ in 0..num_slices {
            regions.push(StagingRegion {
                offset,
                size: slice_size,
            });
            offset = align_region_offset(offset + slice_size);
        }
    }

    regions
}

pub(crate) fn create_staging_texture(
    context: &Arc<VulkanContext>,
    desc: TextureDesc,
    cpu_access: CpuAccessMode,
) -> Result<StagingTextureHandle> {
    if cpu_access == CpuAccessMode::None {
        return Err(RhiError::InvalidArgument(
            "staging textures require cpu read or write access",
        ));
    }

    let regions = compute_staging_regions(&desc);
    let total_size = regions
        .last()
        .map(|region| region.offset + region.size)
        .unwrap_or(0)
        .max(1);

    let buffer = create_buffer(
        context,
        BufferDesc {
            byte_size: total_size,
            cpu_access,
            debug_name: desc.debug_name.clone(),
            ..Default::default()
        },
    )?;

    Ok(Arc::new(StagingTexture {
        desc,
        buffer,
        regions,
    }))
}

impl StagingTexture {
    pub fn buffer_size(&self) -> u64 {
        self.buffer.desc.byte_size
    }

    /// Region of one (mip, layer, z-slice). For 3D textures each mip has its
    /// own run of depth slices; for arrays every mip has a fixed layer count.
    pub fn get_slice_region(&self, mip_level: u32, array_layer: u32, z: u32) -> StagingRegion {
        if self.desc.depth > 1 {
            let mut index = 0u32;
            for mip in 0..mip_level {
                index += (self.desc.depth >> mip).max(1);
            }
            self.regions[(index + z) as usize]
        } else {
            let layer_count = self.desc.array_layers.max(1);
            self.regions[(mip_level * layer_count + array_layer) as usize]
        }
    }

    pub(crate) fn row_pitch(&self, mip_level: u32) -> u64 {
        mip_row_pitch(&self.desc, mip_level)
    }
}

impl std::fmt::Debug for StagingTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingTexture")
            .field("extent", &(self.desc.width, self.desc.height, self.desc.depth))
            .field("format", &self.desc.format)
            .field("regions", &self.regions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staging_desc(width: u32, height: u32, mips: u32, layers: u32, depth: u32) -> TextureDesc {
        TextureDesc {
            width,
            height,
            depth,
            mip_levels: mips,
            array_layers: layers,
            format: Format::Rgba8Unorm,
            ..Default::default()
        }
    }

    #[test]
    fn regions_are_aligned_and_disjoint() {
        let desc = staging_desc(13, 7, 4, 3, 1);
        let regions = compute_staging_regions(&desc);
        assert_eq!(regions.len(), (4 * 3) as usize);

        let mut previous_end = 0u64;
        for region in &regions {
            assert_eq!(region.offset % 4, 0);
            assert!(region.offset >= previous_end);
            previous_end = region.offset + region.size;
        }
    }

    #[test]
    fn region_sizes_follow_mip_extent() {
        let desc = staging_desc(256, 128, 3, 1, 1);
        let regions = compute_staging_regions(&desc);
        assert_eq!(regions[0].size, 256 * 128 * 4);
        assert_eq!(regions[1].size, 128 * 64 * 4);
        assert_eq!(regions[2].size, 64 * 32 * 4);
    }

    #[test]
    fn array_indexing_is_mip_major() {
        let desc = staging_desc(64, 64, 2, 4, 1);
        let regions = compute_staging_regions(&desc);
        // mip 0 layers 0..4, then mip 1 layers 0..4
        assert_eq!(regions.len(), 8);
        assert!(regions[4].size < regions[3].size);
    }

    #[test]
    fn volume_regions_shrink_with_depth() {
        let desc = staging_desc(32, 32, 2, 1, 8);
        let regions = compute_staging_regions(&desc);
        // mip 0 has 8 slices, mip 1 has 4
        assert_eq!(regions.len(), 12);
    }

    #[test]
    fn row_pitch_uses_bytes_per_block() {
        let desc = staging_desc(256, 256, 1, 1, 1);
        assert_eq!(mip_row_pitch(&desc, 0), 256 * 4);
    }
}
