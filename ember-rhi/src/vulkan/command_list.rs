//! Command list: the recording surface.
//!
//! Recording runs between `begin` and `end`. Unless automatic barriers are
//! disabled, every operation that touches a resource first requires the
//! expected state from the tracker and flushes the pending barriers before
//! issuing the backend command. Render passes are scoped implicitly: binding
//! graphics state opens one, and anything that must commit barriers (which
//! cannot live inside a render pass) closes it.
//!
//! Contract violations during recording are logged and skipped; the eventual
//! submission is expected to fail validation instead of this API returning
//! errors mid-recording.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::error::Result;
use crate::format::Format;
use crate::state_tracker::CommandListResourceStateTracker;
use crate::types::{
    Color, CommandListParameters, CpuAccessMode, DrawArguments, Rect, ResourceStates,
    TextureSlice, TextureSubresourceSet, Viewport, ViewportState, ALL_SUBRESOURCES,
};
use crate::versioning::make_version;

use super::bindings::{BindingSetItem, BindingSetRef};
use super::buffer::BufferHandle;
use super::convert;
use super::framebuffer_clear_values;
use super::pipeline::{ComputePipelineHandle, GraphicsPipelineHandle};
use super::queue::TrackedCommandBuffer;
use super::render_pass::FramebufferHandle;
use super::texture::{StagingTextureHandle, TextureHandle};
use super::upload::{UploadManager, DEFAULT_SUBALLOCATION_ALIGNMENT};
use super::{Buffer, DeviceInner, ResourceHandle, Texture};

/// <= 64 KiB writes go through vkCmdUpdateBuffer instead of a staging copy.
const COMMAND_BUFFER_WRITE_LIMIT: u64 = 65_536;

/// Inline updates require a 4-aligned destination and room for the padded
/// size; everything else goes through the upload manager.
fn use_inline_write(size: u64, dst_offset: u64, buffer_size: u64) -> bool {
    let padded_size = (size + 3) & !3;
    size <= COMMAND_BUFFER_WRITE_LIMIT
        && dst_offset % 4 == 0
        && dst_offset + padded_size <= buffer_size
}

#[derive(Clone)]
pub struct VertexBufferBinding {
    pub buffer: BufferHandle,
    pub slot: u32,
    pub offset: u64,
}

#[derive(Clone)]
pub struct IndexBufferBinding {
    pub buffer: BufferHandle,
    pub format: Format,
    pub offset: u64,
}

#[derive(Clone)]
pub struct GraphicsState {
    pub pipeline: GraphicsPipelineHandle,
    pub framebuffer: FramebufferHandle,
    pub viewport: ViewportState,
    pub bindings: Vec<BindingSetRef>,
    pub vertex_buffers: Vec<VertexBufferBinding>,
    pub index_buffer: Option<IndexBufferBinding>,
    pub indirect_buffer: Option<BufferHandle>,
}

#[derive(Clone)]
pub struct ComputeState {
    pub pipeline: ComputePipelineHandle,
    pub bindings: Vec<BindingSetRef>,
    pub indirect_buffer: Option<BufferHandle>,
}

type StateTracker = CommandListResourceStateTracker<Texture, Buffer>;

pub struct CommandList {
    device: Arc<DeviceInner>,
    params: CommandListParameters,
    current: Option<TrackedCommandBuffer>,
    recording_id: u64,
    tracker: StateTracker,
    upload_manager: UploadManager,
    scratch_manager: UploadManager,
    graphics_state: Option<GraphicsState>,
    compute_state: Option<ComputeState>,
    render_pass_open: bool,
    current_pipeline_layout: vk::PipelineLayout,
    current_push_constant_stages: vk::ShaderStageFlags,
    enable_automatic_barriers: bool,
}

macro_rules! recording {
    ($self:ident, $name:literal) => {
        match $self.current.as_ref() {
            Some(buffer) => buffer.command_buffer,
            None => {
                log::error!(concat!($name, ": command list is not recording"));
                return;
            }
        }
    };
}

impl CommandList {
    pub(crate) fn new(device: Arc<DeviceInner>, params: CommandListParameters) -> Self {
        let context = Arc::clone(&device.context);
        let upload_manager = UploadManager::new(
            Arc::clone(&context),
            params.upload_chunk_size,
            params.upload_memory_limit,
            false,
        );
        let scratch_manager = UploadManager::new(
            context,
            params.upload_chunk_size,
            params.upload_memory_limit,
            true,
        );

        Self {
            device,
            params,
            current: None,
            recording_id: 0,
            tracker: StateTracker::new(),
            upload_manager,
            scratch_manager,
            graphics_state: None,
            compute_state: None,
            render_pass_open: false,
            current_pipeline_layout: vk::PipelineLayout::null(),
            current_push_constant_stages: vk::ShaderStageFlags::empty(),
            enable_automatic_barriers: true,
        }
    }

    pub fn parameters(&self) -> &CommandListParameters {
        &self.params
    }

    /// Acquires a fresh tracked command buffer from the list's queue and
    /// opens it for recording.
    pub fn begin(&mut self) -> Result<()> {
        let queue = self.device.queue(self.params.queue)?;
        let buffer = queue.get_or_create_command_buffer()?;
        self.recording_id = buffer.recording_id;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .context
                .device
                .begin_command_buffer(buffer.command_buffer, &begin_info)?
        };

        self.current = Some(buffer);
        self.clear_state();
        Ok(())
    }

    /// Ends any open render pass, restores keep-initial states, flushes the
    /// remaining barriers, and closes the backend command buffer.
    pub fn end(&mut self) -> Result<()> {
        self.end_render_pass();

        self.tracker.keep_texture_initial_states();
        self.tracker.keep_buffer_initial_states();
        self.commit_barriers();

        if let Some(buffer) = self.current.as_ref() {
            unsafe {
                self.device
                    .context
                    .device
                    .end_command_buffer(buffer.command_buffer)?
            };
        }

        self.clear_state();
        Ok(())
    }

    pub fn clear_state(&mut self) {
        self.end_render_pass();
        self.graphics_state = None;
        self.compute_state = None;
        self.current_pipeline_layout = vk::PipelineLayout::null();
        self.current_push_constant_stages = vk::ShaderStageFlags::empty();
    }

    fn reference(&mut self, handle: ResourceHandle) {
        if let Some(buffer) = self.current.as_mut() {
            buffer.referenced_resources.push(handle);
        }
    }

    fn reference_buffer(&mut self, buffer: &BufferHandle) {
        if let Some(current) = self.current.as_mut() {
            if buffer.desc.cpu_access != CpuAccessMode::None {
                current.referenced_staging_buffers.push(Arc::clone(buffer));
            } else {
                current
                    .referenced_resources
                    .push(ResourceHandle::Buffer(Arc::clone(buffer)));
            }
        }
    }

    fn upload_version(&self) -> u64 {
        make_version(self.recording_id, self.params.queue, false)
    }

    /// Writes host data into a buffer. Small 4-byte-aligned writes run inline
    /// through the command buffer; larger ones bounce through an upload
    /// chunk.
    pub fn write_buffer(&mut self, buffer: &BufferHandle, data: &[u8], dst_offset: u64) {
        let cmd = recording!(self, "write_buffer");

        let size = data.len() as u64;
        if dst_offset + size > buffer.desc.byte_size {
            log::error!("write_buffer: range exceeds buffer size");
            return;
        }

        self.end_render_pass();
        self.reference(ResourceHandle::Buffer(Arc::clone(buffer)));

        let padded_size = (size + 3) & !3;
        if use_inline_write(size, dst_offset, buffer.desc.byte_size) {
            if self.enable_automatic_barriers {
                self.tracker
                    .require_buffer_state(buffer, ResourceStates::COPY_DEST);
            }
            self.commit_barriers();

            // vkCmdUpdateBuffer sizes must be multiples of 4.
            if padded_size != size {
                let mut padded = Vec::with_capacity(padded_size as usize);
                padded.extend_from_slice(data);
                padded.resize(padded_size as usize, 0);
                unsafe {
                    self.device.context.device.cmd_update_buffer(
                        cmd,
                        buffer.buffer,
                        dst_offset,
                        &padded,
                    )
                };
            } else {
                unsafe {
                    self.device
                        .context
                        .device
                        .cmd_update_buffer(cmd, buffer.buffer, dst_offset, data)
                };
            }
            return;
        }

        if buffer.desc.cpu_access == CpuAccessMode::Write {
            log::error!("write_buffer: target is host-mapped; write through the mapping instead");
            return;
        }

        let completed = self.device.queue_completed_instance(self.params.queue);
        let version = self.upload_version();
        let allocation = match self.upload_manager.suballocate(
            size,
            DEFAULT_SUBALLOCATION_ALIGNMENT,
            version,
            completed,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                log::error!("write_buffer: upload allocation failed: {err}");
                return;
            }
        };

        if let Some(mapped) = allocation.mapped_ptr {
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len()) };
        }

        let upload_buffer = allocation.buffer;
        let upload_offset = allocation.offset;
        self.copy_buffer(buffer, dst_offset, &upload_buffer, upload_offset, size);
    }

    /// Fills the whole buffer with a u32 pattern.
    pub fn clear_buffer_u32(&mut self, buffer: &BufferHandle, value: u32) {
        let cmd = recording!(self, "clear_buffer_u32");

        self.end_render_pass();
        if self.enable_automatic_barriers {
            self.tracker
                .require_buffer_state(buffer, ResourceStates::COPY_DEST);
        }
        self.commit_barriers();

        unsafe {
            self.device.context.device.cmd_fill_buffer(
                cmd,
                buffer.buffer,
                0,
                vk::WHOLE_SIZE,
                value,
            )
        };
        self.reference(ResourceHandle::Buffer(Arc::clone(buffer)));
    }

    pub fn copy_buffer(
        &mut self,
        dst: &BufferHandle,
        dst_offset: u64,
        src: &BufferHandle,
        src_offset: u64,
        size: u64,
    ) {
        let cmd = recording!(self, "copy_buffer");

        if dst_offset + size > dst.desc.byte_size || src_offset + size > src.desc.byte_size {
            log::error!("copy_buffer: range exceeds buffer size");
            return;
        }

        self.end_render_pass();
        self.reference_buffer(dst);
        self.reference_buffer(src);

        if self.enable_automatic_barriers {
            self.tracker
                .require_buffer_state(src, ResourceStates::COPY_SOURCE);
            self.tracker
                .require_buffer_state(dst, ResourceStates::COPY_DEST);
        }
        self.commit_barriers();

        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        unsafe {
            self.device
                .context
                .device
                .cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region])
        };
    }

    /// Uploads one mip of one array layer, repacking rows to the
    /// destination's block layout.
    pub fn write_texture(
        &mut self,
        dst: &TextureHandle,
        array_layer: u32,
        mip_level: u32,
        data: &[u8],
        row_pitch: usize,
        depth_pitch: usize,
    ) {
        let cmd = recording!(self, "write_texture");

        self.end_render_pass();

        let desc = &dst.desc;
        let mip_width = (desc.width >> mip_level).max(1);
        let mip_height = (desc.height >> mip_level).max(1);
        let mip_depth = (desc.depth >> mip_level).max(1);

        let info = desc.format.info();
        let block_size = info.block_size.max(1) as u32;
        let device_num_cols = mip_width.div_ceil(block_size);
        let device_num_rows = mip_height.div_ceil(block_size);
        let device_row_pitch = device_num_cols as u64 * info.bytes_per_block as u64;
        let device_mem_size = device_row_pitch * device_num_rows as u64 * mip_depth as u64;

        let completed = self.device.queue_completed_instance(self.params.queue);
        let version = self.upload_version();
        let allocation = match self.upload_manager.suballocate(
            device_mem_size,
            DEFAULT_SUBALLOCATION_ALIGNMENT,
            version,
            completed,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                log::error!("write_texture: upload allocation failed: {err}");
                return;
            }
        };

        let Some(mapped) = allocation.mapped_ptr else {
            log::error!("write_texture: upload chunk is not host-visible");
            return;
        };

        // Gather rows at the device pitch.
        let min_row_pitch = device_row_pitch.min(row_pitch as u64) as usize;
        let needed = if mip_depth > 1 {
            depth_pitch * (mip_depth as usize - 1)
                + row_pitch * (device_num_rows as usize - 1)
                + min_row_pitch
        } else {
            row_pitch * (device_num_rows as usize - 1) + min_row_pitch
        };
        if data.len() < needed {
            log::error!("write_texture: source data is smaller than the described layout");
            return;
        }
        let mut write_ptr = mapped;
        for slice in 0..mip_depth as usize {
            let mut read_offset = depth_pitch * slice;
            for _ in 0..device_num_rows {
                let row = &data[read_offset..read_offset + min_row_pitch];
                unsafe {
                    std::ptr::copy_nonoverlapping(row.as_ptr(), write_ptr, min_row_pitch);
                    write_ptr = write_ptr.add(device_row_pitch as usize);
                }
                read_offset += row_pitch;
            }
        }

        if self.enable_automatic_barriers {
            self.tracker.require_texture_state(
                dst,
                TextureSubresourceSet::new(mip_level, 1, array_layer, 1),
                ResourceStates::COPY_DEST,
            );
        }
        self.commit_barriers();

        self.reference(ResourceHandle::Texture(Arc::clone(dst)));

        let region = vk::BufferImageCopy::default()
            .buffer_offset(allocation.offset)
            .buffer_row_length(device_num_cols * block_size)
            .buffer_image_height(device_num_rows * block_size)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(convert::image_aspect_flags(desc.format))
                    .mip_level(mip_level)
                    .base_array_layer(array_layer)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: mip_width,
                height: mip_height,
                depth: mip_depth,
            });

        unsafe {
            self.device.context.device.cmd_copy_buffer_to_image(
                cmd,
                allocation.buffer.buffer,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    pub fn copy_texture(
        &mut self,
        dst: &TextureHandle,
        dst_slice: &TextureSlice,
        src: &TextureHandle,
        src_slice: &TextureSlice,
    ) {
        let cmd = recording!(self, "copy_texture");

        let dst_slice = dst_slice.resolve(&dst.desc);
        let src_slice = src_slice.resolve(&src.desc);
        if dst_slice.width == 0 || dst_slice.height == 0 || dst_slice.depth == 0 {
            return;
        }

        self.end_render_pass();
        self.reference(ResourceHandle::Texture(Arc::clone(dst)));
        self.reference(ResourceHandle::Texture(Arc::clone(src)));

        let src_subresource =
            TextureSubresourceSet::new(src_slice.mip_level, 1, src_slice.array_layer, 1);
        let dst_subresource =
            TextureSubresourceSet::new(dst_slice.mip_level, 1, dst_slice.array_layer, 1);

        if self.enable_automatic_barriers {
            self.tracker
                .require_texture_state(src, src_subresource, ResourceStates::COPY_SOURCE);
            self.tracker
                .require_texture_state(dst, dst_subresource, ResourceStates::COPY_DEST);
        }
        self.commit_barriers();

        let region = vk::ImageCopy::default()
            .src_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(convert::image_aspect_flags(src.desc.format))
                    .mip_level(src_slice.mip_level)
                    .base_array_layer(src_slice.array_layer)
                    .layer_count(1),
            )
            .src_offset(vk::Offset3D {
                x: src_slice.x as i32,
                y: src_slice.y as i32,
                z: src_slice.z as i32,
            })
            .dst_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(convert::image_aspect_flags(dst.desc.format))
                    .mip_level(dst_slice.mip_level)
                    .base_array_layer(dst_slice.array_layer)
                    .layer_count(1),
            )
            .dst_offset(vk::Offset3D {
                x: dst_slice.x as i32,
                y: dst_slice.y as i32,
                z: dst_slice.z as i32,
            })
            .extent(vk::Extent3D {
                width: dst_slice.width,
                height: dst_slice.height,
                depth: dst_slice.depth,
            });

        unsafe {
            self.device.context.device.cmd_copy_image(
                cmd,
                src.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    /// Reads one texture slice back into a staging texture region.
    pub fn copy_texture_to_staging(
        &mut self,
        dst: &StagingTextureHandle,
        dst_slice: &TextureSlice,
        src: &TextureHandle,
        src_slice: &TextureSlice,
    ) {
        let cmd = recording!(self, "copy_texture_to_staging");

        let dst_slice = dst_slice.resolve(&dst.desc);
        let src_slice = src_slice.resolve(&src.desc);
        if dst_slice.width == 0 || dst_slice.height == 0 {
            return;
        }

        self.end_render_pass();

        let mip_width = (src.desc.width >> dst_slice.mip_level).max(1);
        let mip_height = (src.desc.height >> dst_slice.mip_level).max(1);

        let region = dst.get_slice_region(dst_slice.mip_level, dst_slice.array_layer, dst_slice.z);
        debug_assert_eq!(region.offset % 4, 0);

        let src_subresource =
            TextureSubresourceSet::new(src_slice.mip_level, 1, src_slice.array_layer, 1);

        if self.enable_automatic_barriers {
            self.tracker
                .require_buffer_state(&dst.buffer, ResourceStates::COPY_DEST);
            self.tracker
                .require_texture_state(src, src_subresource, ResourceStates::COPY_SOURCE);
        }
        self.commit_barriers();

        self.reference(ResourceHandle::StagingTexture(Arc::clone(dst)));
        self.reference_buffer(&dst.buffer);
        self.reference(ResourceHandle::Texture(Arc::clone(src)));

        let copy = vk::BufferImageCopy::default()
            .buffer_offset(region.offset)
            .buffer_row_length(dst_slice.width)
            .buffer_image_height(dst_slice.height)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(convert::image_aspect_flags(src.desc.format))
                    .mip_level(src_slice.mip_level)
                    .base_array_layer(src_slice.array_layer)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D {
                x: src_slice.x as i32,
                y: src_slice.y as i32,
                z: src_slice.z as i32,
            })
            .image_extent(vk::Extent3D {
                width: mip_width,
                height: mip_height,
                depth: 1,
            });

        unsafe {
            self.device.context.device.cmd_copy_image_to_buffer(
                cmd,
                src.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.buffer.buffer,
                &[copy],
            )
        };
    }

    /// Uploads one staging region into a texture slice.
    pub fn copy_staging_to_texture(
        &mut self,
        dst: &TextureHandle,
        dst_slice: &TextureSlice,
        src: &StagingTextureHandle,
        src_slice: &TextureSlice,
    ) {
        let cmd = recording!(self, "copy_staging_to_texture");

        let dst_slice = dst_slice.resolve(&dst.desc);
        let src_slice = src_slice.resolve(&src.desc);
        if dst_slice.width == 0 || dst_slice.height == 0 {
            return;
        }

        self.end_render_pass();

        let mip_width = (dst.desc.width >> dst_slice.mip_level).max(1);
        let mip_height = (dst.desc.height >> dst_slice.mip_level).max(1);

        let region = src.get_slice_region(src_slice.mip_level, src_slice.array_layer, src_slice.z);
        debug_assert_eq!(region.offset % 4, 0);
        debug_assert!(region.size > 0);

        let dst_subresource =
            TextureSubresourceSet::new(dst_slice.mip_level, 1, dst_slice.array_layer, 1);

        if self.enable_automatic_barriers {
            self.tracker
                .require_buffer_state(&src.buffer, ResourceStates::COPY_SOURCE);
            self.tracker
                .require_texture_state(dst, dst_subresource, ResourceStates::COPY_DEST);
        }
        self.commit_barriers();

        self.reference(ResourceHandle::StagingTexture(Arc::clone(src)));
        self.reference_buffer(&src.buffer);
        self.reference(ResourceHandle::Texture(Arc::clone(dst)));

        let copy = vk::BufferImageCopy::default()
            .buffer_offset(region.offset)
            .buffer_row_length(src_slice.width)
            .buffer_image_height(src_slice.height)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(convert::image_aspect_flags(dst.desc.format))
                    .mip_level(dst_slice.mip_level)
                    .base_array_layer(dst_slice.array_layer)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D {
                x: dst_slice.x as i32,
                y: dst_slice.y as i32,
                z: dst_slice.z as i32,
            })
            .image_extent(vk::Extent3D {
                width: mip_width,
                height: mip_height,
                depth: 1,
            });

        unsafe {
            self.device.context.device.cmd_copy_buffer_to_image(
                cmd,
                src.buffer.buffer,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            )
        };
    }

    fn clear_texture_value(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        clear_value: vk::ClearColorValue,
    ) {
        let cmd = recording!(self, "clear_texture");

        self.end_render_pass();

        let subresources =
            subresources.resolve(texture.desc.mip_levels, texture.desc.array_layers, false);

        if self.enable_automatic_barriers {
            self.tracker
                .require_texture_state(texture, subresources, ResourceStates::COPY_DEST);
        }
        self.commit_barriers();

        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(subresources.base_mip_level)
            .level_count(subresources.num_mip_levels)
            .base_array_layer(subresources.base_array_layer)
            .layer_count(subresources.num_array_layers);

        unsafe {
            self.device.context.device.cmd_clear_color_image(
                cmd,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            )
        };
        self.reference(ResourceHandle::Texture(Arc::clone(texture)));
    }

    pub fn clear_texture(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        color: Color,
    ) {
        self.clear_texture_value(
            texture,
            subresources,
            vk::ClearColorValue {
                float32: [color.r, color.g, color.b, color.a],
            },
        );
    }

    pub fn clear_texture_u32(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        value: u32,
    ) {
        self.clear_texture_value(
            texture,
            subresources,
            vk::ClearColorValue {
                uint32: [value; 4],
            },
        );
    }

    pub fn clear_depth_stencil_texture(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        clear_depth: bool,
        depth: f32,
        clear_stencil: bool,
        stencil: u8,
    ) {
        let cmd = recording!(self, "clear_depth_stencil_texture");

        if !clear_depth && !clear_stencil {
            return;
        }

        self.end_render_pass();

        let subresources =
            subresources.resolve(texture.desc.mip_levels, texture.desc.array_layers, false);

        if self.enable_automatic_barriers {
            self.tracker
                .require_texture_state(texture, subresources, ResourceStates::COPY_DEST);
        }
        self.commit_barriers();

        let mut aspect_mask = vk::ImageAspectFlags::empty();
        if clear_depth {
            aspect_mask |= vk::ImageAspectFlags::DEPTH;
        }
        if clear_stencil {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }

        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect_mask)
            .base_mip_level(subresources.base_mip_level)
            .level_count(subresources.num_mip_levels)
            .base_array_layer(subresources.base_array_layer)
            .layer_count(subresources.num_array_layers);

        let clear_value = vk::ClearDepthStencilValue {
            depth,
            stencil: stencil as u32,
        };

        unsafe {
            self.device.context.device.cmd_clear_depth_stencil_image(
                cmd,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &[range],
            )
        };
        self.reference(ResourceHandle::Texture(Arc::clone(texture)));
    }

    /// Resolves a multisampled texture into a single-sampled one, one region
    /// per mip level. The subresource sets must match in size.
    pub fn resolve_texture(
        &mut self,
        dst: &TextureHandle,
        dst_subresources: TextureSubresourceSet,
        src: &TextureHandle,
        src_subresources: TextureSubresourceSet,
    ) {
        let cmd = recording!(self, "resolve_texture");

        self.end_render_pass();

        let dst_sr = dst_subresources.resolve(dst.desc.mip_levels, dst.desc.array_layers, false);
        let src_sr = src_subresources.resolve(src.desc.mip_levels, src.desc.array_layers, false);

        if dst_sr.num_array_layers != src_sr.num_array_layers
            || dst_sr.num_mip_levels != src_sr.num_mip_levels
        {
            log::error!("resolve_texture: mismatched subresource counts");
            return;
        }

        let mut regions = Vec::with_capacity(dst_sr.num_mip_levels as usize);
        for mip in 0..dst_sr.num_mip_levels {
            let dst_mip = mip + dst_sr.base_mip_level;
            regions.push(
                vk::ImageResolve::default()
                    .src_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(mip + src_sr.base_mip_level)
                            .base_array_layer(src_sr.base_array_layer)
                            .layer_count(src_sr.num_array_layers),
                    )
                    .dst_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(dst_mip)
                            .base_array_layer(dst_sr.base_array_layer)
                            .layer_count(dst_sr.num_array_layers),
                    )
                    .extent(vk::Extent3D {
                        width: (dst.desc.width >> dst_mip).max(1),
                        height: (dst.desc.height >> dst_mip).max(1),
                        depth: (dst.desc.depth >> dst_mip).max(1),
                    }),
            );
        }

        if self.enable_automatic_barriers {
            self.tracker
                .require_texture_state(src, src_sr, ResourceStates::RESOLVE_SOURCE);
            self.tracker
                .require_texture_state(dst, dst_sr, ResourceStates::RESOLVE_DEST);
        }
        self.commit_barriers();

        self.reference(ResourceHandle::Texture(Arc::clone(dst)));
        self.reference(ResourceHandle::Texture(Arc::clone(src)));

        unsafe {
            self.device.context.device.cmd_resolve_image(
                cmd,
                src.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            )
        };
    }

    pub fn set_push_constants(&mut self, data: &[u8]) {
        let cmd = recording!(self, "set_push_constants");

        if self.current_pipeline_layout == vk::PipelineLayout::null()
            || self.current_push_constant_stages.is_empty()
        {
            log::error!("set_push_constants: no pipeline with push constants is bound");
            return;
        }

        unsafe {
            self.device.context.device.cmd_push_constants(
                cmd,
                self.current_pipeline_layout,
                self.current_push_constant_stages,
                0,
                data,
            )
        };
    }

    fn set_resource_states_for_binding_set(&mut self, binding: &BindingSetRef) {
        let BindingSetRef::Set(set) = binding else {
            // Bindless tables manage their resources' states explicitly.
            return;
        };

        for item in &set.desc.bindings {
            match item {
                BindingSetItem::UniformBuffer { buffer, .. } => {
                    self.tracker
                        .require_buffer_state(buffer, ResourceStates::CONSTANT_BUFFER);
                }
                BindingSetItem::StorageBuffer { buffer, .. } => {
                    self.tracker
                        .require_buffer_state(buffer, ResourceStates::UNORDERED_ACCESS);
                }
                BindingSetItem::SampledImage {
                    texture,
                    subresources,
                    ..
                } => {
                    self.tracker.require_texture_state(
                        texture,
                        *subresources,
                        ResourceStates::SHADER_RESOURCE,
                    );
                }
                BindingSetItem::StorageImage {
                    texture,
                    subresources,
                    ..
                } => {
                    self.tracker.require_texture_state(
                        texture,
                        *subresources,
                        ResourceStates::UNORDERED_ACCESS,
                    );
                }
                BindingSetItem::SampledImageArray { textures, .. } => {
                    for texture in textures {
                        self.tracker.require_texture_state(
                            texture,
                            ALL_SUBRESOURCES,
                            ResourceStates::SHADER_RESOURCE,
                        );
                    }
                }
            }
        }
    }

    fn set_resource_states_for_framebuffer(&mut self, framebuffer: &FramebufferHandle) {
        for attachment in &framebuffer.desc.color_attachments {
            self.tracker.require_texture_state(
                &attachment.texture,
                attachment.subresources,
                ResourceStates::RENDER_TARGET,
            );
        }
        if let Some(ref attachment) = framebuffer.desc.depth_attachment {
            self.tracker.require_texture_state(
                &attachment.texture,
                attachment.subresources,
                ResourceStates::DEPTH_WRITE,
            );
        }
    }

    fn track_resources_and_barriers(&mut self, state: &GraphicsState) {
        let previous = self.graphics_state.as_ref();

        let bindings_changed = previous.map_or(true, |prev| {
            prev.bindings.len() != state.bindings.len()
                || prev
                    .bindings
                    .iter()
                    .zip(&state.bindings)
                    .any(|(a, b)| !a.ptr_eq(b))
        });
        let index_changed = match (&state.index_buffer, previous.and_then(|p| p.index_buffer.as_ref()))
        {
            (Some(new), Some(old)) => !Arc::ptr_eq(&new.buffer, &old.buffer),
            (Some(_), None) => true,
            (None, _) => false,
        };
        let vertex_changed = previous.map_or(true, |prev| {
            prev.vertex_buffers.len() != state.vertex_buffers.len()
                || prev
                    .vertex_buffers
                    .iter()
                    .zip(&state.vertex_buffers)
                    .any(|(a, b)| {
                        !Arc::ptr_eq(&a.buffer, &b.buffer)
                            || a.slot != b.slot
                            || a.offset != b.offset
                    })
        });
        let framebuffer_changed =
            previous.map_or(true, |prev| !Arc::ptr_eq(&prev.framebuffer, &state.framebuffer));
        let indirect_changed = match (&state.indirect_buffer, previous.and_then(|p| p.indirect_buffer.as_ref()))
        {
            (Some(new), Some(old)) => !Arc::ptr_eq(new, old),
            (Some(_), None) => true,
            (None, _) => false,
        };

        if bindings_changed {
            for binding in &state.bindings {
                self.set_resource_states_for_binding_set(binding);
            }
        }

        if index_changed {
            if let Some(ref index_buffer) = state.index_buffer {
                self.tracker
                    .require_buffer_state(&index_buffer.buffer, ResourceStates::INDEX_BUFFER);
            }
        }

        if vertex_changed {
            for vertex_buffer in &state.vertex_buffers {
                self.tracker
                    .require_buffer_state(&vertex_buffer.buffer, ResourceStates::VERTEX_BUFFER);
            }
        }

        if framebuffer_changed {
            self.set_resource_states_for_framebuffer(&state.framebuffer);
        }

        if indirect_changed {
            if let Some(ref indirect) = state.indirect_buffer {
                self.tracker
                    .require_buffer_state(indirect, ResourceStates::INDIRECT_ARGUMENT);
            }
        }
    }

    /// Binds the complete graphics state: pipeline, descriptors, viewport and
    /// scissor (only when changed), index/vertex buffers (only when changed).
    /// Opens the framebuffer's render pass if none is active.
    pub fn set_graphics_state(&mut self, state: GraphicsState) {
        let cmd = recording!(self, "set_graphics_state");
        let device = Arc::clone(&self.device);

        if self.enable_automatic_barriers {
            self.track_resources_and_barriers(&state);
        }

        let any_barriers = self.tracker.any_barriers();

        let pipeline_changed = self
            .graphics_state
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(&prev.pipeline, &state.pipeline));
        if pipeline_changed {
            unsafe {
                device.context.device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    state.pipeline.pipeline,
                )
            };
            self.reference(ResourceHandle::GraphicsPipeline(Arc::clone(&state.pipeline)));
        }

        let framebuffer_changed = self
            .graphics_state
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(&prev.framebuffer, &state.framebuffer));
        if framebuffer_changed || any_barriers {
            self.end_render_pass();
        }

        self.commit_barriers();

        if !self.render_pass_open {
            let clear_values = framebuffer_clear_values(&state.framebuffer);
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(state.framebuffer.desc.render_pass.render_pass)
                .framebuffer(state.framebuffer.framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D {
                        width: state.framebuffer.info.width,
                        height: state.framebuffer.info.height,
                    },
                })
                .clear_values(&clear_values);
            unsafe {
                device.context.device.cmd_begin_render_pass(
                    cmd,
                    &begin_info,
                    vk::SubpassContents::INLINE,
                )
            };
            self.render_pass_open = true;
            self.reference(ResourceHandle::Framebuffer(Arc::clone(&state.framebuffer)));
        }

        self.current_pipeline_layout = state.pipeline.pipeline_layout;
        self.current_push_constant_stages = state.pipeline.push_constant_stages;

        // Descriptor sets.
        if !state.bindings.is_empty() {
            let descriptor_sets: Vec<vk::DescriptorSet> = state
                .bindings
                .iter()
                .map(|binding| binding.descriptor_set())
                .collect();
            unsafe {
                device.context.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    state.pipeline.pipeline_layout,
                    0,
                    &descriptor_sets,
                    &[],
                )
            };
            for binding in &state.bindings {
                match binding {
                    BindingSetRef::Set(set) => {
                        self.reference(ResourceHandle::BindingSet(Arc::clone(set)));
                    }
                    BindingSetRef::Table(table) => {
                        self.reference(ResourceHandle::DescriptorTable(Arc::clone(table)));
                    }
                }
            }
        }

        // Viewports and scissors, only when changed.
        let viewport_changed = self
            .graphics_state
            .as_ref()
            .map_or(true, |prev| prev.viewport != state.viewport);
        if viewport_changed {
            if !state.viewport.viewports.is_empty() {
                let viewports: Vec<vk::Viewport> = state
                    .viewport
                    .viewports
                    .iter()
                    .map(viewport_to_vk)
                    .collect();
                unsafe { device.context.device.cmd_set_viewport(cmd, 0, &viewports) };
            }
            if !state.viewport.scissors.is_empty() {
                let scissors: Vec<vk::Rect2D> =
                    state.viewport.scissors.iter().map(rect_to_vk).collect();
                unsafe { device.context.device.cmd_set_scissor(cmd, 0, &scissors) };
            }
        }

        // Index buffer.
        let bind_index = match (&state.index_buffer, &self.graphics_state) {
            (Some(new), Some(prev)) => match &prev.index_buffer {
                Some(old) => {
                    !Arc::ptr_eq(&new.buffer, &old.buffer)
                        || new.offset != old.offset
                        || new.format != old.format
                }
                None => true,
            },
            (Some(_), None) => true,
            (None, _) => false,
        };
        if bind_index {
            let index_buffer = state.index_buffer.as_ref().unwrap();
            unsafe {
                device.context.device.cmd_bind_index_buffer(
                    cmd,
                    index_buffer.buffer.buffer,
                    index_buffer.offset,
                    if index_buffer.format == Format::R16Uint {
                        vk::IndexType::UINT16
                    } else {
                        vk::IndexType::UINT32
                    },
                )
            };
            self.reference(ResourceHandle::Buffer(Arc::clone(&index_buffer.buffer)));
        }

        // Vertex buffers.
        let vertex_changed = self.graphics_state.as_ref().map_or(true, |prev| {
            prev.vertex_buffers.len() != state.vertex_buffers.len()
                || prev
                    .vertex_buffers
                    .iter()
                    .zip(&state.vertex_buffers)
                    .any(|(a, b)| {
                        !Arc::ptr_eq(&a.buffer, &b.buffer)
                            || a.slot != b.slot
                            || a.offset != b.offset
                    })
        });
        if vertex_changed {
            for vertex_buffer in &state.vertex_buffers {
                unsafe {
                    device.context.device.cmd_bind_vertex_buffers(
                        cmd,
                        vertex_buffer.slot,
                        &[vertex_buffer.buffer.buffer],
                        &[vertex_buffer.offset],
                    )
                };
            }
            for vertex_buffer in &state.vertex_buffers {
                self.reference(ResourceHandle::Buffer(Arc::clone(&vertex_buffer.buffer)));
            }
        }

        if let Some(ref indirect) = state.indirect_buffer {
            self.reference(ResourceHandle::Buffer(Arc::clone(indirect)));
        }

        self.graphics_state = Some(state);
    }

    pub fn draw(&mut self, args: DrawArguments) {
        let cmd = recording!(self, "draw");
        unsafe {
            self.device.context.device.cmd_draw(
                cmd,
                args.vertex_count,
                args.instance_count,
                args.start_vertex_location,
                args.start_instance_location,
            )
        };
    }

    pub fn draw_indexed(&mut self, args: DrawArguments) {
        let cmd = recording!(self, "draw_indexed");
        unsafe {
            self.device.context.device.cmd_draw_indexed(
                cmd,
                args.vertex_count,
                args.instance_count,
                args.start_index_location,
                args.start_vertex_location as i32,
                args.start_instance_location,
            )
        };
    }

    pub fn draw_indirect(&mut self, offset_bytes: u64, draw_count: u32) {
        let cmd = recording!(self, "draw_indirect");
        let Some(indirect) = self
            .graphics_state
            .as_ref()
            .and_then(|state| state.indirect_buffer.clone())
        else {
            log::error!("draw_indirect: graphics state has no indirect buffer");
            return;
        };
        unsafe {
            self.device.context.device.cmd_draw_indirect(
                cmd,
                indirect.buffer,
                offset_bytes,
                draw_count,
                std::mem::size_of::<vk::DrawIndirectCommand>() as u32,
            )
        };
    }

    /// Binds the compute pipeline and descriptors, tracking every referenced
    /// resource.
    pub fn set_compute_state(&mut self, state: ComputeState) {
        let cmd = recording!(self, "set_compute_state");
        let device = Arc::clone(&self.device);

        self.end_render_pass();

        if self.enable_automatic_barriers {
            for binding in &state.bindings {
                self.set_resource_states_for_binding_set(binding);
            }
            if let Some(ref indirect) = state.indirect_buffer {
                self.tracker
                    .require_buffer_state(indirect, ResourceStates::INDIRECT_ARGUMENT);
            }
        }
        self.commit_barriers();

        let pipeline_changed = self
            .compute_state
            .as_ref()
            .map_or(true, |prev| !Arc::ptr_eq(&prev.pipeline, &state.pipeline));
        if pipeline_changed {
            unsafe {
                device.context.device.cmd_bind_pipeline(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    state.pipeline.pipeline,
                )
            };
            self.reference(ResourceHandle::ComputePipeline(Arc::clone(&state.pipeline)));
        }

        self.current_pipeline_layout = state.pipeline.pipeline_layout;
        self.current_push_constant_stages = vk::ShaderStageFlags::COMPUTE;

        if !state.bindings.is_empty() {
            let descriptor_sets: Vec<vk::DescriptorSet> = state
                .bindings
                .iter()
                .map(|binding| binding.descriptor_set())
                .collect();
            unsafe {
                device.context.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    state.pipeline.pipeline_layout,
                    0,
                    &descriptor_sets,
                    &[],
                )
            };
            for binding in &state.bindings {
                match binding {
                    BindingSetRef::Set(set) => {
                        self.reference(ResourceHandle::BindingSet(Arc::clone(set)));
                    }
                    BindingSetRef::Table(table) => {
                        self.reference(ResourceHandle::DescriptorTable(Arc::clone(table)));
                    }
                }
            }
        }

        if let Some(ref indirect) = state.indirect_buffer {
            self.reference(ResourceHandle::Buffer(Arc::clone(indirect)));
        }

        self.compute_state = Some(state);
    }

    pub fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        let cmd = recording!(self, "dispatch");
        unsafe {
            self.device
                .context
                .device
                .cmd_dispatch(cmd, groups_x, groups_y, groups_z)
        };
    }

    pub fn dispatch_indirect(&mut self, offset_bytes: u64) {
        let cmd = recording!(self, "dispatch_indirect");
        let Some(indirect) = self
            .compute_state
            .as_ref()
            .and_then(|state| state.indirect_buffer.clone())
        else {
            log::error!("dispatch_indirect: compute state has no indirect buffer");
            return;
        };
        unsafe {
            self.device
                .context
                .device
                .cmd_dispatch_indirect(cmd, indirect.buffer, offset_bytes)
        };
    }

    /// Opens a render pass on `framebuffer` without binding pipeline state,
    /// for load/clear side effects.
    pub fn begin_render_pass(&mut self, framebuffer: &FramebufferHandle) {
        let cmd = recording!(self, "begin_render_pass");
        let device = Arc::clone(&self.device);

        if self.render_pass_open {
            self.end_render_pass();
        }

        if self.enable_automatic_barriers {
            self.set_resource_states_for_framebuffer(framebuffer);
        }
        self.commit_barriers();

        let clear_values = framebuffer_clear_values(framebuffer);
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(framebuffer.desc.render_pass.render_pass)
            .framebuffer(framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: framebuffer.info.width,
                    height: framebuffer.info.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            device
                .context
                .device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE)
        };
        self.render_pass_open = true;
        self.reference(ResourceHandle::Framebuffer(Arc::clone(framebuffer)));
    }

    /// Closes the active render pass, if any.
    pub fn end_render_pass(&mut self) {
        if !self.render_pass_open {
            return;
        }
        if let Some(buffer) = self.current.as_ref() {
            unsafe {
                self.device
                    .context
                    .device
                    .cmd_end_render_pass(buffer.command_buffer)
            };
        }
        self.render_pass_open = false;
    }

    pub fn begin_marker(&mut self, name: &str) {
        let cmd = recording!(self, "begin_marker");
        if let Some(debug_utils) = self.device.context.debug_utils_device.as_ref() {
            if let Ok(label_name) = CString::new(name) {
                let label = vk::DebugUtilsLabelEXT::default().label_name(&label_name);
                unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
            }
        }
    }

    pub fn end_marker(&mut self) {
        let cmd = recording!(self, "end_marker");
        if let Some(debug_utils) = self.device.context.debug_utils_device.as_ref() {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
        }
    }

    pub fn set_enable_automatic_barriers(&mut self, enable: bool) {
        self.enable_automatic_barriers = enable;
    }

    pub fn set_enable_ssbo_barriers_for_texture(&mut self, texture: &TextureHandle, enable: bool) {
        self.tracker
            .set_enable_ssbo_barriers_for_texture(texture, enable);
    }

    pub fn set_enable_ssbo_barriers_for_buffer(&mut self, buffer: &BufferHandle, enable: bool) {
        self.tracker
            .set_enable_ssbo_barriers_for_buffer(buffer, enable);
    }

    /// Declares the state `texture` is in when this list starts executing.
    pub fn begin_tracking_texture_state(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state_bits: ResourceStates,
    ) {
        self.tracker
            .begin_tracking_texture_state(texture, subresources, state_bits);
    }

    pub fn begin_tracking_buffer_state(
        &mut self,
        buffer: &BufferHandle,
        state_bits: ResourceStates,
    ) {
        self.tracker.begin_tracking_buffer_state(buffer, state_bits);
    }

    pub fn set_texture_state(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state_bits: ResourceStates,
    ) {
        self.tracker
            .end_tracking_texture_state(texture, subresources, state_bits, false);
    }

    pub fn set_buffer_state(&mut self, buffer: &BufferHandle, state_bits: ResourceStates) {
        self.tracker.end_tracking_buffer_state(buffer, state_bits, false);
    }

    /// Transitions the whole texture and locks it into `state_bits` once this
    /// list is submitted; later requirements become no-ops.
    pub fn set_permanent_texture_state(
        &mut self,
        texture: &TextureHandle,
        state_bits: ResourceStates,
    ) {
        self.tracker
            .end_tracking_texture_state(texture, ALL_SUBRESOURCES, state_bits, true);
    }

    pub fn set_permanent_buffer_state(&mut self, buffer: &BufferHandle, state_bits: ResourceStates) {
        self.tracker.end_tracking_buffer_state(buffer, state_bits, true);
    }

    pub fn get_texture_subresource_state(
        &self,
        texture: &TextureHandle,
        array_layer: u32,
        mip_level: u32,
    ) -> ResourceStates {
        self.tracker
            .texture_subresource_state(texture, array_layer, mip_level)
    }

    pub fn get_buffer_state(&self, buffer: &BufferHandle) -> ResourceStates {
        self.tracker.buffer_state(buffer)
    }

    pub fn require_texture_state(
        &mut self,
        texture: &TextureHandle,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) {
        self.tracker.require_texture_state(texture, subresources, state);
    }

    pub fn require_buffer_state(&mut self, buffer: &BufferHandle, state: ResourceStates) {
        self.tracker.require_buffer_state(buffer, state);
    }

    /// Flushes the tracker's pending barriers into the command buffer as
    /// pipeline barriers, batching runs of identical stage masks.
    pub fn commit_barriers(&mut self) {
        if !self.tracker.any_barriers() {
            return;
        }

        // Barriers cannot live inside a render pass.
        self.end_render_pass();

        let Some(current) = self.current.as_ref() else {
            log::error!("commit_barriers: command list is not recording");
            self.tracker.clear_barriers();
            return;
        };
        let cmd = current.command_buffer;
        let context = Arc::clone(&self.device.context);
        let device = &context.device;

        let (texture_barriers, buffer_barriers) = self.tracker.drain_barriers();

        let mut image_barriers: Vec<vk::ImageMemoryBarrier> = Vec::new();
        let mut before_stages = vk::PipelineStageFlags::empty();
        let mut after_stages = vk::PipelineStageFlags::empty();

        for barrier in &texture_barriers {
            let before = convert::convert_resource_state(barrier.state_before);
            let after = convert::convert_resource_state(barrier.state_after);

            if (before.stage_flags != before_stages || after.stage_flags != after_stages)
                && !image_barriers.is_empty()
            {
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        before_stages,
                        after_stages,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &image_barriers,
                    )
                };
                image_barriers.clear();
            }
            before_stages = before.stage_flags;
            after_stages = after.stage_flags;

            let texture = &barrier.texture;
            let aspect_mask = convert::image_aspect_flags(texture.desc.format);
            let subresource_range = vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(if barrier.entire_texture { 0 } else { barrier.mip_level })
                .level_count(if barrier.entire_texture {
                    texture.desc.mip_levels
                } else {
                    1
                })
                .base_array_layer(if barrier.entire_texture {
                    0
                } else {
                    barrier.array_layer
                })
                .layer_count(if barrier.entire_texture {
                    texture.desc.array_layers
                } else {
                    1
                });

            image_barriers.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(before.access_mask)
                    .dst_access_mask(after.access_mask)
                    .old_layout(before.image_layout)
                    .new_layout(after.image_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(texture.image)
                    .subresource_range(subresource_range),
            );
        }

        if !image_barriers.is_empty() {
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    before_stages,
                    after_stages,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &image_barriers,
                )
            };
        }

        let mut vk_buffer_barriers: Vec<vk::BufferMemoryBarrier> = Vec::new();
        before_stages = vk::PipelineStageFlags::empty();
        after_stages = vk::PipelineStageFlags::empty();

        for barrier in &buffer_barriers {
            let before = convert::convert_resource_state(barrier.state_before);
            let after = convert::convert_resource_state(barrier.state_after);

            if (before.stage_flags != before_stages || after.stage_flags != after_stages)
                && !vk_buffer_barriers.is_empty()
            {
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        before_stages,
                        after_stages,
                        vk::DependencyFlags::empty(),
                        &[],
                        &vk_buffer_barriers,
                        &[],
                    )
                };
                vk_buffer_barriers.clear();
            }
            before_stages = before.stage_flags;
            after_stages = after.stage_flags;

            vk_buffer_barriers.push(
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(before.access_mask)
                    .dst_access_mask(after.access_mask)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(barrier.buffer.buffer)
                    .offset(0)
                    .size(barrier.buffer.desc.byte_size),
            );
        }

        if !vk_buffer_barriers.is_empty() {
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    before_stages,
                    after_stages,
                    vk::DependencyFlags::empty(),
                    &[],
                    &vk_buffer_barriers,
                    &[],
                )
            };
        }
    }

    pub(crate) fn take_current_buffer(&mut self) -> Option<TrackedCommandBuffer> {
        self.current.take()
    }

    /// Called by the device once this list's buffer has been handed to the
    /// queue: promotes permanent states and rolls upload chunks over to the
    /// submitted version.
    pub(crate) fn mark_executed(&mut self, submission_id: u64) {
        self.tracker.command_list_submitted();

        let queue = self.params.queue;
        let recording_version = make_version(self.recording_id, queue, false);
        let submitted_version = make_version(submission_id, queue, true);
        self.upload_manager
            .submit_chunks(recording_version, submitted_version);
        self.scratch_manager
            .submit_chunks(recording_version, submitted_version);
    }
}

fn viewport_to_vk(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

fn rect_to_vk(rect: &Rect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: rect.x, y: rect.y },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("queue", &self.params.queue)
            .field("recording", &self.current.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_write_boundary() {
        let buffer_size = 1 << 20;
        assert!(use_inline_write(65_536, 0, buffer_size));
        assert!(!use_inline_write(65_540, 0, buffer_size));
        // Unaligned destinations always stage.
        assert!(!use_inline_write(16, 2, buffer_size));
        // Padding may not run past the end of the buffer.
        assert!(use_inline_write(6, 0, 8));
        assert!(!use_inline_write(7, 4, 8));
    }
}
