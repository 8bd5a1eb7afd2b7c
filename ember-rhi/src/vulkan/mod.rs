//! Vulkan backend: the shared context, the device facade with its resource
//! factories, and the submission surface.

mod bindings;
mod buffer;
mod command_list;
mod convert;
mod instance;
mod physical;
mod pipeline;
mod queue;
mod render_pass;
mod sampler;
mod shader;
mod swapchain;
mod texture;
mod upload;

use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::error::{Result, RhiError};
use crate::format::Format;
use crate::types::{
    BindingLayoutDesc, BindlessLayoutDesc, BufferDesc, CommandListParameters, CommandQueue,
    CpuAccessMode, DeviceDesc, RenderPassDesc, SamplerDesc, ShaderDesc, TextureDesc,
    TextureSlice, VertexAttributeDesc, COMMAND_QUEUE_COUNT,
};

pub use bindings::{
    BindingLayout, BindingLayoutHandle, BindingSet, BindingSetDesc, BindingSetHandle,
    BindingSetItem, BindingSetRef, DescriptorTable, DescriptorTableHandle,
};
pub use buffer::{Buffer, BufferHandle};
pub use command_list::{
    CommandList, ComputeState, GraphicsState, IndexBufferBinding, VertexBufferBinding,
};
pub use pipeline::{
    ComputePipeline, ComputePipelineDesc, ComputePipelineHandle, GraphicsPipeline,
    GraphicsPipelineDesc, GraphicsPipelineHandle, InputLayout, InputLayoutHandle,
};
pub use queue::Queue;
pub use render_pass::{
    Framebuffer, FramebufferAttachment, FramebufferDesc, FramebufferHandle, FramebufferInfo,
    RenderPass, RenderPassHandle,
};
pub use sampler::{Sampler, SamplerHandle};
pub use shader::{Shader, ShaderHandle, ShaderLibrary, ShaderLibraryHandle};
pub use swapchain::Swapchain;
pub use texture::{
    StagingRegion, StagingTexture, StagingTextureHandle, Texture, TextureHandle,
    TextureSubresourceView, TextureSubresourceViewType,
};

/// Shared backend state every resource keeps alive: instance, logical
/// device, surface, and the queue-family topology.
pub(crate) struct VulkanContext {
    #[allow(dead_code)]
    entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    pub(crate) debug_utils_device: Option<ash::ext::debug_utils::Device>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) graphics_family: u32,
    pub(crate) present_family: u32,
    #[allow(dead_code)]
    pub(crate) compute_family: u32,
}

impl VulkanContext {
    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        (0..self.memory_properties.memory_type_count).find(|&index| {
            let suitable = (type_bits & (1 << index)) != 0;
            let memory_type = &self.memory_properties.memory_types[index as usize];
            suitable && memory_type.property_flags.contains(flags)
        })
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(ref debug_utils) = self.debug_utils {
                if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
                    debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Any strong resource reference a tracked command buffer can hold.
pub enum ResourceHandle {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    StagingTexture(StagingTextureHandle),
    Sampler(SamplerHandle),
    Shader(ShaderHandle),
    RenderPass(RenderPassHandle),
    Framebuffer(FramebufferHandle),
    GraphicsPipeline(GraphicsPipelineHandle),
    ComputePipeline(ComputePipelineHandle),
    BindingSet(BindingSetHandle),
    DescriptorTable(DescriptorTableHandle),
}

struct PresentState {
    /// Semaphore of the last swapchain acquire, consumed by the next
    /// graphics submission.
    pending_acquire_semaphore: Option<vk::Semaphore>,
}

pub(crate) struct DeviceInner {
    pub(crate) context: Arc<VulkanContext>,
    queues: [Option<Arc<Queue>>; COMMAND_QUEUE_COUNT],
    swapchain: Mutex<Swapchain>,
    present_state: Mutex<PresentState>,
    render_finished: vk::Semaphore,
}

impl DeviceInner {
    pub(crate) fn queue(&self, kind: CommandQueue) -> Result<&Arc<Queue>> {
        self.queues[kind.index()]
            .as_ref()
            .ok_or(RhiError::InvalidArgument("queue kind not available"))
    }

    /// Finished counter of one queue's tracking semaphore, straight from the
    /// device.
    pub(crate) fn queue_completed_instance(&self, kind: CommandQueue) -> u64 {
        match self.queue(kind) {
            Ok(queue) => queue.completed_instance(),
            Err(_) => 0,
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        // Closing the device implies waiting for all in-flight work.
        let _ = unsafe { self.context.device.device_wait_idle() };
        for queue in self.queues.iter().flatten() {
            queue.retire_command_buffers();
        }
        unsafe {
            self.context.device.destroy_semaphore(self.render_finished, None);
        }
    }
}

/// The device: owns the context, queues, and swapchain, and hands out
/// reference-counted resource handles.
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(desc: &DeviceDesc) -> Result<Device> {
        let entry = unsafe {
            ash::Entry::load().map_err(|_| RhiError::Unsupported("Vulkan loader not found"))?
        };

        let instance_bundle = instance::create_instance(&entry, desc.display_handle)?;
        let surface = instance::create_surface(
            &entry,
            &instance_bundle.instance,
            desc.display_handle,
            desc.window_handle,
        )?;
        let surface_loader =
            ash::khr::surface::Instance::new(&entry, &instance_bundle.instance);

        let device_bundle = physical::create_device(
            &instance_bundle.instance,
            &surface_loader,
            surface,
            &desc.device_extensions,
        )?;

        let swapchain_loader =
            ash::khr::swapchain::Device::new(&instance_bundle.instance, &device_bundle.device);
        let debug_utils_device = instance_bundle.debug_utils.as_ref().map(|_| {
            ash::ext::debug_utils::Device::new(&instance_bundle.instance, &device_bundle.device)
        });

        let memory_properties = unsafe {
            instance_bundle
                .instance
                .get_physical_device_memory_properties(device_bundle.physical_device)
        };

        let context = Arc::new(VulkanContext {
            entry,
            instance: instance_bundle.instance,
            debug_utils: instance_bundle.debug_utils,
            debug_messenger: instance_bundle.debug_messenger,
            debug_utils_device,
            physical_device: device_bundle.physical_device,
            device: device_bundle.device,
            surface,
            surface_loader,
            swapchain_loader,
            memory_properties,
            graphics_family: device_bundle.families.graphics,
            present_family: device_bundle.families.present,
            compute_family: device_bundle.families.compute,
        });

        let queues = [
            Some(Arc::new(Queue::new(
                Arc::clone(&context),
                device_bundle.graphics_queue,
                CommandQueue::Graphics,
                device_bundle.families.graphics,
            )?)),
            Some(Arc::new(Queue::new(
                Arc::clone(&context),
                device_bundle.present_queue,
                CommandQueue::Present,
                device_bundle.families.present,
            )?)),
            Some(Arc::new(Queue::new(
                Arc::clone(&context),
                device_bundle.compute_queue,
                CommandQueue::Compute,
                device_bundle.families.compute,
            )?)),
        ];

        let swapchain = swapchain::create_swapchain(
            &context,
            desc.framebuffer_width,
            desc.framebuffer_height,
        )?;

        let render_finished = unsafe {
            context
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };

        Ok(Device {
            inner: Arc::new(DeviceInner {
                context,
                queues,
                swapchain: Mutex::new(swapchain),
                present_state: Mutex::new(PresentState {
                    pending_acquire_semaphore: None,
                }),
                render_finished,
            }),
        })
    }

    /*
     * Resource factories.
     */

    pub fn create_buffer(&self, desc: BufferDesc) -> Result<BufferHandle> {
        buffer::create_buffer(&self.inner.context, desc)
    }

    pub fn create_handle_for_native_buffer(
        &self,
        raw: vk::Buffer,
        desc: BufferDesc,
        take_ownership: bool,
    ) -> BufferHandle {
        buffer::create_handle_for_native_buffer(&self.inner.context, raw, desc, take_ownership)
    }

    pub fn create_texture(&self, desc: TextureDesc) -> Result<TextureHandle> {
        texture::create_texture(&self.inner.context, desc)
    }

    pub fn create_handle_for_native_texture(
        &self,
        raw: vk::Image,
        desc: TextureDesc,
        take_ownership: bool,
    ) -> TextureHandle {
        texture::create_handle_for_native_texture(&self.inner.context, raw, desc, take_ownership)
    }

    pub fn create_staging_texture(
        &self,
        desc: TextureDesc,
        cpu_access: CpuAccessMode,
    ) -> Result<StagingTextureHandle> {
        texture::create_staging_texture(&self.inner.context, desc, cpu_access)
    }

    pub fn create_sampler(&self, desc: SamplerDesc) -> Result<SamplerHandle> {
        sampler::create_sampler(&self.inner.context, desc)
    }

    pub fn create_shader(&self, desc: ShaderDesc, bytes: &[u8]) -> Result<ShaderHandle> {
        shader::create_shader(&self.inner.context, desc, bytes)
    }

    pub fn create_shader_library(&self, bytes: &[u8]) -> Result<ShaderLibraryHandle> {
        shader::create_shader_library(&self.inner.context, bytes)
    }

    pub fn create_input_layout(&self, attributes: Vec<VertexAttributeDesc>) -> InputLayoutHandle {
        pipeline::create_input_layout(attributes)
    }

    pub fn create_render_pass(&self, desc: RenderPassDesc) -> Result<RenderPassHandle> {
        render_pass::create_render_pass(&self.inner.context, desc)
    }

    pub fn create_framebuffer(&self, desc: FramebufferDesc) -> Result<FramebufferHandle> {
        render_pass::create_framebuffer(&self.inner.context, desc)
    }

    pub fn create_graphics_pipeline(
        &self,
        desc: GraphicsPipelineDesc,
    ) -> Result<GraphicsPipelineHandle> {
        pipeline::create_graphics_pipeline(&self.inner.context, desc)
    }

    pub fn create_compute_pipeline(
        &self,
        desc: ComputePipelineDesc,
    ) -> Result<ComputePipelineHandle> {
        pipeline::create_compute_pipeline(&self.inner.context, desc)
    }

    pub fn create_binding_layout(&self, desc: BindingLayoutDesc) -> Result<BindingLayoutHandle> {
        bindings::create_binding_layout(&self.inner.context, desc)
    }

    pub fn create_bindless_layout(&self, desc: BindlessLayoutDesc) -> Result<BindingLayoutHandle> {
        bindings::create_bindless_layout(&self.inner.context, desc)
    }

    pub fn create_binding_set(
        &self,
        desc: BindingSetDesc,
        layout: &BindingLayoutHandle,
    ) -> Result<BindingSetHandle> {
        bindings::create_binding_set(&self.inner.context, desc, layout)
    }

    pub fn create_descriptor_table(
        &self,
        layout: &BindingLayoutHandle,
    ) -> Result<DescriptorTableHandle> {
        bindings::create_descriptor_table(&self.inner.context, layout)
    }

    pub fn write_descriptor_table(
        &self,
        table: &DescriptorTableHandle,
        item: &BindingSetItem,
    ) -> Result<()> {
        table.write(item)
    }

    pub fn resize_descriptor_table(
        &self,
        table: &DescriptorTableHandle,
        new_capacity: u32,
        keep_contents: bool,
    ) -> Result<()> {
        table.resize(new_capacity, keep_contents)
    }

    pub fn create_command_list(&self, params: CommandListParameters) -> CommandList {
        CommandList::new(Arc::clone(&self.inner), params)
    }

    /*
     * Mapping.
     */

    /// Maps a host-visible buffer, returning a pointer stable until the
    /// matching `unmap_buffer`. The caller must ensure any in-flight GPU
    /// write to the buffer has finished (`wait_command_list`).
    pub fn map_buffer(&self, buffer: &BufferHandle, access: CpuAccessMode) -> Result<NonNull<u8>> {
        if access == CpuAccessMode::None {
            return Err(RhiError::InvalidArgument("map access mode must be read or write"));
        }
        buffer.map()
    }

    pub fn unmap_buffer(&self, buffer: &BufferHandle) {
        buffer.unmap();
    }

    /// Maps one staging-texture slice; returns the pointer and the row pitch
    /// of the slice's mip level.
    pub fn map_staging_texture(
        &self,
        staging: &StagingTextureHandle,
        slice: &TextureSlice,
        access: CpuAccessMode,
    ) -> Result<(NonNull<u8>, u64)> {
        if access == CpuAccessMode::None {
            return Err(RhiError::InvalidArgument("map access mode must be read or write"));
        }
        let slice = slice.resolve(&staging.desc);
        let region = staging.get_slice_region(slice.mip_level, slice.array_layer, slice.z);
        let base = staging.buffer.map()?;
        let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(region.offset as usize)) };
        Ok((ptr, staging.row_pitch(slice.mip_level)))
    }

    pub fn unmap_staging_texture(&self, staging: &StagingTextureHandle) {
        staging.buffer.unmap();
    }

    /*
     * Submission.
     */

    /// Submits the lists to `queue` in recording order and returns the
    /// submission id signaled on that queue's tracking semaphore. The first
    /// graphics submission after an acquire waits on the acquire semaphore
    /// and signals the render-finished semaphore consumed by `present`.
    pub fn execute_command_lists(
        &self,
        lists: &mut [&mut CommandList],
        queue_kind: CommandQueue,
    ) -> Result<u64> {
        for list in lists.iter() {
            if list.parameters().queue != queue_kind {
                return Err(RhiError::InvalidArgument(
                    "command list was recorded for a different queue",
                ));
            }
        }

        let queue = self.inner.queue(queue_kind)?;

        if queue_kind == CommandQueue::Graphics {
            let mut present_state = self.inner.present_state.lock().unwrap();
            if let Some(semaphore) = present_state.pending_acquire_semaphore.take() {
                queue.add_wait_semaphore(semaphore, 0);
                queue.add_signal_semaphore(self.inner.render_finished, 0);
            }
        }

        let submission_id = queue.submit(lists)?;
        for list in lists.iter_mut() {
            list.mark_executed(submission_id);
        }
        Ok(submission_id)
    }

    pub fn execute_command_list(&self, list: &mut CommandList) -> Result<u64> {
        let queue = list.parameters().queue;
        self.execute_command_lists(&mut [list], queue)
    }

    /// Makes `wait_queue` wait for `execution_queue` to pass
    /// `submission_id` before executing its next submission.
    pub fn queue_wait_for_command_list(
        &self,
        wait_queue: CommandQueue,
        execution_queue: CommandQueue,
        submission_id: u64,
    ) -> Result<()> {
        let execution = self.inner.queue(execution_queue)?;
        let wait = self.inner.queue(wait_queue)?;
        wait.add_wait_semaphore(execution.tracking_semaphore, submission_id);
        Ok(())
    }

    pub fn poll_command_list(&self, queue_kind: CommandQueue, submission_id: u64) -> bool {
        match self.inner.queue(queue_kind) {
            Ok(queue) => queue.poll_command_list(submission_id),
            Err(_) => false,
        }
    }

    pub fn wait_command_list(
        &self,
        queue_kind: CommandQueue,
        submission_id: u64,
        timeout_ns: u64,
    ) -> Result<()> {
        self.inner
            .queue(queue_kind)?
            .wait_command_list(submission_id, timeout_ns)
    }

    pub fn last_finished_id(&self, queue_kind: CommandQueue) -> u64 {
        match self.inner.queue(queue_kind) {
            Ok(queue) => queue.last_finished_id(),
            Err(_) => 0,
        }
    }

    /// Blocks until every queue is idle, then retires all command buffers.
    pub fn wait_for_idle(&self) -> Result<()> {
        unsafe { self.inner.context.device.device_wait_idle()? };
        self.cleanup();
        Ok(())
    }

    /// Retires finished command buffers on every queue, releasing their
    /// resource references.
    pub fn cleanup(&self) {
        for queue in self.inner.queues.iter().flatten() {
            queue.retire_command_buffers();
        }
    }

    /*
     * Swapchain.
     */

    /// Acquires the next swapchain image. The acquire's semaphore is waited
    /// on by the next graphics submission.
    pub fn acquire_next_image(&self) -> Result<u32> {
        let mut swapchain = self.inner.swapchain.lock().unwrap();
        let (index, semaphore) = swapchain.acquire_next_image()?;
        self.inner
            .present_state
            .lock()
            .unwrap()
            .pending_acquire_semaphore = Some(semaphore);
        Ok(index)
    }

    /// Presents the acquired image, waiting on the render-finished semaphore
    /// signaled by the frame's graphics submission.
    pub fn present(&self) -> Result<()> {
        let present_queue = self.inner.queue(CommandQueue::Present)?.queue;
        let mut swapchain = self.inner.swapchain.lock().unwrap();
        swapchain.present(present_queue, self.inner.render_finished)
    }

    pub fn swapchain_format(&self) -> Format {
        self.inner.swapchain.lock().unwrap().format()
    }

    pub fn swapchain_extent(&self) -> (u32, u32) {
        self.inner.swapchain.lock().unwrap().extent()
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.inner.swapchain.lock().unwrap().image_count()
    }

    pub fn swapchain_image(&self, index: usize) -> TextureHandle {
        self.inner.swapchain.lock().unwrap().image(index)
    }

    pub fn current_swapchain_image_index(&self) -> u32 {
        self.inner.swapchain.lock().unwrap().current_image_index()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").finish_non_exhaustive()
    }
}

/// Clear values for a framebuffer's attachments, from the textures' declared
/// clear colors.
pub(crate) fn framebuffer_clear_values(framebuffer: &FramebufferHandle) -> Vec<vk::ClearValue> {
    let mut clear_values = Vec::new();
    for attachment in &framebuffer.desc.color_attachments {
        let color = attachment
            .texture
            .desc
            .clear_value
            .unwrap_or(crate::types::Color::new(0.0, 0.0, 0.0, 1.0));
        clear_values.push(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [color.r, color.g, color.b, color.a],
            },
        });
    }
    if framebuffer.desc.depth_attachment.is_some() {
        clear_values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });
    }
    clear_values
}
