//! Buffer resource.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::error::{Result, RhiError};
use crate::state_tracker::{BufferStateSource, BufferTracking};
use crate::types::{BufferDesc, BufferUsage, CpuAccessMode};

use super::VulkanContext;

/// Persistently mapped pointer of a host-visible buffer. The allocation is
/// HOST_COHERENT, so no flush management is needed.
struct MappedPtr(*mut u8);

// The pointer targets a dedicated allocation owned by the buffer; access
// synchronization is the caller's contract.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

pub struct Buffer {
    context: Arc<VulkanContext>,
    pub(crate) buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    pub desc: BufferDesc,
    pub(crate) tracking: BufferTracking,
    mapped_ptr: Option<MappedPtr>,
    map_active: AtomicBool,
    /// Version tag of the last submission that used this buffer as staging.
    pub(crate) last_use: AtomicU64,
    managed: bool,
}

pub type BufferHandle = Arc<Buffer>;

fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(crate) fn create_buffer(
    context: &Arc<VulkanContext>,
    desc: BufferDesc,
) -> Result<BufferHandle> {
    let size = desc.byte_size.max(1);

    // Every buffer can participate in copies.
    let usage_flags = buffer_usage_to_vk(desc.usage)
        | vk::BufferUsageFlags::TRANSFER_SRC
        | vk::BufferUsageFlags::TRANSFER_DST;

    let create_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage_flags)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { context.device.create_buffer(&create_info, None)? };

    let requirements = unsafe { context.device.get_buffer_memory_requirements(buffer) };
    let memory_flags = match desc.cpu_access {
        CpuAccessMode::None => vk::MemoryPropertyFlags::DEVICE_LOCAL,
        _ => vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    };

    let memory_type_index = match context.find_memory_type(requirements.memory_type_bits, memory_flags)
    {
        Some(index) => index,
        None => {
            unsafe { context.device.destroy_buffer(buffer, None) };
            return Err(RhiError::OutOfMemory);
        }
    };

    let allocate_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { context.device.allocate_memory(&allocate_info, None) } {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { context.device.destroy_buffer(buffer, None) };
            return Err(err.into());
        }
    };

    unsafe { context.device.bind_buffer_memory(buffer, memory, 0)? };

    // Host-visible buffers stay mapped for their whole lifetime.
    let mapped_ptr = if desc.cpu_access != CpuAccessMode::None {
        let ptr = unsafe {
            context
                .device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
        };
        Some(MappedPtr(ptr.cast()))
    } else {
        None
    };

    let tracking = BufferTracking::new(&desc);

    Ok(Arc::new(Buffer {
        context: Arc::clone(context),
        buffer,
        memory,
        desc,
        tracking,
        mapped_ptr,
        map_active: AtomicBool::new(false),
        last_use: AtomicU64::new(0),
        managed: true,
    }))
}

/// Wraps a pre-existing VkBuffer. With `take_ownership`, the handle destroys
/// the buffer (but never the memory, which it does not know about).
pub(crate) fn create_handle_for_native_buffer(
    context: &Arc<VulkanContext>,
    buffer: vk::Buffer,
    desc: BufferDesc,
    take_ownership: bool,
) -> BufferHandle {
    let tracking = BufferTracking::new(&desc);
    Arc::new(Buffer {
        context: Arc::clone(context),
        buffer,
        memory: vk::DeviceMemory::null(),
        desc,
        tracking,
        mapped_ptr: None,
        map_active: AtomicBool::new(false),
        last_use: AtomicU64::new(0),
        managed: take_ownership,
    })
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.desc.byte_size
    }

    pub fn host_visible(&self) -> bool {
        self.desc.cpu_access != CpuAccessMode::None
    }

    /// Returns the stable mapped pointer. Legal only on host-visible buffers;
    /// double-map is rejected. Synchronization against in-flight GPU writes is
    /// the caller's responsibility (wait on the owning queue first).
    pub(crate) fn map(&self) -> Result<NonNull<u8>> {
        let ptr = self
            .mapped_ptr
            .as_ref()
            .ok_or(RhiError::InvalidArgument("map on a non-host-visible buffer"))?;
        if self.map_active.swap(true, Ordering::AcqRel) {
            return Err(RhiError::InvalidArgument("buffer is already mapped"));
        }
        NonNull::new(ptr.0).ok_or(RhiError::InvalidArgument("buffer mapping is null"))
    }

    pub(crate) fn unmap(&self) {
        self.map_active.store(false, Ordering::Release);
    }

    /// Pointer for internal writes (upload chunks); does not touch the
    /// map/unmap bookkeeping.
    pub(crate) fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped_ptr.as_ref().map(|ptr| ptr.0)
    }
}

impl BufferStateSource for Buffer {
    fn tracking(&self) -> &BufferTracking {
        &self.tracking
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped_ptr.take().is_some() {
                self.context.device.unmap_memory(self.memory);
            }
            if self.managed && self.buffer != vk::Buffer::null() {
                self.context.device.destroy_buffer(self.buffer, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.context.device.free_memory(self.memory, None);
            }
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.desc.byte_size)
            .field("usage", &self.desc.usage)
            .field("cpu_access", &self.desc.cpu_access)
            .finish_non_exhaustive()
    }
}
