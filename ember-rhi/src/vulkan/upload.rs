//! Suballocated staging chunks for buffer writes and texture uploads.
//!
//! Chunks are tagged with a version (see [`crate::versioning`]); a chunk
//! whose submitted version has been passed by its queue's finished counter is
//! recycled instead of allocating new memory.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Result, RhiError};
use crate::types::{BufferDesc, BufferUsage, CpuAccessMode};
use crate::versioning::{version_id, version_submitted};

use super::buffer::{create_buffer, BufferHandle};
use super::VulkanContext;

pub(crate) const CHUNK_SIZE_ALIGNMENT: u64 = 4096;
pub(crate) const DEFAULT_SUBALLOCATION_ALIGNMENT: u64 = 256;

fn align(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

struct BufferChunk {
    buffer: BufferHandle,
    buffer_size: u64,
    write_pointer: u64,
    version: u64,
}

pub(crate) struct UploadAllocation {
    pub buffer: BufferHandle,
    pub offset: u64,
    /// Host pointer at `offset`, present for mapped (non-scratch) chunks.
    pub mapped_ptr: Option<*mut u8>,
}

pub(crate) struct UploadManager {
    context: Arc<VulkanContext>,
    default_chunk_size: u64,
    memory_limit: u64,
    allocated_memory: u64,
    /// Scratch managers hand out device-local storage chunks instead of
    /// host-mapped staging memory.
    is_scratch: bool,
    chunk_pool: VecDeque<BufferChunk>,
    current_chunk: Option<BufferChunk>,
}

impl UploadManager {
    pub fn new(
        context: Arc<VulkanContext>,
        default_chunk_size: u64,
        memory_limit: u64,
        is_scratch: bool,
    ) -> Self {
        Self {
            context,
            default_chunk_size,
            memory_limit,
            allocated_memory: 0,
            is_scratch,
            chunk_pool: VecDeque::new(),
            current_chunk: None,
        }
    }

    fn create_chunk(&self, size: u64) -> Result<BufferChunk> {
        let desc = if self.is_scratch {
            BufferDesc {
                byte_size: size,
                usage: BufferUsage::STORAGE,
                cpu_access: CpuAccessMode::None,
                debug_name: "scratch chunk".to_string(),
                ..Default::default()
            }
        } else {
            BufferDesc {
                byte_size: size,
                cpu_access: CpuAccessMode::Write,
                debug_name: "upload chunk".to_string(),
                ..Default::default()
            }
        };

        let buffer = create_buffer(&self.context, desc)?;
        Ok(BufferChunk {
            buffer,
            buffer_size: size,
            write_pointer: 0,
            version: 0,
        })
    }

    /// Carves `size` bytes out of the current chunk, recycling or allocating
    /// a chunk when it does not fit. `completed_instance` is the finished
    /// counter of the queue encoded in `current_version`.
    pub fn suballocate(
        &mut self,
        size: u64,
        alignment: u64,
        current_version: u64,
        completed_instance: u64,
    ) -> Result<UploadAllocation> {
        let mut retired_chunk = None;

        if let Some(chunk) = self.current_chunk.as_mut() {
            let aligned_offset = align(chunk.write_pointer, alignment.max(1));
            let chunk_end = aligned_offset + size;

            if chunk_end <= chunk.buffer_size {
                chunk.write_pointer = chunk_end;
                let mapped_ptr = chunk
                    .buffer
                    .mapped_ptr()
                    .map(|ptr| unsafe { ptr.add(aligned_offset as usize) });
                return Ok(UploadAllocation {
                    buffer: Arc::clone(&chunk.buffer),
                    offset: aligned_offset,
                    mapped_ptr,
                });
            }

            retired_chunk = self.current_chunk.take();
        }

        // Recycle the first pooled chunk whose submission has completed.
        for index in 0..self.chunk_pool.len() {
            let chunk = &mut self.chunk_pool[index];
            if version_submitted(chunk.version) && version_id(chunk.version) <= completed_instance {
                chunk.version = 0;
            }
            if chunk.version == 0 && chunk.buffer_size >= size {
                self.current_chunk = self.chunk_pool.remove(index);
                break;
            }
        }

        if let Some(chunk) = retired_chunk {
            self.chunk_pool.push_back(chunk);
        }

        if self.current_chunk.is_none() {
            let size_to_allocate =
                align(size.max(self.default_chunk_size), CHUNK_SIZE_ALIGNMENT);
            if self.memory_limit > 0
                && self.allocated_memory + size_to_allocate > self.memory_limit
            {
                return Err(RhiError::OutOfUploadMemory);
            }
            self.current_chunk = Some(self.create_chunk(size_to_allocate)?);
            self.allocated_memory += size_to_allocate;
        }

        let chunk = self.current_chunk.as_mut().unwrap();
        chunk.version = current_version;
        chunk.write_pointer = size;

        Ok(UploadAllocation {
            buffer: Arc::clone(&chunk.buffer),
            offset: 0,
            mapped_ptr: chunk.buffer.mapped_ptr(),
        })
    }

    /// Called at command-list submission: parks the current chunk and retags
    /// every chunk recorded under `current_version` with the submitted
    /// version.
    pub fn submit_chunks(&mut self, current_version: u64, submitted_version: u64) {
        if let Some(chunk) = self.current_chunk.take() {
            self.chunk_pool.push_back(chunk);
        }

        for chunk in &mut self.chunk_pool {
            if chunk.version == current_version {
                chunk.version = submitted_version;
            }
        }
    }

    pub fn allocated_memory(&self) -> u64 {
        self.allocated_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_rounds_up_to_pow2() {
        assert_eq!(align(0, 256), 0);
        assert_eq!(align(1, 256), 256);
        assert_eq!(align(256, 256), 256);
        assert_eq!(align(28000, 4096), 28672);
    }
}
