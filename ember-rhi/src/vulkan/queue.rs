//! Queues: pooled tracked command buffers, timeline-semaphore submission,
//! and in-flight retirement.
//!
//! Each queue owns a timeline "tracking" semaphore whose monotonically
//! increasing counter encodes submission identity. A tracked command buffer
//! keeps strong references to every resource it recorded, released only when
//! the tracking semaphore passes its submission id.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;

use crate::error::{Result, RhiError};
use crate::types::CommandQueue;
use crate::versioning::make_version;

use super::command_list::CommandList;
use super::{ResourceHandle, VulkanContext};

use super::buffer::BufferHandle;

/// A backend command buffer with its own transient pool, a recording id, a
/// submission id (0 while unsubmitted), and the resources it references.
pub(crate) struct TrackedCommandBuffer {
    context: Arc<VulkanContext>,
    pub command_buffer: vk::CommandBuffer,
    command_pool: vk::CommandPool,
    pub referenced_resources: Vec<ResourceHandle>,
    pub referenced_staging_buffers: Vec<BufferHandle>,
    pub recording_id: u64,
    pub submission_id: u64,
}

impl TrackedCommandBuffer {
    fn new(context: &Arc<VulkanContext>, queue_family_index: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );
        let command_pool = unsafe { context.device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = match unsafe { context.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(err) => {
                unsafe { context.device.destroy_command_pool(command_pool, None) };
                return Err(err.into());
            }
        };

        Ok(Self {
            context: Arc::clone(context),
            command_buffer: buffers[0],
            command_pool,
            referenced_resources: Vec::new(),
            referenced_staging_buffers: Vec::new(),
            recording_id: 0,
            submission_id: 0,
        })
    }
}

impl Drop for TrackedCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

struct QueueState {
    pool: VecDeque<TrackedCommandBuffer>,
    in_flight: VecDeque<TrackedCommandBuffer>,
    wait_semaphores: Vec<vk::Semaphore>,
    wait_values: Vec<u64>,
    signal_semaphores: Vec<vk::Semaphore>,
    signal_values: Vec<u64>,
    last_recording_id: u64,
}

pub struct Queue {
    context: Arc<VulkanContext>,
    pub(crate) queue: vk::Queue,
    pub(crate) queue_kind: CommandQueue,
    family_index: u32,
    pub(crate) tracking_semaphore: vk::Semaphore,
    state: Mutex<QueueState>,
    last_submitted_id: AtomicU64,
    last_finished_id: AtomicU64,
}

impl Queue {
    pub(crate) fn new(
        context: Arc<VulkanContext>,
        queue: vk::Queue,
        queue_kind: CommandQueue,
        family_index: u32,
    ) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let tracking_semaphore = unsafe { context.device.create_semaphore(&semaphore_info, None)? };

        Ok(Self {
            context,
            queue,
            queue_kind,
            family_index,
            tracking_semaphore,
            state: Mutex::new(QueueState {
                pool: VecDeque::new(),
                in_flight: VecDeque::new(),
                wait_semaphores: Vec::new(),
                wait_values: Vec::new(),
                signal_semaphores: Vec::new(),
                signal_values: Vec::new(),
                last_recording_id: 0,
            }),
            last_submitted_id: AtomicU64::new(0),
            last_finished_id: AtomicU64::new(0),
        })
    }

    /// Hands out a retired command buffer, or creates a fresh one when the
    /// pool is empty. The assigned recording id is monotonic per queue.
    pub(crate) fn get_or_create_command_buffer(&self) -> Result<TrackedCommandBuffer> {
        let mut state = self.state.lock().unwrap();
        state.last_recording_id += 1;
        let recording_id = state.last_recording_id;

        let mut buffer = match state.pool.pop_front() {
            Some(buffer) => buffer,
            None => TrackedCommandBuffer::new(&self.context, self.family_index)?,
        };
        buffer.recording_id = recording_id;
        Ok(buffer)
    }

    /// Stages a semaphore the next submission waits on (binary semaphores
    /// pass 0).
    pub(crate) fn add_wait_semaphore(&self, semaphore: vk::Semaphore, value: u64) {
        if semaphore == vk::Semaphore::null() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.wait_semaphores.push(semaphore);
        state.wait_values.push(value);
    }

    pub(crate) fn add_signal_semaphore(&self, semaphore: vk::Semaphore, value: u64) {
        if semaphore == vk::Semaphore::null() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.signal_semaphores.push(semaphore);
        state.signal_values.push(value);
    }

    /// Submits the lists' recorded command buffers in one timeline
    /// submission. Signals the tracking semaphore with the new submission id
    /// and consumes all staged wait/signal semaphores.
    pub(crate) fn submit(&self, lists: &mut [&mut CommandList]) -> Result<u64> {
        let mut state = self.state.lock().unwrap();

        let submission_id = self.last_submitted_id.fetch_add(1, Ordering::AcqRel) + 1;

        let mut command_buffers = Vec::with_capacity(lists.len());
        for list in lists.iter_mut() {
            let mut buffer = list.take_current_buffer().ok_or(RhiError::InvalidArgument(
                "command list has no recorded command buffer; call begin/end first",
            ))?;
            buffer.submission_id = submission_id;

            for staging in &buffer.referenced_staging_buffers {
                staging
                    .last_use
                    .store(make_version(submission_id, self.queue_kind, true), Ordering::Release);
            }

            command_buffers.push(buffer.command_buffer);
            state.in_flight.push_back(buffer);
        }

        let wait_semaphores = std::mem::take(&mut state.wait_semaphores);
        let wait_values = std::mem::take(&mut state.wait_values);
        let mut signal_semaphores = std::mem::take(&mut state.signal_semaphores);
        let mut signal_values = std::mem::take(&mut state.signal_values);

        signal_semaphores.push(self.tracking_semaphore);
        signal_values.push(submission_id);

        let wait_stages =
            vec![vk::PipelineStageFlags::TOP_OF_PIPE; wait_semaphores.len()];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.context
                .device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())?
        };

        Ok(submission_id)
    }

    /// Moves every in-flight command buffer whose submission the tracking
    /// semaphore has passed back into the pool, dropping its resource
    /// references.
    pub(crate) fn retire_command_buffers(&self) {
        let mut state = self.state.lock().unwrap();

        let last_finished = match self.query_last_finished_id() {
            Ok(id) => id,
            Err(err) => {
                log::error!("failed to read tracking semaphore: {err}");
                return;
            }
        };

        let in_flight = std::mem::take(&mut state.in_flight);
        for mut buffer in in_flight {
            if buffer.submission_id <= last_finished {
                buffer.referenced_resources.clear();
                buffer.referenced_staging_buffers.clear();
                buffer.submission_id = 0;
                state.pool.push_back(buffer);
            } else {
                state.in_flight.push_back(buffer);
            }
        }
    }

    /// Finished counter straight from the device, with the cache refreshed.
    pub(crate) fn completed_instance(&self) -> u64 {
        match self.query_last_finished_id() {
            Ok(value) => value,
            Err(_) => self.last_finished_id(),
        }
    }

    fn query_last_finished_id(&self) -> Result<u64> {
        let value = unsafe {
            self.context
                .device
                .get_semaphore_counter_value(self.tracking_semaphore)?
        };
        self.last_finished_id.store(value, Ordering::Release);
        Ok(value)
    }

    pub fn last_submitted_id(&self) -> u64 {
        self.last_submitted_id.load(Ordering::Acquire)
    }

    pub fn last_finished_id(&self) -> u64 {
        self.last_finished_id.load(Ordering::Acquire)
    }

    /// Non-blocking completion check; consults the cached counter before
    /// querying the device.
    pub fn poll_command_list(&self, submission_id: u64) -> bool {
        if submission_id == 0 || submission_id > self.last_submitted_id() {
            return false;
        }
        if self.last_finished_id() >= submission_id {
            return true;
        }
        match self.query_last_finished_id() {
            Ok(value) => value >= submission_id,
            Err(_) => false,
        }
    }

    /// Blocks until the tracking semaphore reaches `submission_id` or the
    /// timeout elapses.
    pub fn wait_command_list(&self, submission_id: u64, timeout_ns: u64) -> Result<()> {
        if submission_id == 0 || submission_id > self.last_submitted_id() {
            return Err(RhiError::InvalidArgument("waiting on an unsubmitted id"));
        }
        if self.poll_command_list(submission_id) {
            return Ok(());
        }

        let semaphores = [self.tracking_semaphore];
        let values = [submission_id];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.context.device.wait_semaphores(&wait_info, timeout_ns)? };
        self.query_last_finished_id()?;
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_semaphore(self.tracking_semaphore, None);
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("kind", &self.queue_kind)
            .field("last_submitted", &self.last_submitted_id())
            .field("last_finished", &self.last_finished_id())
            .finish_non_exhaustive()
    }
}
