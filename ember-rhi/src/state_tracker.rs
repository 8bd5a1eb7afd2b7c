//! Automatic resource-state tracking for command lists.
//!
//! The tracker accumulates the image and buffer barriers a command list must
//! flush before dependent operations. Per texture it keeps either one
//! whole-texture state or a dense `mip x layer` vector of per-subresource
//! states, lazily expanding from the former to the latter the first time a
//! partial update touches a tracked texture. Permanent states, once committed
//! at submission, supersede tracking entirely.
//!
//! The tracker is generic over the resource types through
//! [`TextureStateSource`] / [`BufferStateSource`] so it stays independent of
//! the backend (and host-testable); the Vulkan resources implement the traits
//! by exposing their embedded [`TextureTracking`] / [`BufferTracking`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::types::{
    BufferDesc, CpuAccessMode, ResourceStates, TextureDesc, TextureSubresourceSet,
    ALL_SUBRESOURCES,
};

/// Per-texture tracking state shared across command lists. Lives inside the
/// texture resource; the permanent state and initialization flag are written
/// at submission time, possibly from another thread's submit.
#[derive(Debug)]
pub struct TextureTracking {
    pub mip_levels: u32,
    pub array_layers: u32,
    pub initial_state: ResourceStates,
    pub keep_initial_state: bool,
    permanent_state: AtomicU32,
    state_initialized: AtomicBool,
}

impl TextureTracking {
    pub fn new(desc: &TextureDesc) -> Self {
        Self {
            mip_levels: desc.mip_levels.max(1),
            array_layers: desc.array_layers.max(1),
            initial_state: desc.initial_state,
            keep_initial_state: desc.keep_initial_state,
            permanent_state: AtomicU32::new(0),
            state_initialized: AtomicBool::new(false),
        }
    }

    pub fn permanent_state(&self) -> ResourceStates {
        ResourceStates::from_bits_retain(self.permanent_state.load(Ordering::Acquire))
    }

    pub fn set_permanent_state(&self, state: ResourceStates) {
        self.permanent_state.store(state.bits(), Ordering::Release);
    }

    pub fn state_initialized(&self) -> bool {
        self.state_initialized.load(Ordering::Acquire)
    }

    pub fn mark_state_initialized(&self) {
        self.state_initialized.store(true, Ordering::Release);
    }

    pub fn num_subresources(&self) -> u32 {
        self.mip_levels * self.array_layers
    }

    fn subresource_index(&self, mip_level: u32, array_layer: u32) -> usize {
        (mip_level + array_layer * self.mip_levels) as usize
    }
}

/// Per-buffer tracking state shared across command lists.
#[derive(Debug)]
pub struct BufferTracking {
    pub is_volatile: bool,
    pub cpu_access: CpuAccessMode,
    pub initial_state: ResourceStates,
    pub keep_initial_state: bool,
    permanent_state: AtomicU32,
}

impl BufferTracking {
    pub fn new(desc: &BufferDesc) -> Self {
        Self {
            is_volatile: desc.is_volatile,
            cpu_access: desc.cpu_access,
            initial_state: desc.initial_state,
            keep_initial_state: desc.keep_initial_state,
            permanent_state: AtomicU32::new(0),
        }
    }

    pub fn permanent_state(&self) -> ResourceStates {
        ResourceStates::from_bits_retain(self.permanent_state.load(Ordering::Acquire))
    }

    pub fn set_permanent_state(&self, state: ResourceStates) {
        self.permanent_state.store(state.bits(), Ordering::Release);
    }
}

pub trait TextureStateSource {
    fn tracking(&self) -> &TextureTracking;
}

pub trait BufferStateSource {
    fn tracking(&self) -> &BufferTracking;
}

pub fn verify_permanent_resource_state(
    permanent_state: ResourceStates,
    required_state: ResourceStates,
) -> bool {
    permanent_state.contains(required_state)
}

/// Per-list state of one texture: a single whole-texture state until a
/// partial update forces expansion into per-subresource states.
struct TextureState {
    subresource_states: Vec<ResourceStates>,
    state: ResourceStates,
    permanent_transition: bool,
    enable_ssbo_barriers: bool,
    first_ssbo_barrier_placed: bool,
}

impl TextureState {
    fn new() -> Self {
        Self {
            subresource_states: Vec::new(),
            state: ResourceStates::UNKNOWN,
            permanent_transition: false,
            enable_ssbo_barriers: true,
            first_ssbo_barrier_placed: false,
        }
    }
}

struct BufferState {
    state: ResourceStates,
    enable_ssbo_barriers: bool,
    first_ssbo_barrier_placed: bool,
}

impl BufferState {
    fn new() -> Self {
        Self {
            state: ResourceStates::UNKNOWN,
            enable_ssbo_barriers: true,
            first_ssbo_barrier_placed: false,
        }
    }
}

/// A pending image transition. `entire_texture` selects the full subresource
/// range; otherwise the barrier covers exactly one (mip, layer).
pub struct TextureBarrier<T> {
    pub texture: Arc<T>,
    pub mip_level: u32,
    pub array_layer: u32,
    pub entire_texture: bool,
    pub state_before: ResourceStates,
    pub state_after: ResourceStates,
}

pub struct BufferBarrier<B> {
    pub buffer: Arc<B>,
    pub state_before: ResourceStates,
    pub state_after: ResourceStates,
}

fn key_of<T>(handle: &Arc<T>) -> usize {
    Arc::as_ptr(handle) as usize
}

pub struct CommandListResourceStateTracker<T, B> {
    texture_states: HashMap<usize, (Arc<T>, TextureState)>,
    buffer_states: HashMap<usize, (Arc<B>, BufferState)>,

    permanent_texture_states: Vec<(Arc<T>, ResourceStates)>,
    permanent_buffer_states: Vec<(Arc<B>, ResourceStates)>,

    texture_barriers: Vec<TextureBarrier<T>>,
    buffer_barriers: Vec<BufferBarrier<B>>,
}

impl<T: TextureStateSource, B: BufferStateSource> Default
    for CommandListResourceStateTracker<T, B>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TextureStateSource, B: BufferStateSource> CommandListResourceStateTracker<T, B> {
    pub fn new() -> Self {
        Self {
            texture_states: HashMap::new(),
            buffer_states: HashMap::new(),
            permanent_texture_states: Vec::new(),
            permanent_buffer_states: Vec::new(),
            texture_barriers: Vec::new(),
            buffer_barriers: Vec::new(),
        }
    }

    pub fn set_enable_ssbo_barriers_for_texture(&mut self, texture: &Arc<T>, enable: bool) {
        let tracking = self.texture_state_tracking(texture);
        tracking.enable_ssbo_barriers = enable;
        tracking.first_ssbo_barrier_placed = false;
    }

    pub fn set_enable_ssbo_barriers_for_buffer(&mut self, buffer: &Arc<B>, enable: bool) {
        let tracking = self.buffer_state_tracking(buffer);
        tracking.enable_ssbo_barriers = enable;
        tracking.first_ssbo_barrier_placed = false;
    }

    /// Installs a caller-declared prior state without emitting barriers.
    pub fn begin_tracking_texture_state(
        &mut self,
        texture: &Arc<T>,
        subresources: TextureSubresourceSet,
        state_bits: ResourceStates,
    ) {
        let meta = texture.tracking();
        let mips = meta.mip_levels;
        let layers = meta.array_layers;
        let subresources = subresources.resolve(mips, layers, false);

        let tracking = self.texture_state_tracking(texture);
        if subresources.is_entire_texture(mips, layers) {
            tracking.state = state_bits;
            tracking.subresource_states.clear();
        } else {
            tracking
                .subresource_states
                .resize((mips * layers) as usize, tracking.state);
            tracking.state = ResourceStates::UNKNOWN;

            for mip in subresources.base_mip_level
                ..subresources.base_mip_level + subresources.num_mip_levels
            {
                for layer in subresources.base_array_layer
                    ..subresources.base_array_layer + subresources.num_array_layers
                {
                    let index = (mip + layer * mips) as usize;
                    tracking.subresource_states[index] = state_bits;
                }
            }
        }
    }

    pub fn begin_tracking_buffer_state(&mut self, buffer: &Arc<B>, state_bits: ResourceStates) {
        self.buffer_state_tracking(buffer).state = state_bits;
    }

    /// Requires a state and, when `permanent` covers the whole texture, queues
    /// the permanent promotion for the next submission.
    pub fn end_tracking_texture_state(
        &mut self,
        texture: &Arc<T>,
        subresources: TextureSubresourceSet,
        state_bits: ResourceStates,
        permanent: bool,
    ) {
        let meta = texture.tracking();
        let subresources = subresources.resolve(meta.mip_levels, meta.array_layers, false);
        let permanent =
            permanent && subresources.is_entire_texture(meta.mip_levels, meta.array_layers);

        self.require_texture_state(texture, subresources, state_bits);

        if permanent {
            self.permanent_texture_states
                .push((Arc::clone(texture), state_bits));
            self.texture_state_tracking(texture).permanent_transition = true;
        }
    }

    pub fn end_tracking_buffer_state(
        &mut self,
        buffer: &Arc<B>,
        state_bits: ResourceStates,
        permanent: bool,
    ) {
        self.require_buffer_state(buffer, state_bits);

        if permanent {
            self.permanent_buffer_states
                .push((Arc::clone(buffer), state_bits));
        }
    }

    pub fn texture_subresource_state(
        &self,
        texture: &Arc<T>,
        array_layer: u32,
        mip_level: u32,
    ) -> ResourceStates {
        match self.texture_states.get(&key_of(texture)) {
            Some((_, tracking)) => {
                if tracking.subresource_states.is_empty() {
                    tracking.state
                } else {
                    let index = texture.tracking().subresource_index(mip_level, array_layer);
                    tracking.subresource_states[index]
                }
            }
            None => ResourceStates::UNKNOWN,
        }
    }

    pub fn buffer_state(&self, buffer: &Arc<B>) -> ResourceStates {
        match self.buffer_states.get(&key_of(buffer)) {
            Some((_, tracking)) => tracking.state,
            None => ResourceStates::UNKNOWN,
        }
    }

    pub fn require_texture_state(
        &mut self,
        texture: &Arc<T>,
        subresources: TextureSubresourceSet,
        state: ResourceStates,
    ) {
        let meta = texture.tracking();
        if !meta.permanent_state().is_empty() {
            // Permanent states supersede tracking.
            return;
        }

        let mips = meta.mip_levels;
        let layers = meta.array_layers;
        let subresources = subresources.resolve(mips, layers, false);

        let key = key_of(texture);
        self.ensure_texture_tracking(texture);
        let (_, tracking) = self.texture_states.get_mut(&key).unwrap();

        if subresources.is_entire_texture(mips, layers) && tracking.subresource_states.is_empty() {
            let transition_necessary = tracking.state != state;
            let ssbo_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
                && (tracking.enable_ssbo_barriers || !tracking.first_ssbo_barrier_placed);

            if transition_necessary || ssbo_necessary {
                self.texture_barriers.push(TextureBarrier {
                    texture: Arc::clone(texture),
                    mip_level: 0,
                    array_layer: 0,
                    entire_texture: true,
                    state_before: tracking.state,
                    state_after: state,
                });
            }

            tracking.state = state;

            if ssbo_necessary && !transition_necessary {
                tracking.first_ssbo_barrier_placed = true;
            }
        } else {
            if tracking.subresource_states.is_empty() {
                tracking
                    .subresource_states
                    .resize((mips * layers) as usize, tracking.state);
                tracking.state = ResourceStates::UNKNOWN;
            }

            // At most one SSBO-only barrier per call over the whole range.
            let mut any_uav_barrier = false;

            for layer in subresources.base_array_layer
                ..subresources.base_array_layer + subresources.num_array_layers
            {
                for mip in subresources.base_mip_level
                    ..subresources.base_mip_level + subresources.num_mip_levels
                {
                    let index = (mip + layer * mips) as usize;
                    let prior_state = tracking.subresource_states[index];

                    let transition_necessary = prior_state != state;
                    let ssbo_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
                        && !any_uav_barrier
                        && (tracking.enable_ssbo_barriers || !tracking.first_ssbo_barrier_placed);

                    if transition_necessary || ssbo_necessary {
                        self.texture_barriers.push(TextureBarrier {
                            texture: Arc::clone(texture),
                            mip_level: mip,
                            array_layer: layer,
                            entire_texture: false,
                            state_before: prior_state,
                            state_after: state,
                        });
                    }

                    tracking.subresource_states[index] = state;

                    if ssbo_necessary && !transition_necessary {
                        any_uav_barrier = true;
                        tracking.first_ssbo_barrier_placed = true;
                    }
                }
            }
        }
    }

    pub fn require_buffer_state(&mut self, buffer: &Arc<B>, state: ResourceStates) {
        let meta = buffer.tracking();
        if meta.is_volatile {
            return;
        }
        if !meta.permanent_state().is_empty() {
            return;
        }
        if meta.cpu_access != CpuAccessMode::None {
            // Mapped buffers cannot change state; their memory type fixes it.
            return;
        }

        let key = key_of(buffer);
        self.ensure_buffer_tracking(buffer);
        let (_, tracking) = self.buffer_states.get_mut(&key).unwrap();

        let transition_necessary = tracking.state != state;
        let ssbo_necessary = state.contains(ResourceStates::UNORDERED_ACCESS)
            && (tracking.enable_ssbo_barriers || !tracking.first_ssbo_barrier_placed);

        if transition_necessary {
            // The buffer may already be staged for another purpose in this
            // batch; fold the new state into that barrier instead.
            for barrier in &mut self.buffer_barriers {
                if Arc::ptr_eq(&barrier.buffer, buffer) {
                    barrier.state_after |= state;
                    tracking.state = barrier.state_after;
                    return;
                }
            }
        }

        if transition_necessary || ssbo_necessary {
            self.buffer_barriers.push(BufferBarrier {
                buffer: Arc::clone(buffer),
                state_before: tracking.state,
                state_after: state,
            });
        }

        if ssbo_necessary && !transition_necessary {
            tracking.first_ssbo_barrier_placed = true;
        }

        tracking.state = state;
    }

    /// Transitions keep-initial-state buffers back to their declared initial
    /// state before the list ends.
    pub fn keep_buffer_initial_states(&mut self) {
        let candidates: Vec<Arc<B>> = self
            .buffer_states
            .values()
            .map(|(buffer, _)| Arc::clone(buffer))
            .filter(|buffer| {
                let meta = buffer.tracking();
                meta.keep_initial_state
                    && meta.permanent_state().is_empty()
                    && !meta.is_volatile
            })
            .collect();

        for buffer in candidates {
            let state = buffer.tracking().initial_state;
            self.require_buffer_state(&buffer, state);
        }
    }

    pub fn keep_texture_initial_states(&mut self) {
        let candidates: Vec<Arc<T>> = self
            .texture_states
            .iter()
            .filter(|(_, (texture, tracking))| {
                let meta = texture.tracking();
                meta.keep_initial_state
                    && meta.permanent_state().is_empty()
                    && !tracking.permanent_transition
            })
            .map(|(_, (texture, _))| Arc::clone(texture))
            .collect();

        for texture in candidates {
            let state = texture.tracking().initial_state;
            self.require_texture_state(&texture, ALL_SUBRESOURCES, state);
        }
    }

    /// Commits queued permanent promotions (first submission wins on
    /// conflicting elections), realizes keep-initial states, and resets all
    /// per-list tracking.
    pub fn command_list_submitted(&mut self) {
        for (texture, state) in self.permanent_texture_states.drain(..) {
            let meta = texture.tracking();
            let current = meta.permanent_state();
            if !current.is_empty() && current != state {
                continue;
            }
            meta.set_permanent_state(state);
        }

        for (buffer, state) in self.permanent_buffer_states.drain(..) {
            let meta = buffer.tracking();
            let current = meta.permanent_state();
            if !current.is_empty() && current != state {
                continue;
            }
            meta.set_permanent_state(state);
        }

        for (texture, _) in self.texture_states.values() {
            let meta = texture.tracking();
            if meta.keep_initial_state && !meta.state_initialized() {
                meta.mark_state_initialized();
            }
        }

        self.texture_states.clear();
        self.buffer_states.clear();
    }

    pub fn any_barriers(&self) -> bool {
        !self.texture_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    pub fn texture_barriers(&self) -> &[TextureBarrier<T>] {
        &self.texture_barriers
    }

    pub fn buffer_barriers(&self) -> &[BufferBarrier<B>] {
        &self.buffer_barriers
    }

    /// Hands the accumulated barriers to the caller and clears the
    /// accumulator.
    pub fn drain_barriers(&mut self) -> (Vec<TextureBarrier<T>>, Vec<BufferBarrier<B>>) {
        (
            std::mem::take(&mut self.texture_barriers),
            std::mem::take(&mut self.buffer_barriers),
        )
    }

    pub fn clear_barriers(&mut self) {
        self.texture_barriers.clear();
        self.buffer_barriers.clear();
    }

    fn ensure_texture_tracking(&mut self, texture: &Arc<T>) {
        let key = key_of(texture);
        if !self.texture_states.contains_key(&key) {
            let mut state = TextureState::new();
            let meta = texture.tracking();
            if meta.keep_initial_state {
                state.state = if meta.state_initialized() {
                    meta.initial_state
                } else {
                    ResourceStates::COMMON
                };
            }
            self.texture_states.insert(key, (Arc::clone(texture), state));
        }
    }

    fn texture_state_tracking(&mut self, texture: &Arc<T>) -> &mut TextureState {
        self.ensure_texture_tracking(texture);
        &mut self.texture_states.get_mut(&key_of(texture)).unwrap().1
    }

    fn ensure_buffer_tracking(&mut self, buffer: &Arc<B>) {
        let key = key_of(buffer);
        if !self.buffer_states.contains_key(&key) {
            let mut state = BufferState::new();
            let meta = buffer.tracking();
            if meta.keep_initial_state {
                state.state = meta.initial_state;
            }
            self.buffer_states.insert(key, (Arc::clone(buffer), state));
        }
    }

    fn buffer_state_tracking(&mut self, buffer: &Arc<B>) -> &mut BufferState {
        self.ensure_buffer_tracking(buffer);
        &mut self.buffer_states.get_mut(&key_of(buffer)).unwrap().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;

    struct TestTexture {
        tracking: TextureTracking,
    }

    impl TextureStateSource for TestTexture {
        fn tracking(&self) -> &TextureTracking {
            &self.tracking
        }
    }

    struct TestBuffer {
        tracking: BufferTracking,
    }

    impl BufferStateSource for TestBuffer {
        fn tracking(&self) -> &BufferTracking {
            &self.tracking
        }
    }

    type Tracker = CommandListResourceStateTracker<TestTexture, TestBuffer>;

    fn texture(mips: u32, layers: u32) -> Arc<TestTexture> {
        let desc = TextureDesc {
            width: 256,
            height: 256,
            mip_levels: mips,
            array_layers: layers,
            format: Format::Rgba8Unorm,
            ..Default::default()
        };
        Arc::new(TestTexture {
            tracking: TextureTracking::new(&desc),
        })
    }

    fn buffer(cpu_access: CpuAccessMode) -> Arc<TestBuffer> {
        let desc = BufferDesc {
            byte_size: 1024,
            cpu_access,
            ..Default::default()
        };
        Arc::new(TestBuffer {
            tracking: BufferTracking::new(&desc),
        })
    }

    #[test]
    fn repeated_whole_texture_state_is_idempotent() {
        let mut tracker = Tracker::new();
        let tex = texture(1, 1);

        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_DEST);
        assert_eq!(tracker.texture_barriers().len(), 1);

        tracker.clear_barriers();
        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_DEST);
        assert!(tracker.texture_barriers().is_empty());
    }

    #[test]
    fn write_then_sample_emits_two_barriers() {
        let mut tracker = Tracker::new();
        let tex = texture(1, 1);

        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_DEST);
        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::SHADER_RESOURCE);

        let (barriers, _) = tracker.drain_barriers();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].state_before, ResourceStates::UNKNOWN);
        assert_eq!(barriers[0].state_after, ResourceStates::COPY_DEST);
        assert_eq!(barriers[1].state_before, ResourceStates::COPY_DEST);
        assert_eq!(barriers[1].state_after, ResourceStates::SHADER_RESOURCE);
    }

    #[test]
    fn partial_update_expands_to_subresource_tracking() {
        let mut tracker = Tracker::new();
        let tex = texture(4, 2);

        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::SHADER_RESOURCE);
        tracker.clear_barriers();

        // A single-mip transition only touches that subresource.
        tracker.require_texture_state(
            &tex,
            TextureSubresourceSet::new(1, 1, 0, 1),
            ResourceStates::COPY_DEST,
        );
        let (barriers, _) = tracker.drain_barriers();
        assert_eq!(barriers.len(), 1);
        assert!(!barriers[0].entire_texture);
        assert_eq!(barriers[0].mip_level, 1);
        assert_eq!(barriers[0].state_before, ResourceStates::SHADER_RESOURCE);

        assert_eq!(
            tracker.texture_subresource_state(&tex, 0, 1),
            ResourceStates::COPY_DEST
        );
        assert_eq!(
            tracker.texture_subresource_state(&tex, 0, 0),
            ResourceStates::SHADER_RESOURCE
        );
    }

    #[test]
    fn permanent_state_suppresses_tracking() {
        let mut tracker = Tracker::new();
        let tex = texture(2, 1);

        tracker.end_tracking_texture_state(
            &tex,
            ALL_SUBRESOURCES,
            ResourceStates::SHADER_RESOURCE,
            true,
        );
        tracker.clear_barriers();
        tracker.command_list_submitted();
        assert_eq!(
            tex.tracking().permanent_state(),
            ResourceStates::SHADER_RESOURCE
        );

        // A later list sees the promotion and emits nothing.
        let mut next = Tracker::new();
        next.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_DEST);
        assert!(!next.any_barriers());
    }

    #[test]
    fn partial_permanent_election_is_ignored() {
        let mut tracker = Tracker::new();
        let tex = texture(4, 1);

        tracker.end_tracking_texture_state(
            &tex,
            TextureSubresourceSet::new(0, 1, 0, 1),
            ResourceStates::SHADER_RESOURCE,
            true,
        );
        tracker.command_list_submitted();
        assert!(tex.tracking().permanent_state().is_empty());
    }

    #[test]
    fn first_permanent_election_wins() {
        let tex = texture(1, 1);

        let mut tracker = Tracker::new();
        tracker.end_tracking_texture_state(
            &tex,
            ALL_SUBRESOURCES,
            ResourceStates::SHADER_RESOURCE,
            true,
        );
        tracker.end_tracking_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_SOURCE, true);
        tracker.command_list_submitted();
        assert_eq!(
            tex.tracking().permanent_state(),
            ResourceStates::SHADER_RESOURCE
        );
    }

    #[test]
    fn cpu_accessible_buffers_skip_tracking() {
        let mut tracker = Tracker::new();
        let buf = buffer(CpuAccessMode::Write);

        tracker.require_buffer_state(&buf, ResourceStates::COPY_SOURCE);
        assert!(!tracker.any_barriers());
        assert_eq!(tracker.buffer_state(&buf), ResourceStates::UNKNOWN);
    }

    #[test]
    fn buffer_barrier_states_are_merged() {
        let mut tracker = Tracker::new();
        let buf = buffer(CpuAccessMode::None);

        tracker.require_buffer_state(&buf, ResourceStates::COPY_DEST);
        tracker.require_buffer_state(&buf, ResourceStates::VERTEX_BUFFER);

        let (_, barriers) = tracker.drain_barriers();
        assert_eq!(barriers.len(), 1);
        assert_eq!(
            barriers[0].state_after,
            ResourceStates::COPY_DEST | ResourceStates::VERTEX_BUFFER
        );
        assert_eq!(
            tracker.buffer_state(&buf),
            ResourceStates::COPY_DEST | ResourceStates::VERTEX_BUFFER
        );
    }

    #[test]
    fn uav_to_uav_places_single_ssbo_barrier_when_disabled() {
        let mut tracker = Tracker::new();
        let buf = buffer(CpuAccessMode::None);
        tracker.set_enable_ssbo_barriers_for_buffer(&buf, false);

        tracker.require_buffer_state(&buf, ResourceStates::UNORDERED_ACCESS);
        tracker.clear_barriers();

        // First UAV-to-UAV access still gets one barrier, later ones do not.
        tracker.require_buffer_state(&buf, ResourceStates::UNORDERED_ACCESS);
        assert_eq!(tracker.buffer_barriers().len(), 1);
        tracker.clear_barriers();
        tracker.require_buffer_state(&buf, ResourceStates::UNORDERED_ACCESS);
        assert!(tracker.buffer_barriers().is_empty());
    }

    #[test]
    fn keep_initial_state_restores_state_and_initializes() {
        let desc = TextureDesc {
            width: 64,
            height: 64,
            format: Format::Rgba8Unorm,
            initial_state: ResourceStates::SHADER_RESOURCE,
            keep_initial_state: true,
            ..Default::default()
        };
        let tex = Arc::new(TestTexture {
            tracking: TextureTracking::new(&desc),
        });

        let mut tracker = Tracker::new();
        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_DEST);
        tracker.keep_texture_initial_states();

        let (barriers, _) = tracker.drain_barriers();
        assert_eq!(barriers.last().unwrap().state_after, ResourceStates::SHADER_RESOURCE);

        tracker.command_list_submitted();
        assert!(tex.tracking().state_initialized());

        // The next list starts from the declared initial state, so requiring
        // it again is a no-op.
        let mut next = Tracker::new();
        next.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::SHADER_RESOURCE);
        assert!(!next.any_barriers());
    }

    #[test]
    fn begin_tracking_installs_prior_state() {
        let mut tracker = Tracker::new();
        let tex = texture(2, 2);

        tracker.begin_tracking_texture_state(
            &tex,
            ALL_SUBRESOURCES,
            ResourceStates::SHADER_RESOURCE,
        );
        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::SHADER_RESOURCE);
        assert!(!tracker.any_barriers());

        tracker.require_texture_state(&tex, ALL_SUBRESOURCES, ResourceStates::COPY_SOURCE);
        assert_eq!(tracker.texture_barriers().len(), 1);
        assert_eq!(
            tracker.texture_barriers()[0].state_before,
            ResourceStates::SHADER_RESOURCE
        );
    }
}
