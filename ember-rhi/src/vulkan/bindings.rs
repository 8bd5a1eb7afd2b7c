//! Binding layouts, binding sets, and bindless descriptor tables.
//!
//! A layout assigns descriptor slots sequentially over its
//! `buffers ++ images ++ image_arrays` lists and owns the pool sizing used by
//! every set created against it. Bindless tables allocate one
//! variable-count, partially-bound, update-after-bind binding.

use std::sync::{Arc, Mutex};

use ash::vk;

use crate::error::{Result, RhiError};
use crate::types::{
    BindingLayoutDesc, BindlessLayoutDesc, BufferBinding, BufferRange, ImageBinding,
    TextureSubresourceSet,
};

use super::buffer::BufferHandle;
use super::convert;
use super::sampler::SamplerHandle;
use super::texture::{view_type_for_format, TextureHandle, TextureSubresourceViewType};
use super::VulkanContext;

/// One resolved slot of a layout: its binding index and descriptor type.
#[derive(Debug, Clone, Copy)]
pub struct LayoutSlot {
    pub slot: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
}

pub struct BindingLayout {
    context: Arc<VulkanContext>,
    pub(crate) layout: vk::DescriptorSetLayout,
    pub(crate) pool_sizes: Vec<vk::DescriptorPoolSize>,
    pub(crate) slots: Vec<LayoutSlot>,
    pub desc: Option<BindingLayoutDesc>,
    pub bindless_desc: Option<BindlessLayoutDesc>,
}

pub type BindingLayoutHandle = Arc<BindingLayout>;

fn buffer_binding_type(binding: BufferBinding) -> vk::DescriptorType {
    match binding {
        BufferBinding::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
        BufferBinding::Storage => vk::DescriptorType::STORAGE_BUFFER,
    }
}

fn image_binding_type(binding: ImageBinding) -> vk::DescriptorType {
    match binding {
        ImageBinding::Sampled => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        ImageBinding::Storage => vk::DescriptorType::STORAGE_IMAGE,
    }
}

/// Slot assignment over the concatenation `buffers ++ images ++ image_arrays`.
pub(crate) fn layout_slots(desc: &BindingLayoutDesc) -> Vec<LayoutSlot> {
    let mut slots = Vec::new();
    let mut next = 0u32;

    for &binding in &desc.buffers {
        slots.push(LayoutSlot {
            slot: next,
            descriptor_type: buffer_binding_type(binding),
            count: 1,
        });
        next += 1;
    }
    for &binding in &desc.images {
        slots.push(LayoutSlot {
            slot: next,
            descriptor_type: image_binding_type(binding),
            count: 1,
        });
        next += 1;
    }
    for array in &desc.image_arrays {
        slots.push(LayoutSlot {
            slot: next,
            descriptor_type: image_binding_type(array.binding),
            count: array.count.max(1),
        });
        next += 1;
    }

    slots
}

fn pool_sizes_for_slots(slots: &[LayoutSlot], multiplier: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for slot in slots {
        match sizes
            .iter_mut()
            .find(|size| size.ty == slot.descriptor_type)
        {
            Some(size) => size.descriptor_count += slot.count * multiplier,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(slot.descriptor_type)
                    .descriptor_count(slot.count * multiplier),
            ),
        }
    }
    sizes
}

pub(crate) fn create_binding_layout(
    context: &Arc<VulkanContext>,
    desc: BindingLayoutDesc,
) -> Result<BindingLayoutHandle> {
    let slots = layout_slots(&desc);
    let stage_flags = convert::shader_stage_flags_to_vk(desc.visibility);

    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = slots
        .iter()
        .map(|slot| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(slot.slot)
                .descriptor_type(slot.descriptor_type)
                .descriptor_count(slot.count)
                .stage_flags(stage_flags)
        })
        .collect();

    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
    let layout = unsafe {
        context
            .device
            .create_descriptor_set_layout(&create_info, None)?
    };

    let pool_sizes = pool_sizes_for_slots(&slots, desc.pool_count_multiplier.max(1));

    Ok(Arc::new(BindingLayout {
        context: Arc::clone(context),
        layout,
        pool_sizes,
        slots,
        desc: Some(desc),
        bindless_desc: None,
    }))
}

pub(crate) fn create_bindless_layout(
    context: &Arc<VulkanContext>,
    desc: BindlessLayoutDesc,
) -> Result<BindingLayoutHandle> {
    if desc.max_capacity == 0 || desc.bindings.is_empty() {
        return Err(RhiError::InvalidArgument(
            "bindless layout needs a capacity and at least one binding",
        ));
    }

    let stage_flags = convert::shader_stage_flags_to_vk(desc.visibility);

    let mut slots = Vec::new();
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
        .bindings
        .iter()
        .enumerate()
        .map(|(index, &binding)| {
            slots.push(LayoutSlot {
                slot: index as u32,
                descriptor_type: image_binding_type(binding),
                count: desc.max_capacity,
            });
            vk::DescriptorSetLayoutBinding::default()
                .binding(index as u32)
                .descriptor_type(image_binding_type(binding))
                .descriptor_count(desc.max_capacity)
                .stage_flags(stage_flags)
        })
        .collect();

    // Only the last binding may carry the variable-count flag.
    let mut binding_flags = vec![
        vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND;
        vk_bindings.len()
    ];
    if let Some(last) = binding_flags.last_mut() {
        *last |= vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
    }

    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

    let create_info = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(&vk_bindings)
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .push_next(&mut flags_info);

    let layout = unsafe {
        context
            .device
            .create_descriptor_set_layout(&create_info, None)?
    };

    let pool_sizes = pool_sizes_for_slots(&slots, 1);

    Ok(Arc::new(BindingLayout {
        context: Arc::clone(context),
        layout,
        pool_sizes,
        slots,
        desc: None,
        bindless_desc: Some(desc),
    }))
}

impl BindingLayout {
    pub fn is_bindless(&self) -> bool {
        self.bindless_desc.is_some()
    }

    pub(crate) fn slot(&self, slot: u32) -> Option<&LayoutSlot> {
        self.slots.iter().find(|entry| entry.slot == slot)
    }
}

impl Drop for BindingLayout {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

impl std::fmt::Debug for BindingLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingLayout")
            .field("slots", &self.slots.len())
            .field("bindless", &self.is_bindless())
            .finish_non_exhaustive()
    }
}

/// One concrete binding of a set.
#[derive(Clone)]
pub enum BindingSetItem {
    UniformBuffer {
        slot: u32,
        buffer: BufferHandle,
        range: BufferRange,
    },
    StorageBuffer {
        slot: u32,
        buffer: BufferHandle,
        range: BufferRange,
    },
    SampledImage {
        slot: u32,
        texture: TextureHandle,
        sampler: SamplerHandle,
        subresources: TextureSubresourceSet,
    },
    StorageImage {
        slot: u32,
        texture: TextureHandle,
        subresources: TextureSubresourceSet,
    },
    SampledImageArray {
        slot: u32,
        textures: Vec<TextureHandle>,
        sampler: SamplerHandle,
    },
}

impl BindingSetItem {
    pub fn slot(&self) -> u32 {
        match self {
            BindingSetItem::UniformBuffer { slot, .. }
            | BindingSetItem::StorageBuffer { slot, .. }
            | BindingSetItem::SampledImage { slot, .. }
            | BindingSetItem::StorageImage { slot, .. }
            | BindingSetItem::SampledImageArray { slot, .. } => *slot,
        }
    }
}

#[derive(Clone, Default)]
pub struct BindingSetDesc {
    pub bindings: Vec<BindingSetItem>,
}

pub struct BindingSet {
    context: Arc<VulkanContext>,
    pool: vk::DescriptorPool,
    pub(crate) descriptor_set: vk::DescriptorSet,
    pub desc: BindingSetDesc,
    pub layout: BindingLayoutHandle,
}

pub type BindingSetHandle = Arc<BindingSet>;

fn write_item(
    context: &VulkanContext,
    descriptor_set: vk::DescriptorSet,
    layout: &BindingLayout,
    item: &BindingSetItem,
    dst_array_element: u32,
) -> Result<()> {
    let slot_info = layout
        .slot(item.slot())
        .ok_or(RhiError::InvalidArgument("binding slot not present in layout"))?;

    match item {
        BindingSetItem::UniformBuffer { buffer, range, .. }
        | BindingSetItem::StorageBuffer { buffer, range, .. } => {
            let range = range.resolve(&buffer.desc);
            let buffer_info = vk::DescriptorBufferInfo::default()
                .buffer(buffer.buffer)
                .offset(range.byte_offset)
                .range(range.byte_size);
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(slot_info.slot)
                .dst_array_element(dst_array_element)
                .descriptor_type(slot_info.descriptor_type)
                .buffer_info(std::slice::from_ref(&buffer_info));
            unsafe { context.device.update_descriptor_sets(&[write], &[]) };
        }
        BindingSetItem::SampledImage {
            texture,
            sampler,
            subresources,
            ..
        } => {
            let view = texture.get_view(
                *subresources,
                None,
                view_type_for_format(texture.desc.format),
            )?;
            let image_info = vk::DescriptorImageInfo::default()
                .image_view(view.view)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .sampler(sampler.sampler);
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(slot_info.slot)
                .dst_array_element(dst_array_element)
                .descriptor_type(slot_info.descriptor_type)
                .image_info(std::slice::from_ref(&image_info));
            unsafe { context.device.update_descriptor_sets(&[write], &[]) };
        }
        BindingSetItem::StorageImage {
            texture,
            subresources,
            ..
        } => {
            let view =
                texture.get_view(*subresources, None, TextureSubresourceViewType::AllAspects)?;
            let image_info = vk::DescriptorImageInfo::default()
                .image_view(view.view)
                .image_layout(vk::ImageLayout::GENERAL);
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(slot_info.slot)
                .dst_array_element(dst_array_element)
                .descriptor_type(slot_info.descriptor_type)
                .image_info(std::slice::from_ref(&image_info));
            unsafe { context.device.update_descriptor_sets(&[write], &[]) };
        }
        BindingSetItem::SampledImageArray {
            textures, sampler, ..
        } => {
            let mut image_infos = Vec::with_capacity(textures.len());
            for texture in textures {
                let view = texture.get_view(
                    crate::types::ALL_SUBRESOURCES,
                    None,
                    view_type_for_format(texture.desc.format),
                )?;
                image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(view.view)
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .sampler(sampler.sampler),
                );
            }
            if image_infos.is_empty() {
                return Ok(());
            }
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(slot_info.slot)
                .dst_array_element(dst_array_element)
                .descriptor_type(slot_info.descriptor_type)
                .image_info(&image_infos);
            unsafe { context.device.update_descriptor_sets(&[write], &[]) };
        }
    }
    Ok(())
}

pub(crate) fn create_binding_set(
    context: &Arc<VulkanContext>,
    desc: BindingSetDesc,
    layout: &BindingLayoutHandle,
) -> Result<BindingSetHandle> {
    if layout.is_bindless() {
        return Err(RhiError::InvalidArgument(
            "binding sets require a non-bindless layout; use a descriptor table",
        ));
    }

    let max_sets = layout
        .desc
        .as_ref()
        .map(|d| d.pool_count_multiplier.max(1))
        .unwrap_or(1);

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(&layout.pool_sizes);
    let pool = unsafe { context.device.create_descriptor_pool(&pool_info, None)? };

    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(std::slice::from_ref(&layout.layout));
    let sets = match unsafe { context.device.allocate_descriptor_sets(&alloc_info) } {
        Ok(sets) => sets,
        Err(err) => {
            unsafe { context.device.destroy_descriptor_pool(pool, None) };
            return Err(err.into());
        }
    };
    let descriptor_set = sets[0];

    // One descriptor write per layout item.
    for item in &desc.bindings {
        if let Err(err) = write_item(context, descriptor_set, layout, item, 0) {
            unsafe { context.device.destroy_descriptor_pool(pool, None) };
            return Err(err);
        }
    }

    Ok(Arc::new(BindingSet {
        context: Arc::clone(context),
        pool,
        descriptor_set,
        desc,
        layout: Arc::clone(layout),
    }))
}

impl Drop for BindingSet {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

impl std::fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingSet")
            .field("bindings", &self.desc.bindings.len())
            .finish_non_exhaustive()
    }
}

struct DescriptorTableState {
    pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    capacity: u32,
}

/// Bindless binding set: a large, partially-bound descriptor array written
/// after binding and resizable in place.
pub struct DescriptorTable {
    context: Arc<VulkanContext>,
    pub layout: BindingLayoutHandle,
    state: Mutex<DescriptorTableState>,
}

pub type DescriptorTableHandle = Arc<DescriptorTable>;

fn allocate_table_set(
    context: &VulkanContext,
    layout: &BindingLayout,
    capacity: u32,
) -> Result<(vk::DescriptorPool, vk::DescriptorSet)> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = layout
        .slots
        .iter()
        .map(|slot| {
            vk::DescriptorPoolSize::default()
                .ty(slot.descriptor_type)
                .descriptor_count(capacity.max(1))
        })
        .collect();

    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(1)
        .pool_sizes(&pool_sizes)
        .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND);
    let pool = unsafe { context.device.create_descriptor_pool(&pool_info, None)? };

    let counts = [capacity];
    let mut variable_info =
        vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(std::slice::from_ref(&layout.layout))
        .push_next(&mut variable_info);

    match unsafe { context.device.allocate_descriptor_sets(&alloc_info) } {
        Ok(sets) => Ok((pool, sets[0])),
        Err(err) => {
            unsafe { context.device.destroy_descriptor_pool(pool, None) };
            Err(err.into())
        }
    }
}

pub(crate) fn create_descriptor_table(
    context: &Arc<VulkanContext>,
    layout: &BindingLayoutHandle,
) -> Result<DescriptorTableHandle> {
    let bindless = layout
        .bindless_desc
        .as_ref()
        .ok_or(RhiError::InvalidArgument("descriptor tables require a bindless layout"))?;

    let capacity = bindless.max_capacity - 1;
    let (pool, descriptor_set) = allocate_table_set(context, layout, capacity)?;

    Ok(Arc::new(DescriptorTable {
        context: Arc::clone(context),
        layout: Arc::clone(layout),
        state: Mutex::new(DescriptorTableState {
            pool,
            descriptor_set,
            capacity,
        }),
    }))
}

impl DescriptorTable {
    pub fn capacity(&self) -> u32 {
        self.state.lock().unwrap().capacity
    }

    pub(crate) fn descriptor_set(&self) -> vk::DescriptorSet {
        self.state.lock().unwrap().descriptor_set
    }

    /// Writes one item at its slot's array element.
    pub fn write(&self, item: &BindingSetItem) -> Result<()> {
        let state = self.state.lock().unwrap();
        if item.slot() >= state.capacity {
            return Err(RhiError::InvalidArgument("descriptor table slot out of range"));
        }
        // Bindless items address the single array binding by element.
        let array_element = item.slot();
        let mut indexed = item.clone();
        set_item_slot(&mut indexed, 0);
        write_item(
            &self.context,
            state.descriptor_set,
            &self.layout,
            &indexed,
            array_element,
        )
    }

    /// Reallocates the table at `new_capacity`, optionally copying the
    /// existing descriptors over.
    pub fn resize(&self, new_capacity: u32, keep_contents: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (pool, descriptor_set) = allocate_table_set(&self.context, &self.layout, new_capacity)?;

        if keep_contents && state.capacity > 0 {
            let copies: Vec<vk::CopyDescriptorSet> = self
                .layout
                .slots
                .iter()
                .map(|slot| {
                    vk::CopyDescriptorSet::default()
                        .src_set(state.descriptor_set)
                        .src_binding(slot.slot)
                        .src_array_element(0)
                        .dst_set(descriptor_set)
                        .dst_binding(slot.slot)
                        .dst_array_element(0)
                        .descriptor_count(state.capacity.min(new_capacity))
                })
                .collect();
            unsafe { self.context.device.update_descriptor_sets(&[], &copies) };
        }

        unsafe {
            self.context.device.destroy_descriptor_pool(state.pool, None);
        }
        state.pool = pool;
        state.descriptor_set = descriptor_set;
        state.capacity = new_capacity;
        Ok(())
    }
}

fn set_item_slot(item: &mut BindingSetItem, new_slot: u32) {
    match item {
        BindingSetItem::UniformBuffer { slot, .. }
        | BindingSetItem::StorageBuffer { slot, .. }
        | BindingSetItem::SampledImage { slot, .. }
        | BindingSetItem::StorageImage { slot, .. }
        | BindingSetItem::SampledImageArray { slot, .. } => *slot = new_slot,
    }
}

impl Drop for DescriptorTable {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        unsafe {
            self.context.device.destroy_descriptor_pool(state.pool, None);
        }
    }
}

impl std::fmt::Debug for DescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorTable")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// Either kind of descriptor-set binding a draw or dispatch can reference.
#[derive(Clone)]
pub enum BindingSetRef {
    Set(BindingSetHandle),
    Table(DescriptorTableHandle),
}

impl BindingSetRef {
    pub(crate) fn descriptor_set(&self) -> vk::DescriptorSet {
        match self {
            BindingSetRef::Set(set) => set.descriptor_set,
            BindingSetRef::Table(table) => table.descriptor_set(),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &BindingSetRef) -> bool {
        match (self, other) {
            (BindingSetRef::Set(a), BindingSetRef::Set(b)) => Arc::ptr_eq(a, b),
            (BindingSetRef::Table(a), BindingSetRef::Table(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageArrayBinding;

    #[test]
    fn slots_are_assigned_over_buffers_then_images_then_arrays() {
        let desc = BindingLayoutDesc {
            buffers: vec![BufferBinding::Uniform, BufferBinding::Storage],
            images: vec![ImageBinding::Sampled],
            image_arrays: vec![ImageArrayBinding {
                binding: ImageBinding::Storage,
                count: 8,
            }],
            ..Default::default()
        };

        let slots = layout_slots(&desc);
        let expected: Vec<u32> = (0..4).collect();
        let actual: Vec<u32> = slots.iter().map(|slot| slot.slot).collect();
        assert_eq!(actual, expected);

        assert_eq!(slots[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(slots[1].descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(
            slots[2].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(slots[3].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(slots[3].count, 8);
    }

    #[test]
    fn pool_sizes_accumulate_per_type_with_multiplier() {
        let desc = BindingLayoutDesc {
            buffers: vec![BufferBinding::Uniform, BufferBinding::Uniform],
            images: vec![ImageBinding::Sampled],
            pool_count_multiplier: 3,
            ..Default::default()
        };
        let sizes = pool_sizes_for_slots(&layout_slots(&desc), desc.pool_count_multiplier);

        let uniform = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniform.descriptor_count, 6);
        let sampled = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(sampled.descriptor_count, 3);
    }
}
