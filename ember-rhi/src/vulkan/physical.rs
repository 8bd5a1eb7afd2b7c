//! Physical-device selection and logical-device creation.

use std::collections::HashSet;
use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::{Result, RhiError};

pub(crate) struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
}

pub(crate) struct DeviceBundle {
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub families: QueueFamilyIndices,
}

fn find_queue_families(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Option<QueueFamilyIndices> {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(device) };

    let mut graphics = None;
    let mut compute = None;
    let mut present = None;

    for (index, props) in properties.iter().enumerate() {
        let index = index as u32;
        if graphics.is_none() && props.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if compute.is_none() && props.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            compute = Some(index);
        }
        if present.is_none() {
            let supported = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            };
            if supported {
                present = Some(index);
            }
        }
        if graphics.is_some() && compute.is_some() && present.is_some() {
            break;
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
        compute: compute?,
    })
}

fn supports_extensions(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    required: &[CString],
) -> bool {
    let available = match unsafe { instance.enumerate_device_extension_properties(device) } {
        Ok(extensions) => extensions,
        Err(_) => return false,
    };

    let mut missing: HashSet<&CStr> = required.iter().map(|name| name.as_c_str()).collect();
    for extension in &available {
        let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
        missing.remove(name);
    }
    missing.is_empty()
}

/// Picks the first physical device with graphics + present + compute families
/// and the required extensions, then creates the logical device with one
/// queue per unique family and the feature set the RHI depends on.
pub(crate) fn create_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    extra_extensions: &[CString],
) -> Result<DeviceBundle> {
    let mut required_extensions: Vec<CString> = vec![ash::khr::swapchain::NAME.to_owned()];
    required_extensions.extend(extra_extensions.iter().cloned());

    let physical_devices = unsafe { instance.enumerate_physical_devices()? };

    let mut selected = None;
    for device in physical_devices {
        let Some(families) = find_queue_families(instance, surface_loader, surface, device) else {
            continue;
        };
        if !supports_extensions(instance, device, &required_extensions) {
            continue;
        }
        selected = Some((device, families));
    }

    let (physical_device, families) = selected.ok_or(RhiError::NoSuitableDevice)?;

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy() };
    log::info!("selected physical device: {device_name}");

    let unique_families: HashSet<u32> =
        [families.graphics, families.present, families.compute].into();
    let queue_priority = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priority)
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures::default()
        .geometry_shader(true)
        .multi_draw_indirect(true)
        .shader_sampled_image_array_dynamic_indexing(true);

    let mut features11 = vk::PhysicalDeviceVulkan11Features::default().shader_draw_parameters(true);

    let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .timeline_semaphore(true)
        .shader_sampled_image_array_non_uniform_indexing(true);

    let extension_ptrs: Vec<*const i8> =
        required_extensions.iter().map(|name| name.as_ptr()).collect();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(&features)
        .push_next(&mut features11)
        .push_next(&mut features12);

    let device = unsafe { instance.create_device(physical_device, &create_info, None)? };

    let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(families.present, 0) };
    let compute_queue = unsafe { device.get_device_queue(families.compute, 0) };

    Ok(DeviceBundle {
        physical_device,
        device,
        graphics_queue,
        present_queue,
        compute_queue,
        families,
    })
}
