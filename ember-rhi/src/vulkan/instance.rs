//! Instance creation, validation layers, the debug messenger, and the
//! platform surface.

use std::ffi::{c_void, CStr, CString};

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{Result, RhiError};

/// Returns validation layer names to enable if validation is requested
/// (feature or EMBER_VALIDATION=1 env var).
#[cfg(feature = "validation")]
pub(crate) fn validation_layer_names(entry: &ash::Entry) -> Vec<CString> {
    let disable =
        std::env::var("EMBER_VALIDATION").is_ok_and(|v| v == "0" || v.eq_ignore_ascii_case("false"));
    if disable {
        return vec![];
    }
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return vec![],
    };
    const KHRONOS: &str = "VK_LAYER_KHRONOS_validation";
    for prop in &layers {
        let name = unsafe { CStr::from_ptr(prop.layer_name.as_ptr()).to_string_lossy() };
        if name == KHRONOS {
            return vec![CString::new(KHRONOS).unwrap()];
        }
    }
    log::warn!("validation requested but {KHRONOS} is not installed");
    vec![]
}

#[cfg(not(feature = "validation"))]
pub(crate) fn validation_layer_names(_entry: &ash::Entry) -> Vec<CString> {
    if std::env::var("EMBER_VALIDATION").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
        log::warn!(
            "EMBER_VALIDATION=1 set but ember-rhi built without the 'validation' feature; \
             validation layers not available"
        );
    }
    vec![]
}

/// Routes validation-layer diagnostics to the application logger.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        let data = &*callback_data;
        if data.p_message.is_null() {
            std::borrow::Cow::Borrowed("<no message>")
        } else {
            CStr::from_ptr(data.p_message).to_string_lossy()
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan {message_type:?}] {message}");
    } else {
        log::debug!("[vulkan {message_type:?}] {message}");
    }

    vk::FALSE
}

pub(crate) struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug_utils: Option<ash::ext::debug_utils::Instance>,
    pub debug_messenger: vk::DebugUtilsMessengerEXT,
}

/// Creates the instance with the surface extensions for `display_handle`,
/// plus debug utils and validation layers when enabled.
pub(crate) fn create_instance(
    entry: &ash::Entry,
    display_handle: RawDisplayHandle,
) -> Result<InstanceBundle> {
    let app_name = CString::new("Ember").unwrap();
    let engine_name = CString::new("Ember").unwrap();
    let app_info = vk::ApplicationInfo::default()
        .api_version(vk::API_VERSION_1_3)
        .application_name(&app_name)
        .engine_name(&engine_name);

    let layer_names = validation_layer_names(entry);
    let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|name| name.as_ptr()).collect();

    let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(RhiError::from)?;
    let mut extensions: Vec<*const i8> = surface_extensions.to_vec();
    let use_debug_utils = !layer_names.is_empty();
    if use_debug_utils {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_ptrs);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    let (debug_utils, debug_messenger) = if use_debug_utils {
        let loader = ash::ext::debug_utils::Instance::new(entry, &instance);
        let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_info, None)? };
        (Some(loader), messenger)
    } else {
        (None, vk::DebugUtilsMessengerEXT::null())
    };

    Ok(InstanceBundle {
        instance,
        debug_utils,
        debug_messenger,
    })
}

pub(crate) fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    unsafe {
        ash_window::create_surface(entry, instance, display_handle, window_handle, None)
            .map_err(RhiError::from)
    }
}
