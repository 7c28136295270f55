// SPDX-License-Identifier: CEPL-1.0
//! Instance, validation layers and the presentation surface.

use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use salamander_render::SetupError;
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, warn};

pub const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

/// Validation is a debug-build feature only.
pub const ENABLE_VALIDATION: bool = cfg!(debug_assertions);

const APP_NAME: &CStr = c"Salamander";

/// First requested layer that is not in `available`.
pub fn missing_layer<'a>(
    available: &[vk::LayerProperties],
    requested: &[&'a CStr],
) -> Option<&'a CStr> {
    requested.iter().copied().find(|want| {
        !available
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *want))
    })
}

pub fn check_validation_layers(
    available: &[vk::LayerProperties],
    requested: &[&CStr],
) -> Result<(), SetupError> {
    match missing_layer(available, requested) {
        Some(name) => Err(SetupError::ValidationLayerUnavailable(
            name.to_string_lossy().into_owned(),
        )),
        None => Ok(()),
    }
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?types, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?types, "{msg}");
    } else {
        debug!(target: "vulkan", ?types, "{msg}");
    }
    vk::FALSE
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<DebugMessenger, vk::Result> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader.create_debug_utils_messenger(&ci, None)?;
    Ok(DebugMessenger { loader, messenger })
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<Instance, SetupError> {
    // STRICT: the layer check MUST run before `create_instance` so a missing
    // layer surfaces as ValidationLayerUnavailable, not a driver error.
    let mut layers: Vec<*const c_char> = Vec::new();
    if ENABLE_VALIDATION {
        let available = entry
            .enumerate_instance_layer_properties()
            .map_err(|e| SetupError::InstanceCreationFailed(format!("enumerate layers: {e}")))?;
        check_validation_layers(&available, VALIDATION_LAYERS)?;
        layers.extend(VALIDATION_LAYERS.iter().map(|l| l.as_ptr()));
    }

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .map_err(|e| SetupError::InstanceCreationFailed(format!("window extensions: {e}")))?
        .to_vec();
    if ENABLE_VALIDATION {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(APP_NAME)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(APP_NAME)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    entry
        .create_instance(&create_info, None)
        .map_err(|e| SetupError::InstanceCreationFailed(e.to_string()))
}

/// Instance-scoped objects. Dropped last, after the logical device.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl InstanceContext {
    /// STRICT ORDER: instance, then the surface from this instance. Devices
    /// are queried against this surface afterwards.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self, SetupError> {
        let dh = display
            .display_handle()
            .map_err(|e| SetupError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| SetupError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();

        let entry = Entry::load().map_err(|e| SetupError::LoaderUnavailable(e.to_string()))?;
        let instance = create_instance(&entry, dh)?;
        info!(validation = ENABLE_VALIDATION, "Vulkan instance created");

        let debug = if ENABLE_VALIDATION {
            match create_debug_messenger(&entry, &instance) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        // From here on, Drop cleans up whatever exists.
        let mut ctx = Self {
            surface_loader: surface::Instance::new(&entry, &instance),
            surface: vk::SurfaceKHR::null(),
            entry,
            instance,
            debug,
        };
        ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None)
            .map_err(|e| SetupError::SurfaceCreationFailed(e.to_string()))?;
        Ok(ctx)
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("instance destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str) -> vk::LayerProperties {
        let mut props = vk::LayerProperties::default();
        for (dst, src) in props.layer_name.iter_mut().zip(name.bytes()) {
            *dst = src as c_char;
        }
        props
    }

    #[test]
    fn present_layers_pass() {
        let available = [layer("VK_LAYER_LUNARG_api_dump"), layer("VK_LAYER_KHRONOS_validation")];
        assert!(check_validation_layers(&available, VALIDATION_LAYERS).is_ok());
    }

    #[test]
    fn absent_layer_is_reported_by_name() {
        let available = [layer("VK_LAYER_LUNARG_api_dump")];
        let err = check_validation_layers(&available, VALIDATION_LAYERS).unwrap_err();
        match err {
            SetupError::ValidationLayerUnavailable(name) => {
                assert_eq!(name, "VK_LAYER_KHRONOS_validation")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_layer_list_fails() {
        assert_eq!(
            missing_layer(&[], VALIDATION_LAYERS),
            Some(c"VK_LAYER_KHRONOS_validation")
        );
    }

    #[test]
    fn prefix_does_not_match() {
        let available = [layer("VK_LAYER_KHRONOS_valid")];
        assert!(missing_layer(&available, VALIDATION_LAYERS).is_some());
    }
}
