//! Vulkan instance creation, validation layer and debug messenger.
//!
//! Validation is an explicit constructor argument. When it is requested the
//! Khronos validation layer must be present; its absence is a startup error.
//! Validation messages are forwarded into `tracing`.

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

pub const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level settings.
#[derive(Debug, Clone, Copy)]
pub struct InstanceDesc<'a> {
    pub application_name: &'a CStr,
    pub enable_validation: bool,
    /// Surface extensions reported by the window system.
    pub surface_extensions: &'a [*const c_char],
}

pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    pub fn new(desc: &InstanceDesc<'_>) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        if desc.enable_validation && !Self::is_validation_layer_available(&entry)? {
            return Err(RhiError::MissingLayer(
                VALIDATION_LAYER_NAME.to_string_lossy().into_owned(),
            ));
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(desc.application_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"vkr")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let extensions = required_extensions(desc.surface_extensions, desc.enable_validation);
        for ext in &extensions {
            debug!("Instance extension: {:?}", unsafe { CStr::from_ptr(*ext) });
        }

        let layers = if desc.enable_validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers)
            .flags(instance_create_flags());

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!("Vulkan instance created");

        let (debug_utils, debug_messenger) = if desc.enable_validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = match Self::setup_debug_messenger(&debug_utils) {
                Ok(m) => m,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };
            info!("Validation layer enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(available.iter().any(|layer| {
            layer.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER_NAME)
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
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

        Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? })
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Window-system extensions plus portability and debug-utils as needed.
fn required_extensions(surface: &[*const c_char], validation: bool) -> Vec<*const c_char> {
    let mut extensions = surface.to_vec();

    if cfg!(target_os = "macos") {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
    }
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    extensions
}

fn instance_create_flags() -> vk::InstanceCreateFlags {
    if cfg!(target_os = "macos") {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "other",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!(target: "vulkan", "[{kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!(target: "vulkan", "[{kind}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!(target: "vulkan", "[{kind}] {message}"),
        _ => debug!(target: "vulkan", "[{kind}] {message}"),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_without_validation() {
        let desc = InstanceDesc {
            application_name: c"vkr-test",
            enable_validation: false,
            surface_extensions: &[],
        };
        match Instance::new(&desc) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) => eprintln!("Skipping test: Vulkan not available ({e})"),
        }
    }

    #[test]
    fn test_debug_utils_only_with_validation() {
        let surface = [ash::khr::surface::NAME.as_ptr()];

        let plain = required_extensions(&surface, false);
        assert!(!plain.contains(&ash::ext::debug_utils::NAME.as_ptr()));
        assert_eq!(plain[0], ash::khr::surface::NAME.as_ptr());

        let with_validation = required_extensions(&surface, true);
        assert!(with_validation.contains(&ash::ext::debug_utils::NAME.as_ptr()));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_portability_on_macos() {
        let exts = required_extensions(&[], false);
        assert!(exts.contains(&ash::khr::portability_enumeration::NAME.as_ptr()));
        assert!(instance_create_flags().contains(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR));
    }
}
