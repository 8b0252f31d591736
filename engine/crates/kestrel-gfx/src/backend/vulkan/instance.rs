use std::ffi::{CStr, CString, c_char, c_void};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// 设置所需的 layers 和 extensions，创建 vk instance
pub(super) fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display_handle: Option<RawDisplayHandle>,
) -> ash::Instance {
    let _span = tracy_client::span!("create_instance");

    let app_name = CString::new(app_name).unwrap_or_default();
    let app_info = vk::ApplicationInfo::default()
        .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"kestrel")
        .engine_version(vk::make_api_version(0, 1, 0, 0));

    let mut extensions: Vec<*const c_char> = Vec::new();
    if let Some(display_handle) = display_handle {
        let surface_exts = ash_window::enumerate_required_extensions(display_handle)
            .unwrap_or_else(|e| panic!("failed to query surface extensions: {e:?}"));
        extensions.extend_from_slice(surface_exts);
    }
    let layers = if enable_validation && has_layer(entry, VALIDATION_LAYER) {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        if enable_validation {
            log::warn!("validation layer is not available");
        }
        vec![]
    };

    for ext in &extensions {
        log::info!("instance extension: {:?}", unsafe { CStr::from_ptr(*ext) });
    }

    let mut messenger_ci = debug_messenger_ci();
    let mut instance_ci = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);
    if !layers.is_empty() {
        instance_ci = instance_ci.push_next(&mut messenger_ci);
    }

    unsafe { entry.create_instance(&instance_ci, None) }.unwrap_or_else(|e| panic!("failed to create instance: {e:?}"))
}

fn has_layer(entry: &ash::Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|layer_name| layer_name == name))
}

pub(super) fn debug_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vk_debug_callback))
}

unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe {
        p_callback_data
            .as_ref()
            .and_then(|data| data.message_as_c_str())
            .map(|msg| msg.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{:?}] {}", message_type, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{:?}] {}", message_type, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("[{:?}] {}", message_type, message),
        _ => log::trace!("[{:?}] {}", message_type, message),
    }

    vk::FALSE
}
