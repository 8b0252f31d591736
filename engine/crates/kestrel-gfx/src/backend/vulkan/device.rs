use std::ffi::{CStr, c_char};

use ash::vk;
use itertools::Itertools;

use crate::backend::GfxLimits;

/// 被选中的物理设备以及三种队列所在的 family
pub(super) struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub limits: GfxLimits,
    pub graphics_family: u32,
    pub compute_family: u32,
    pub transfer_family: u32,
}

/// 优先选择独立显卡，如果没有则选择第一个有 graphics queue 的显卡
pub(super) fn pick_physical_device(instance: &ash::Instance) -> PhysicalDeviceInfo {
    let pdevices = unsafe { instance.enumerate_physical_devices() }
        .unwrap_or_else(|e| panic!("failed to enumerate physical devices: {e:?}"));

    let candidates = pdevices.into_iter().filter_map(|pdevice| physical_device_info(instance, pdevice)).collect_vec();
    let discrete = candidates.iter().position(|(props, _)| props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU);
    let (props, info) = candidates
        .into_iter()
        .nth(discrete.unwrap_or(0))
        .unwrap_or_else(|| panic!("no physical device with a graphics queue"));

    log::info!(
        "picked gpu: {:?}, queue families: graphics {}, compute {}, transfer {}",
        props.device_name_as_c_str().unwrap_or_default(),
        info.graphics_family,
        info.compute_family,
        info.transfer_family
    );
    info
}

fn physical_device_info(
    instance: &ash::Instance,
    pdevice: vk::PhysicalDevice,
) -> Option<(vk::PhysicalDeviceProperties, PhysicalDeviceInfo)> {
    let props = unsafe { instance.get_physical_device_properties(pdevice) };
    let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
    log::debug!("{:?} queue family props:\n{:#?}", props.device_name_as_c_str().unwrap_or_default(), queue_family_props);

    // 找到包含 include 且不包含 exclude 的 queue family
    let find_family = |include: vk::QueueFlags, exclude: vk::QueueFlags| {
        queue_family_props
            .iter()
            .position(|family| family.queue_flags.contains(include) && (family.queue_flags & exclude).is_empty())
            .map(|index| index as u32)
    };

    let graphics_family = find_family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, vk::QueueFlags::empty())?;
    // 专用的 compute / transfer queue 不存在时，退回到更通用的 family
    let compute_family = find_family(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics_family);
    let transfer_family = find_family(vk::QueueFlags::TRANSFER, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        .unwrap_or(compute_family);

    let limits = GfxLimits {
        min_uniform_buffer_offset_alignment: props.limits.min_uniform_buffer_offset_alignment,
        min_storage_buffer_offset_alignment: props.limits.min_storage_buffer_offset_alignment,
        non_coherent_atom_size: props.limits.non_coherent_atom_size,
        timestamp_period: props.limits.timestamp_period,
    };

    Some((
        props,
        PhysicalDeviceInfo {
            handle: pdevice,
            limits,
            graphics_family,
            compute_family,
            transfer_family,
        },
    ))
}

/// device 所需的所有 extension
fn device_extensions() -> Vec<*const c_char> {
    vec![ash::khr::swapchain::NAME.as_ptr()]
}

/// 每个不同的 queue family 各创建一个 queue
pub(super) fn create_device(instance: &ash::Instance, pdevice: &PhysicalDeviceInfo) -> ash::Device {
    let _span = tracy_client::span!("create_device");

    let priorities = [1.0f32];
    let queue_cis = [pdevice.graphics_family, pdevice.compute_family, pdevice.transfer_family]
        .into_iter()
        .unique()
        .map(|family| vk::DeviceQueueCreateInfo::default().queue_family_index(family).queue_priorities(&priorities))
        .collect_vec();

    let exts = device_extensions();
    for ext in &exts {
        log::info!("device extension: {:?}", unsafe { CStr::from_ptr(*ext) });
    }

    let basic_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true).pipeline_statistics_query(true);
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .host_query_reset(true)
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true) // 即使一些 descriptor 是 invalid
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .descriptor_binding_storage_buffer_update_after_bind(true);
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true).dynamic_rendering(true);
    let mut all_features = vk::PhysicalDeviceFeatures2::default()
        .features(basic_features)
        .push_next(&mut features12)
        .push_next(&mut features13);

    let device_ci = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_cis)
        .enabled_extension_names(&exts)
        .push_next(&mut all_features);

    unsafe { instance.create_device(pdevice.handle, &device_ci, None) }
        .unwrap_or_else(|e| panic!("failed to create device: {e:?}"))
}
