//! 基于 ash + vk-mem 的真实设备

mod device;
mod instance;

use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::CString,
};

use ash::{prelude::VkResult, vk};
use vk_mem::Alloc;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::{GfxBackend, GfxLimits, GfxQueue, GfxQueueFamilies, SwapchainDesc};

pub struct VulkanBackendDesc {
    pub app_name: String,
    pub enable_validation: bool,
    /// 提供窗口句柄时会创建 surface，否则无法创建 swapchain
    pub window: Option<(RawDisplayHandle, RawWindowHandle)>,
}

struct BufferAllocation {
    allocation: vk_mem::Allocation,
    mapped_ptr: Option<*mut u8>,
}

pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils_instance: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    swapchain_pf: ash::khr::swapchain::Device,
    surface_pf: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,

    /// 需要在 device 之前销毁
    allocator: Option<vk_mem::Allocator>,
    image_allocations: RefCell<HashMap<vk::Image, vk_mem::Allocation>>,
    buffer_allocations: RefCell<HashMap<vk::Buffer, BufferAllocation>>,

    queue_families: GfxQueueFamilies,
    limits: GfxLimits,
}

// new & init
impl VulkanBackend {
    pub fn new(desc: &VulkanBackendDesc) -> Self {
        let _span = tracy_client::span!("VulkanBackend::new");

        let entry = unsafe { ash::Entry::load() }.unwrap_or_else(|e| panic!("failed to load vulkan: {e}"));
        let instance =
            instance::create_instance(&entry, &desc.app_name, desc.enable_validation, desc.window.map(|(d, _)| d));

        let debug_utils_instance = desc.enable_validation.then(|| {
            let pf = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe { pf.create_debug_utils_messenger(&instance::debug_messenger_ci(), None) }
                .unwrap_or_else(|e| panic!("failed to create debug messenger: {e:?}"));
            (pf, messenger)
        });

        let surface_pf = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = desc.window.map_or(vk::SurfaceKHR::null(), |(display, window)| unsafe {
            ash_window::create_surface(&entry, &instance, display, window, None)
                .unwrap_or_else(|e| panic!("failed to create surface: {e:?}"))
        });

        let pdevice = device::pick_physical_device(&instance);
        let device = device::create_device(&instance, &pdevice);

        let queue = |family: u32| GfxQueue {
            family,
            queue: unsafe { device.get_device_queue(family, 0) },
        };
        let queue_families = GfxQueueFamilies {
            graphics: queue(pdevice.graphics_family),
            compute: queue(pdevice.compute_family),
            transfer: queue(pdevice.transfer_family),
        };

        // vma 需要引用 Instance 以及 Device，因此在其他部分都初始化完成后再初始化
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&instance, &device, pdevice.handle);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }
            .unwrap_or_else(|e| panic!("failed to create memory allocator: {e:?}"));

        let debug_utils = desc.enable_validation.then(|| ash::ext::debug_utils::Device::new(&instance, &device));
        let swapchain_pf = ash::khr::swapchain::Device::new(&instance, &device);

        Self {
            _entry: entry,
            instance,
            debug_utils_instance,
            physical_device: pdevice.handle,
            device,
            debug_utils,
            swapchain_pf,
            surface_pf,
            surface,
            allocator: Some(allocator),
            image_allocations: RefCell::new(HashMap::new()),
            buffer_allocations: RefCell::new(HashMap::new()),
            queue_families,
            limits: pdevice.limits,
        }
    }
}

// getters
impl VulkanBackend {
    #[inline]
    pub fn ash_device(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    fn allocator(&self) -> &vk_mem::Allocator {
        self.allocator.as_ref().unwrap()
    }
}

// destroy
impl Drop for VulkanBackend {
    fn drop(&mut self) {
        log::info!("destroying vulkan backend");
        unsafe {
            let _ = self.device.device_wait_idle();

            let leaked_images = self.image_allocations.get_mut().len();
            let leaked_buffers = self.buffer_allocations.get_mut().len();
            if leaked_images + leaked_buffers > 0 {
                log::warn!("vulkan backend dropped with {leaked_images} images and {leaked_buffers} buffers alive");
            }
            for (image, mut allocation) in self.image_allocations.get_mut().drain() {
                self.allocator.as_ref().unwrap().destroy_image(image, &mut allocation);
            }
            for (buffer, mut buffer_alloc) in self.buffer_allocations.get_mut().drain() {
                if buffer_alloc.mapped_ptr.is_some() {
                    self.allocator.as_ref().unwrap().unmap_memory(&mut buffer_alloc.allocation);
                }
                self.allocator.as_ref().unwrap().destroy_buffer(buffer, &mut buffer_alloc.allocation);
            }

            // 通过 drop 销毁 vma
            self.allocator.take();
            self.device.destroy_device(None);
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_pf.destroy_surface(self.surface, None);
            }
            if let Some((pf, messenger)) = self.debug_utils_instance.take() {
                pf.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl GfxBackend for VulkanBackend {
    fn queue_families(&self) -> GfxQueueFamilies {
        self.queue_families
    }

    fn limits(&self) -> GfxLimits {
        self.limits
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe { self.instance.get_physical_device_format_properties(self.physical_device, format) }
            .optimal_tiling_features
    }

    fn device_wait_idle(&self) {
        unsafe { self.device.device_wait_idle() }.unwrap_or_else(|e| panic!("device_wait_idle failed: {e:?}"));
    }

    fn set_debug_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let name = CString::new(name).unwrap_or_default();
        let name_info = vk::DebugUtilsObjectNameInfoEXT {
            object_type,
            object_handle: raw_handle,
            p_object_name: name.as_ptr(),
            ..Default::default()
        };
        unsafe {
            let _ = debug_utils.set_debug_utils_object_name(&name_info);
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> vk::Image {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, allocation) = unsafe { self.allocator().create_image(info, &alloc_ci) }
            .unwrap_or_else(|e| panic!("failed to create image: {e:?}"));
        self.image_allocations.borrow_mut().insert(image, allocation);
        image
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut allocation = self
            .image_allocations
            .borrow_mut()
            .remove(&image)
            .unwrap_or_else(|| panic!("destroy_image: {image:?} was not allocated by this backend"));
        unsafe { self.allocator().destroy_image(image, &mut allocation) };
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> vk::ImageView {
        unsafe { self.device.create_image_view(info, None) }
            .unwrap_or_else(|e| panic!("failed to create image view: {e:?}"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>, host_mapped: bool) -> vk::Buffer {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: if host_mapped {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::empty()
            },
            ..Default::default()
        };
        let (buffer, mut allocation) = unsafe { self.allocator().create_buffer(info, &alloc_ci) }
            .unwrap_or_else(|e| panic!("failed to create buffer: {e:?}"));

        let mapped_ptr = host_mapped.then(|| {
            unsafe { self.allocator().map_memory(&mut allocation) }
                .unwrap_or_else(|e| panic!("failed to map buffer: {e:?}"))
        });
        self.buffer_allocations.borrow_mut().insert(buffer, BufferAllocation { allocation, mapped_ptr });
        buffer
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut buffer_alloc = self
            .buffer_allocations
            .borrow_mut()
            .remove(&buffer)
            .unwrap_or_else(|| panic!("destroy_buffer: {buffer:?} was not allocated by this backend"));
        unsafe {
            if buffer_alloc.mapped_ptr.is_some() {
                self.allocator().unmap_memory(&mut buffer_alloc.allocation);
            }
            self.allocator().destroy_buffer(buffer, &mut buffer_alloc.allocation);
        }
    }

    fn write_mapped(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        let allocations = self.buffer_allocations.borrow();
        let mapped_ptr = allocations
            .get(&buffer)
            .and_then(|alloc| alloc.mapped_ptr)
            .unwrap_or_else(|| panic!("write_mapped: {buffer:?} is not mapped"));
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped_ptr.add(offset as usize), data.len());
        }
    }

    fn flush_mapped(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let allocations = self.buffer_allocations.borrow();
        let alloc = allocations.get(&buffer).unwrap_or_else(|| panic!("flush_mapped: unknown buffer {buffer:?}"));
        self.allocator()
            .flush_allocation(&alloc.allocation, offset, size)
            .unwrap_or_else(|e| panic!("failed to flush buffer: {e:?}"));
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> vk::Sampler {
        unsafe { self.device.create_sampler(info, None) }.unwrap_or_else(|e| panic!("failed to create sampler: {e:?}"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo<'_>) -> vk::DescriptorPool {
        unsafe { self.device.create_descriptor_pool(info, None) }
            .unwrap_or_else(|e| panic!("failed to create descriptor pool: {e:?}"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn create_descriptor_set_layout(&self, info: &vk::DescriptorSetLayoutCreateInfo<'_>) -> vk::DescriptorSetLayout {
        unsafe { self.device.create_descriptor_set_layout(info, None) }
            .unwrap_or_else(|e| panic!("failed to create descriptor set layout: {e:?}"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .unwrap_or_else(|e| panic!("failed to allocate descriptor set: {e:?}"))[0]
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        unsafe { self.device.free_descriptor_sets(pool, &[set]) }
            .unwrap_or_else(|e| panic!("failed to free descriptor set: {e:?}"));
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) };
    }

    fn create_shader_module(&self, code: &[u32]) -> vk::ShaderModule {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
            .unwrap_or_else(|e| panic!("failed to create shader module: {e:?}"))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>) -> vk::PipelineLayout {
        unsafe { self.device.create_pipeline_layout(info, None) }
            .unwrap_or_else(|e| panic!("failed to create pipeline layout: {e:?}"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo<'_>) -> vk::Pipeline {
        unsafe { self.device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None) }
            .unwrap_or_else(|(_, e)| panic!("failed to create graphics pipeline: {e:?}"))[0]
    }

    fn create_compute_pipeline(&self, info: &vk::ComputePipelineCreateInfo<'_>) -> vk::Pipeline {
        unsafe { self.device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None) }
            .unwrap_or_else(|(_, e)| panic!("failed to create compute pipeline: {e:?}"))[0]
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_command_pool(&self, queue_family: u32) -> vk::CommandPool {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.device.create_command_pool(&info, None) }
            .unwrap_or_else(|e| panic!("failed to create command pool: {e:?}"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> vk::CommandBuffer {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe { self.device.allocate_command_buffers(&info) }
            .unwrap_or_else(|e| panic!("failed to allocate command buffer: {e:?}"))[0]
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, usage: vk::CommandBufferUsageFlags) {
        let info = vk::CommandBufferBeginInfo::default().flags(usage);
        unsafe { self.device.begin_command_buffer(command_buffer, &info) }
            .unwrap_or_else(|e| panic!("failed to begin command buffer: {e:?}"));
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.end_command_buffer(command_buffer) }
            .unwrap_or_else(|e| panic!("failed to end command buffer: {e:?}"));
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::RELEASE_RESOURCES) }
            .unwrap_or_else(|e| panic!("failed to reset command buffer: {e:?}"));
    }

    fn create_fence(&self, signaled: bool) -> vk::Fence {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .unwrap_or_else(|e| panic!("failed to create fence: {e:?}"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> vk::Result {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => vk::Result::SUCCESS,
            Err(e) => e,
        }
    }

    fn reset_fence(&self, fence: vk::Fence) {
        unsafe { self.device.reset_fences(&[fence]) }.unwrap_or_else(|e| panic!("failed to reset fence: {e:?}"));
    }

    fn create_semaphore(&self, timeline_initial: Option<u64>) -> vk::Semaphore {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(timeline_initial.unwrap_or_default());
        let mut info = vk::SemaphoreCreateInfo::default();
        if timeline_initial.is_some() {
            info = info.push_next(&mut type_info);
        }
        unsafe { self.device.create_semaphore(&info, None) }
            .unwrap_or_else(|e| panic!("failed to create semaphore: {e:?}"))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo2<'_>], fence: vk::Fence) {
        unsafe { self.device.queue_submit2(queue, submits, fence) }
            .unwrap_or_else(|e| panic!("queue submit failed: {e:?}"));
    }

    fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> vk::QueryPool {
        unsafe { self.device.create_query_pool(info, None) }
            .unwrap_or_else(|e| panic!("failed to create query pool: {e:?}"))
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        unsafe { self.device.destroy_query_pool(pool, None) };
    }

    fn reset_query_pool(&self, pool: vk::QueryPool, first: u32, count: u32) {
        unsafe { self.device.reset_query_pool(pool, first, count) };
    }

    fn get_query_pool_results(
        &self,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
        data: &mut [u8],
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) -> vk::Result {
        unsafe {
            (self.device.fp_v1_0().get_query_pool_results)(
                self.device.handle(),
                pool,
                first,
                count,
                data.len(),
                data.as_mut_ptr().cast(),
                stride,
                flags,
            )
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> (vk::SwapchainKHR, vk::Extent2D) {
        assert!(self.surface != vk::SurfaceKHR::null(), "VulkanBackend was created without a window surface");
        let caps = unsafe {
            self.surface_pf.get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .unwrap_or_else(|e| panic!("failed to query surface capabilities: {e:?}"));

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: desc.extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: desc.extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };
        let mut image_count = desc.image_count.max(caps.min_image_count);
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(desc.format)
            .image_color_space(desc.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(desc.usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);
        let swapchain = unsafe { self.swapchain_pf.create_swapchain(&info, None) }
            .unwrap_or_else(|e| panic!("failed to create swapchain: {e:?}"));
        (swapchain, extent)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_pf.destroy_swapchain(swapchain, None) };
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Vec<vk::Image> {
        unsafe { self.swapchain_pf.get_swapchain_images(swapchain) }
            .unwrap_or_else(|e| panic!("failed to get swapchain images: {e:?}"))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe { self.swapchain_pf.acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null()) }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_pf.queue_present(queue, &present_info) }
    }

    fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dependency_info: &vk::DependencyInfo<'_>) {
        unsafe { self.device.cmd_pipeline_barrier2(cmd, dependency_info) };
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions) };
    }

    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe { self.device.cmd_blit_image(cmd, src, src_layout, dst, dst_layout, regions, filter) };
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe { self.device.cmd_clear_color_image(cmd, image, layout, color, ranges) };
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering_info: &vk::RenderingInfo<'_>) {
        unsafe { self.device.cmd_begin_rendering(cmd, rendering_info) };
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) };
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe { self.device.cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[]) };
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) };
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, first_binding, buffers, offsets) };
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe { self.device.cmd_bind_index_buffer(cmd, buffer, offset, index_type) };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, viewports) };
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissors: &[vk::Rect2D]) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, scissors) };
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance) };
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(cmd, index_count, instance_count, first_index, vertex_offset, first_instance)
        };
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe { self.device.cmd_draw_indexed_indirect(cmd, buffer, offset, draw_count, stride) };
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_x: u32, group_y: u32, group_z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, group_x, group_y, group_z) };
    }

    fn cmd_reset_query_pool(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32) {
        unsafe { self.device.cmd_reset_query_pool(cmd, pool, first, count) };
    }

    fn cmd_write_timestamp2(&self, cmd: vk::CommandBuffer, stage: vk::PipelineStageFlags2, pool: vk::QueryPool, query: u32) {
        unsafe { self.device.cmd_write_timestamp2(cmd, stage, pool, query) };
    }

    fn cmd_begin_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32, flags: vk::QueryControlFlags) {
        unsafe { self.device.cmd_begin_query(cmd, pool, query, flags) };
    }

    fn cmd_end_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        unsafe { self.device.cmd_end_query(cmd, pool, query) };
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, color: [f32; 4]) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
        unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
        }
    }
}
