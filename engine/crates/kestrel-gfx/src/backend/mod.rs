//! GPU API 的边界
//!
//! 上层的所有 manager 只通过 [`GfxBackend`] 访问设备，签名直接使用 `ash::vk` 的类型。
//!
//! - [`vulkan::VulkanBackend`]：真实设备，基于 ash + vk-mem
//! - [`headless::HeadlessBackend`]：进程内模拟，记录调用日志，用于测试与无窗口运行
//!
//! 创建类的调用失败时直接 panic；只有存在“预期内的临时状态”的调用才返回结果：
//! fence 等待超时、query 未就绪、swapchain 过期。

pub mod headless;
pub mod vulkan;

use std::rc::Rc;

use ash::{prelude::VkResult, vk};

/// 上层持有 backend 的方式：单线程共享
pub type GfxBackendRc = Rc<dyn GfxBackend>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Transfer];
}

#[derive(Copy, Clone, Debug)]
pub struct GfxQueue {
    pub family: u32,
    pub queue: vk::Queue,
}

/// 三种队列对应的 family 与 queue，不同的队列可能指向同一个 family
#[derive(Copy, Clone, Debug)]
pub struct GfxQueueFamilies {
    pub graphics: GfxQueue,
    pub compute: GfxQueue,
    pub transfer: GfxQueue,
}

impl GfxQueueFamilies {
    #[inline]
    pub fn get(&self, kind: QueueKind) -> GfxQueue {
        match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct GfxLimits {
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    pub min_storage_buffer_offset_alignment: vk::DeviceSize,
    pub non_coherent_atom_size: vk::DeviceSize,
    /// 一个 timestamp tick 对应的纳秒数
    pub timestamp_period: f32,
}

#[derive(Copy, Clone, Debug)]
pub struct SwapchainDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub usage: vk::ImageUsageFlags,
    pub old_swapchain: vk::SwapchainKHR,
}

pub trait GfxBackend {
    // device
    fn queue_families(&self) -> GfxQueueFamilies;
    fn limits(&self) -> GfxLimits;
    /// optimal tiling 下的 format features
    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags;
    fn device_wait_idle(&self);
    fn set_debug_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str);

    // image & buffer
    /// 创建 image 并为其分配显存
    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> vk::Image;
    /// 销毁 image 并释放显存；borrowed image 永远不能走这条路径
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> vk::ImageView;
    fn destroy_image_view(&self, view: vk::ImageView);
    /// `host_mapped` 为 true 时 buffer 在整个生命周期内保持 map 状态
    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>, host_mapped: bool) -> vk::Buffer;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn write_mapped(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]);
    fn flush_mapped(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> vk::Sampler;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // descriptor
    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo<'_>) -> vk::DescriptorPool;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn create_descriptor_set_layout(&self, info: &vk::DescriptorSetLayoutCreateInfo<'_>) -> vk::DescriptorSetLayout;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet;
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet);
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    // pipeline
    fn create_shader_module(&self, code: &[u32]) -> vk::ShaderModule;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo<'_>) -> vk::PipelineLayout;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo<'_>) -> vk::Pipeline;
    fn create_compute_pipeline(&self, info: &vk::ComputePipelineCreateInfo<'_>) -> vk::Pipeline;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // command pool & command buffer
    fn create_command_pool(&self, queue_family: u32) -> vk::CommandPool;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> vk::CommandBuffer;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, usage: vk::CommandBufferUsageFlags);
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer);
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer);

    // synchronization
    fn create_fence(&self, signaled: bool) -> vk::Fence;
    fn destroy_fence(&self, fence: vk::Fence);
    /// 返回 SUCCESS 或 TIMEOUT，其他结果由调用方决定如何处理
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> vk::Result;
    fn reset_fence(&self, fence: vk::Fence);
    /// `timeline_initial` 为 Some 时创建 timeline semaphore
    fn create_semaphore(&self, timeline_initial: Option<u64>) -> vk::Semaphore;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo2<'_>], fence: vk::Fence);

    // query
    fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> vk::QueryPool;
    fn destroy_query_pool(&self, pool: vk::QueryPool);
    /// host 端 reset (hostQueryReset)
    fn reset_query_pool(&self, pool: vk::QueryPool, first: u32, count: u32);
    /// 将 `[first, first + count)` 的结果写入 data，每个 query 占 stride 字节
    ///
    /// 返回 SUCCESS 或 NOT_READY，其他结果由调用方处理
    fn get_query_pool_results(
        &self,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
        data: &mut [u8],
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) -> vk::Result;

    // swapchain
    /// 返回 swapchain 以及 surface 实际采用的 extent，可能与 `desc.extent` 不同
    fn create_swapchain(&self, desc: &SwapchainDesc) -> (vk::SwapchainKHR, vk::Extent2D);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Vec<vk::Image>;
    /// 返回 (image index, suboptimal)
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// 返回 suboptimal
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    // command recording
    fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dependency_info: &vk::DependencyInfo<'_>);
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    #[allow(clippy::too_many_arguments)]
    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );
    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    );
    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering_info: &vk::RenderingInfo<'_>);
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewports: &[vk::Viewport]);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissors: &[vk::Rect2D]);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_draw_indexed_indirect(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_x: u32, group_y: u32, group_z: u32);
    fn cmd_reset_query_pool(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32);
    fn cmd_write_timestamp2(&self, cmd: vk::CommandBuffer, stage: vk::PipelineStageFlags2, pool: vk::QueryPool, query: u32);
    fn cmd_begin_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32, flags: vk::QueryControlFlags);
    fn cmd_end_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32);
    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, color: [f32; 4]);
    fn cmd_end_label(&self, cmd: vk::CommandBuffer);
}

/// 给任意 vk handle 设置 debug name
#[inline]
pub fn set_object_name<H: vk::Handle>(backend: &dyn GfxBackend, handle: H, name: &str) {
    backend.set_debug_name(H::TYPE, handle.as_raw(), name);
}
