//! 不依赖真实设备的 backend
//!
//! 所有 GPU 对象只是递增的整数句柄；调用被记录到日志中，测试通过日志检查
//! barrier、blit、提交与 fence 等待的顺序。fence 在提交时可以自动 signal，
//! 也可以等到 [`HeadlessBackend::complete_submissions`] 时再 signal。

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
};

use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use crate::backend::{GfxBackend, GfxLimits, GfxQueue, GfxQueueFamilies, SwapchainDesc};

#[derive(Copy, Clone, Debug)]
pub struct ImageBarrierRecord {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub range: vk::ImageSubresourceRange,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

#[derive(Copy, Clone, Debug)]
pub struct BufferBarrierRecord {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// 调用日志中的一条记录
#[derive(Clone, Debug)]
pub enum HeadlessCall {
    CreateImage { image: vk::Image, extent: vk::Extent3D, mip_levels: u32, array_layers: u32 },
    /// 释放 image 的显存
    FreeImageMemory { image: vk::Image },
    CreateImageView { view: vk::ImageView, image: vk::Image, view_type: vk::ImageViewType, base_mip: u32, mip_count: u32 },
    DestroyImageView { view: vk::ImageView },
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize, mapped: bool },
    FreeBufferMemory { buffer: vk::Buffer },
    WriteMapped { buffer: vk::Buffer, offset: vk::DeviceSize, len: usize },
    FlushMapped { buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize },
    UpdateDescriptorSets { writes: Vec<(vk::DescriptorSet, u32, u32, vk::DescriptorType, vk::ImageLayout)> },
    CreatePipeline { pipeline: vk::Pipeline, bind_point: vk::PipelineBindPoint },
    CreateCommandPool { pool: vk::CommandPool, queue_family: u32 },
    DestroyCommandPool { pool: vk::CommandPool },
    AllocateCommandBuffer { cmd: vk::CommandBuffer, pool: vk::CommandPool },
    FreeCommandBuffer { cmd: vk::CommandBuffer },
    BeginCommandBuffer { cmd: vk::CommandBuffer },
    EndCommandBuffer { cmd: vk::CommandBuffer },
    ResetCommandBuffer { cmd: vk::CommandBuffer },
    PipelineBarrier {
        cmd: vk::CommandBuffer,
        images: Vec<ImageBarrierRecord>,
        buffers: Vec<BufferBarrierRecord>,
        memory_barrier_count: usize,
    },
    CopyBuffer { cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: Vec<vk::BufferCopy> },
    CopyBufferToImage { cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Image, dst_layout: vk::ImageLayout },
    BlitImage {
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        src_mip: u32,
        dst_mip: u32,
        src_extent: vk::Extent3D,
        dst_extent: vk::Extent3D,
        filter: vk::Filter,
    },
    ClearColorImage { cmd: vk::CommandBuffer, image: vk::Image, layout: vk::ImageLayout },
    BeginRendering { cmd: vk::CommandBuffer, extent: vk::Extent2D, color_attachment_count: u32 },
    EndRendering { cmd: vk::CommandBuffer },
    BindPipeline { cmd: vk::CommandBuffer, pipeline: vk::Pipeline },
    BindDescriptorSets { cmd: vk::CommandBuffer, first_set: u32, sets: Vec<vk::DescriptorSet> },
    PushConstants { cmd: vk::CommandBuffer, offset: u32, len: usize },
    BindVertexBuffers { cmd: vk::CommandBuffer },
    BindIndexBuffer { cmd: vk::CommandBuffer },
    SetViewportScissor { cmd: vk::CommandBuffer },
    Draw { cmd: vk::CommandBuffer },
    Dispatch { cmd: vk::CommandBuffer, groups: [u32; 3] },
    ResetQueryPool { pool: vk::QueryPool, first: u32, count: u32 },
    CmdResetQueryPool { cmd: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32 },
    GetQueryResults { pool: vk::QueryPool, first: u32, count: u32 },
    WriteTimestamp { cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32 },
    BeginQuery { cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32 },
    EndQuery { cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32 },
    BeginLabel { cmd: vk::CommandBuffer, label: String },
    EndLabel { cmd: vk::CommandBuffer },
    Submit {
        queue: vk::Queue,
        command_buffers: Vec<vk::CommandBuffer>,
        wait_semaphores: Vec<vk::Semaphore>,
        signal_semaphores: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence { fence: vk::Fence },
    WaitFence { fence: vk::Fence, result: vk::Result },
    ResetFence { fence: vk::Fence },
    AcquireImage { swapchain: vk::SwapchainKHR, result: vk::Result, index: Option<u32> },
    Present { swapchain: vk::SwapchainKHR, image_index: u32, wait_semaphore: vk::Semaphore },
    DeviceWaitIdle,
}

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub graphics_family: u32,
    pub compute_family: u32,
    pub transfer_family: u32,
    pub limits: GfxLimits,
    /// 提交时立即 signal fence
    pub auto_complete: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            graphics_family: 0,
            compute_family: 1,
            transfer_family: 2,
            limits: GfxLimits {
                min_uniform_buffer_offset_alignment: 256,
                min_storage_buffer_offset_alignment: 64,
                non_coherent_atom_size: 64,
                timestamp_period: 1.0,
            },
            auto_complete: true,
        }
    }
}

struct HeadlessSwapchain {
    images: Vec<vk::Image>,
    next_index: u32,
}

struct HeadlessQueryPool {
    query_type: vk::QueryType,
    values: Vec<u64>,
}

#[derive(Default)]
struct HeadlessState {
    next_raw: u64,
    calls: Vec<HeadlessCall>,
    live_objects: HashSet<u64>,
    debug_names: HashMap<u64, String>,

    /// fence -> signaled
    fences: HashMap<vk::Fence, bool>,
    /// 已经提交但尚未完成的 fence
    in_flight: Vec<vk::Fence>,
    auto_complete: bool,

    images: HashMap<vk::Image, vk::Extent3D>,
    mapped: HashMap<vk::Buffer, Vec<u8>>,
    format_features: HashMap<vk::Format, vk::FormatFeatureFlags>,

    query_pools: HashMap<vk::QueryPool, HeadlessQueryPool>,
    /// (pool, query) -> begin_query 时日志的长度
    open_queries: HashMap<(vk::QueryPool, u32), usize>,
    queries_ready: bool,
    timestamp_tick: u64,

    swapchains: HashMap<vk::SwapchainKHR, HeadlessSwapchain>,
    /// 模拟 surface 的 current extent，为 None 时采用请求的 extent
    surface_extent: Option<vk::Extent2D>,
    next_acquire_result: Option<vk::Result>,
    next_present_result: Option<vk::Result>,
}

impl HeadlessState {
    fn new_raw(&mut self) -> u64 {
        self.next_raw += 1;
        self.next_raw
    }

    fn create<H: Handle>(&mut self) -> H {
        let raw = self.new_raw();
        self.live_objects.insert(raw);
        H::from_raw(raw)
    }

    fn destroy<H: Handle>(&mut self, handle: H) {
        let raw = handle.as_raw();
        assert!(self.live_objects.remove(&raw), "headless: destroy of unknown object {:?} {raw}", H::TYPE);
    }
}

pub struct HeadlessBackend {
    config: HeadlessConfig,
    queues: HashMap<u32, vk::Queue>,
    state: RefCell<HeadlessState>,
}

// new & init
impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        let mut state = HeadlessState {
            auto_complete: config.auto_complete,
            queries_ready: true,
            ..Default::default()
        };

        let mut queues = HashMap::new();
        for family in [config.graphics_family, config.compute_family, config.transfer_family] {
            queues.entry(family).or_insert_with(|| vk::Queue::from_raw(state.new_raw()));
        }

        Self {
            config,
            queues,
            state: RefCell::new(state),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

// tools: 测试中用来控制与观察模拟状态
impl HeadlessBackend {
    pub fn calls(&self) -> Vec<HeadlessCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// 尚未销毁的 GPU 对象数量，不包含 queue 与 swapchain image
    pub fn live_object_count(&self) -> usize {
        self.state.borrow().live_objects.len()
    }

    pub fn debug_name(&self, raw_handle: u64) -> Option<String> {
        self.state.borrow().debug_names.get(&raw_handle).cloned()
    }

    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.state.borrow_mut().auto_complete = auto_complete;
    }

    /// 模拟 GPU 执行完所有已提交的工作
    pub fn complete_submissions(&self) {
        let mut state = self.state.borrow_mut();
        let in_flight = std::mem::take(&mut state.in_flight);
        for fence in in_flight {
            state.fences.insert(fence, true);
        }
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences.get(&fence).copied().unwrap_or(false)
    }

    pub fn set_queries_ready(&self, ready: bool) {
        self.state.borrow_mut().queries_ready = ready;
    }

    pub fn set_format_features(&self, format: vk::Format, features: vk::FormatFeatureFlags) {
        self.state.borrow_mut().format_features.insert(format, features);
    }

    /// 下一次 acquire 返回指定的结果，只生效一次
    pub fn set_next_acquire_result(&self, result: vk::Result) {
        self.state.borrow_mut().next_acquire_result = Some(result);
    }

    pub fn set_next_present_result(&self, result: vk::Result) {
        self.state.borrow_mut().next_present_result = Some(result);
    }

    /// 之后创建的 swapchain 都使用这个 extent，与请求的 extent 无关
    pub fn set_surface_extent(&self, extent: Option<vk::Extent2D>) {
        self.state.borrow_mut().surface_extent = extent;
    }

    pub fn read_mapped(&self, buffer: vk::Buffer, offset: usize, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        let memory = state.mapped.get(&buffer).expect("headless: buffer is not mapped");
        memory[offset..offset + len].to_vec()
    }

    fn record(&self, call: HeadlessCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

/// 读取 vk 结构体中 (ptr, count) 形式的数组
///
/// # Safety
/// ptr 必须指向至少 count 个有效元素
unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if count == 0 || ptr.is_null() { &[] } else { unsafe { std::slice::from_raw_parts(ptr, count as usize) } }
}

fn offsets_extent(offsets: &[vk::Offset3D; 2]) -> vk::Extent3D {
    vk::Extent3D {
        width: (offsets[1].x - offsets[0].x).unsigned_abs(),
        height: (offsets[1].y - offsets[0].y).unsigned_abs(),
        depth: (offsets[1].z - offsets[0].z).unsigned_abs(),
    }
}

impl GfxBackend for HeadlessBackend {
    fn queue_families(&self) -> GfxQueueFamilies {
        let queue = |family: u32| GfxQueue {
            family,
            queue: self.queues[&family],
        };
        GfxQueueFamilies {
            graphics: queue(self.config.graphics_family),
            compute: queue(self.config.compute_family),
            transfer: queue(self.config.transfer_family),
        }
    }

    fn limits(&self) -> GfxLimits {
        self.config.limits
    }

    fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        self.state.borrow().format_features.get(&format).copied().unwrap_or(
            vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
                | vk::FormatFeatureFlags::STORAGE_IMAGE
                | vk::FormatFeatureFlags::COLOR_ATTACHMENT
                | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST
                | vk::FormatFeatureFlags::TRANSFER_SRC
                | vk::FormatFeatureFlags::TRANSFER_DST,
        )
    }

    fn device_wait_idle(&self) {
        self.complete_submissions();
        self.record(HeadlessCall::DeviceWaitIdle);
    }

    fn set_debug_name(&self, _object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        self.state.borrow_mut().debug_names.insert(raw_handle, name.to_string());
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> vk::Image {
        let mut state = self.state.borrow_mut();
        let image: vk::Image = state.create();
        state.images.insert(image, info.extent);
        state.calls.push(HeadlessCall::CreateImage {
            image,
            extent: info.extent,
            mip_levels: info.mip_levels,
            array_layers: info.array_layers,
        });
        image
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.borrow_mut();
        state.destroy(image);
        state.images.remove(&image);
        state.calls.push(HeadlessCall::FreeImageMemory { image });
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> vk::ImageView {
        let mut state = self.state.borrow_mut();
        let view: vk::ImageView = state.create();
        state.calls.push(HeadlessCall::CreateImageView {
            view,
            image: info.image,
            view_type: info.view_type,
            base_mip: info.subresource_range.base_mip_level,
            mip_count: info.subresource_range.level_count,
        });
        view
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.borrow_mut();
        state.destroy(view);
        state.calls.push(HeadlessCall::DestroyImageView { view });
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>, host_mapped: bool) -> vk::Buffer {
        let mut state = self.state.borrow_mut();
        let buffer: vk::Buffer = state.create();
        if host_mapped {
            state.mapped.insert(buffer, vec![0; info.size as usize]);
        }
        state.calls.push(HeadlessCall::CreateBuffer {
            buffer,
            size: info.size,
            mapped: host_mapped,
        });
        buffer
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.borrow_mut();
        state.destroy(buffer);
        state.mapped.remove(&buffer);
        state.calls.push(HeadlessCall::FreeBufferMemory { buffer });
    }

    fn write_mapped(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let memory = state.mapped.get_mut(&buffer).expect("headless: write to unmapped buffer");
        let offset = offset as usize;
        memory[offset..offset + data.len()].copy_from_slice(data);
        state.calls.push(HeadlessCall::WriteMapped {
            buffer,
            offset: offset as vk::DeviceSize,
            len: data.len(),
        });
    }

    fn flush_mapped(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) {
        self.record(HeadlessCall::FlushMapped { buffer, offset, size });
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> vk::Sampler {
        self.state.borrow_mut().create()
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.borrow_mut().destroy(sampler);
    }

    fn create_descriptor_pool(&self, _info: &vk::DescriptorPoolCreateInfo<'_>) -> vk::DescriptorPool {
        self.state.borrow_mut().create()
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.borrow_mut().destroy(pool);
    }

    fn create_descriptor_set_layout(&self, _info: &vk::DescriptorSetLayoutCreateInfo<'_>) -> vk::DescriptorSetLayout {
        self.state.borrow_mut().create()
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.borrow_mut().destroy(layout);
    }

    fn allocate_descriptor_set(&self, _pool: vk::DescriptorPool, _layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        self.state.borrow_mut().create()
    }

    fn free_descriptor_set(&self, _pool: vk::DescriptorPool, set: vk::DescriptorSet) {
        self.state.borrow_mut().destroy(set);
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        let writes = writes
            .iter()
            .map(|write| {
                let layout = unsafe { raw_slice(write.p_image_info, write.descriptor_count) }
                    .first()
                    .map_or(vk::ImageLayout::UNDEFINED, |info| info.image_layout);
                (write.dst_set, write.dst_binding, write.dst_array_element, write.descriptor_type, layout)
            })
            .collect();
        self.record(HeadlessCall::UpdateDescriptorSets { writes });
    }

    fn create_shader_module(&self, _code: &[u32]) -> vk::ShaderModule {
        self.state.borrow_mut().create()
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state.borrow_mut().destroy(module);
    }

    fn create_pipeline_layout(&self, _info: &vk::PipelineLayoutCreateInfo<'_>) -> vk::PipelineLayout {
        self.state.borrow_mut().create()
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state.borrow_mut().destroy(layout);
    }

    fn create_graphics_pipeline(&self, _info: &vk::GraphicsPipelineCreateInfo<'_>) -> vk::Pipeline {
        let mut state = self.state.borrow_mut();
        let pipeline: vk::Pipeline = state.create();
        state.calls.push(HeadlessCall::CreatePipeline {
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        });
        pipeline
    }

    fn create_compute_pipeline(&self, _info: &vk::ComputePipelineCreateInfo<'_>) -> vk::Pipeline {
        let mut state = self.state.borrow_mut();
        let pipeline: vk::Pipeline = state.create();
        state.calls.push(HeadlessCall::CreatePipeline {
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        });
        pipeline
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state.borrow_mut().destroy(pipeline);
    }

    fn create_command_pool(&self, queue_family: u32) -> vk::CommandPool {
        let mut state = self.state.borrow_mut();
        let pool: vk::CommandPool = state.create();
        state.calls.push(HeadlessCall::CreateCommandPool { pool, queue_family });
        pool
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.borrow_mut();
        state.destroy(pool);
        state.calls.push(HeadlessCall::DestroyCommandPool { pool });
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> vk::CommandBuffer {
        let mut state = self.state.borrow_mut();
        let cmd: vk::CommandBuffer = state.create();
        state.calls.push(HeadlessCall::AllocateCommandBuffer { cmd, pool });
        cmd
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let mut state = self.state.borrow_mut();
        state.destroy(command_buffer);
        state.calls.push(HeadlessCall::FreeCommandBuffer { cmd: command_buffer });
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, _usage: vk::CommandBufferUsageFlags) {
        self.record(HeadlessCall::BeginCommandBuffer { cmd: command_buffer });
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.record(HeadlessCall::EndCommandBuffer { cmd: command_buffer });
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        self.record(HeadlessCall::ResetCommandBuffer { cmd: command_buffer });
    }

    fn create_fence(&self, signaled: bool) -> vk::Fence {
        let mut state = self.state.borrow_mut();
        let fence: vk::Fence = state.create();
        state.fences.insert(fence, signaled);
        state.calls.push(HeadlessCall::CreateFence { fence, signaled });
        fence
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        state.destroy(fence);
        state.fences.remove(&fence);
        state.in_flight.retain(|f| *f != fence);
        state.calls.push(HeadlessCall::DestroyFence { fence });
    }

    fn wait_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> vk::Result {
        let mut state = self.state.borrow_mut();
        let result = if state.fences.get(&fence).copied().unwrap_or(false) {
            vk::Result::SUCCESS
        } else {
            vk::Result::TIMEOUT
        };
        state.calls.push(HeadlessCall::WaitFence { fence, result });
        result
    }

    fn reset_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        state.fences.insert(fence, false);
        state.calls.push(HeadlessCall::ResetFence { fence });
    }

    fn create_semaphore(&self, _timeline_initial: Option<u64>) -> vk::Semaphore {
        self.state.borrow_mut().create()
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().destroy(semaphore);
    }

    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo2<'_>], fence: vk::Fence) {
        let mut command_buffers = Vec::new();
        let mut wait_semaphores = Vec::new();
        let mut signal_semaphores = Vec::new();
        for submit in submits {
            unsafe {
                command_buffers.extend(
                    raw_slice(submit.p_command_buffer_infos, submit.command_buffer_info_count)
                        .iter()
                        .map(|info| info.command_buffer),
                );
                wait_semaphores.extend(
                    raw_slice(submit.p_wait_semaphore_infos, submit.wait_semaphore_info_count)
                        .iter()
                        .map(|info| info.semaphore),
                );
                signal_semaphores.extend(
                    raw_slice(submit.p_signal_semaphore_infos, submit.signal_semaphore_info_count)
                        .iter()
                        .map(|info| info.semaphore),
                );
            }
        }

        let mut state = self.state.borrow_mut();
        if fence != vk::Fence::null() {
            if state.auto_complete {
                state.fences.insert(fence, true);
            } else {
                state.in_flight.push(fence);
            }
        }
        state.calls.push(HeadlessCall::Submit {
            queue,
            command_buffers,
            wait_semaphores,
            signal_semaphores,
            fence,
        });
    }

    fn create_query_pool(&self, info: &vk::QueryPoolCreateInfo<'_>) -> vk::QueryPool {
        let mut state = self.state.borrow_mut();
        let pool: vk::QueryPool = state.create();
        state.query_pools.insert(
            pool,
            HeadlessQueryPool {
                query_type: info.query_type,
                values: vec![0; info.query_count as usize],
            },
        );
        pool
    }

    fn destroy_query_pool(&self, pool: vk::QueryPool) {
        let mut state = self.state.borrow_mut();
        state.destroy(pool);
        state.query_pools.remove(&pool);
    }

    fn reset_query_pool(&self, pool: vk::QueryPool, first: u32, count: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(query_pool) = state.query_pools.get_mut(&pool) {
            query_pool.values[first as usize..(first + count) as usize].fill(0);
        }
        state.calls.push(HeadlessCall::ResetQueryPool { pool, first, count });
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
        let mut state = self.state.borrow_mut();
        state.calls.push(HeadlessCall::GetQueryResults { pool, first, count });
        if !state.queries_ready {
            return vk::Result::NOT_READY;
        }

        let query_pool = &state.query_pools[&pool];
        let stride = stride as usize;
        for i in 0..count as usize {
            let value = query_pool.values[first as usize + i];
            let dst = &mut data[i * stride..(i + 1) * stride];
            if query_pool.query_type == vk::QueryType::PIPELINE_STATISTICS {
                for field in dst.chunks_exact_mut(4) {
                    field.copy_from_slice(&(value as u32).to_ne_bytes());
                }
            } else if flags.contains(vk::QueryResultFlags::TYPE_64) {
                dst[..8].copy_from_slice(&value.to_ne_bytes());
            } else {
                dst[..4].copy_from_slice(&(value as u32).to_ne_bytes());
            }
        }
        vk::Result::SUCCESS
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> (vk::SwapchainKHR, vk::Extent2D) {
        let mut state = self.state.borrow_mut();
        let extent = state.surface_extent.unwrap_or(desc.extent);
        let swapchain: vk::SwapchainKHR = state.create();
        let images = (0..desc.image_count).map(|_| vk::Image::from_raw(state.new_raw())).collect();
        state.swapchains.insert(swapchain, HeadlessSwapchain { images, next_index: 0 });
        (swapchain, extent)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.borrow_mut();
        state.destroy(swapchain);
        state.swapchains.remove(&swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Vec<vk::Image> {
        self.state.borrow().swapchains[&swapchain].images.clone()
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.borrow_mut();
        let forced = state.next_acquire_result.take();
        if let Some(err) = forced.filter(|r| *r != vk::Result::SUBOPTIMAL_KHR) {
            state.calls.push(HeadlessCall::AcquireImage {
                swapchain,
                result: err,
                index: None,
            });
            return Err(err);
        }

        let headless_swapchain = state.swapchains.get_mut(&swapchain).expect("headless: unknown swapchain");
        let index = headless_swapchain.next_index;
        headless_swapchain.next_index = (index + 1) % headless_swapchain.images.len() as u32;
        let suboptimal = forced.is_some();
        state.calls.push(HeadlessCall::AcquireImage {
            swapchain,
            result: if suboptimal { vk::Result::SUBOPTIMAL_KHR } else { vk::Result::SUCCESS },
            index: Some(index),
        });
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state.borrow_mut();
        state.calls.push(HeadlessCall::Present {
            swapchain,
            image_index,
            wait_semaphore,
        });
        match state.next_present_result.take() {
            None => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
        }
    }

    fn cmd_pipeline_barrier2(&self, cmd: vk::CommandBuffer, dependency_info: &vk::DependencyInfo<'_>) {
        let (images, buffers, memory_barrier_count) = unsafe {
            let images = raw_slice(dependency_info.p_image_memory_barriers, dependency_info.image_memory_barrier_count)
                .iter()
                .map(|barrier| ImageBarrierRecord {
                    image: barrier.image,
                    old_layout: barrier.old_layout,
                    new_layout: barrier.new_layout,
                    range: barrier.subresource_range,
                    src_stage: barrier.src_stage_mask,
                    dst_stage: barrier.dst_stage_mask,
                    dst_access: barrier.dst_access_mask,
                })
                .collect();
            let buffers =
                raw_slice(dependency_info.p_buffer_memory_barriers, dependency_info.buffer_memory_barrier_count)
                    .iter()
                    .map(|barrier| BufferBarrierRecord {
                        buffer: barrier.buffer,
                        offset: barrier.offset,
                        size: barrier.size,
                        src_stage: barrier.src_stage_mask,
                        dst_stage: barrier.dst_stage_mask,
                        src_access: barrier.src_access_mask,
                        dst_access: barrier.dst_access_mask,
                    })
                    .collect();
            (images, buffers, dependency_info.memory_barrier_count as usize)
        };
        self.record(HeadlessCall::PipelineBarrier {
            cmd,
            images,
            buffers,
            memory_barrier_count,
        });
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.record(HeadlessCall::CopyBuffer {
            cmd,
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.record(HeadlessCall::CopyBufferToImage {
            cmd,
            src,
            dst,
            dst_layout,
        });
    }

    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        for region in regions {
            self.record(HeadlessCall::BlitImage {
                cmd,
                src,
                dst,
                src_mip: region.src_subresource.mip_level,
                dst_mip: region.dst_subresource.mip_level,
                src_extent: offsets_extent(&region.src_offsets),
                dst_extent: offsets_extent(&region.dst_offsets),
                filter,
            });
        }
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        _color: &vk::ClearColorValue,
        _ranges: &[vk::ImageSubresourceRange],
    ) {
        self.record(HeadlessCall::ClearColorImage { cmd, image, layout });
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering_info: &vk::RenderingInfo<'_>) {
        self.record(HeadlessCall::BeginRendering {
            cmd,
            extent: rendering_info.render_area.extent,
            color_attachment_count: rendering_info.color_attachment_count,
        });
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.record(HeadlessCall::EndRendering { cmd });
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, _bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.record(HeadlessCall::BindPipeline { cmd, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(HeadlessCall::BindDescriptorSets {
            cmd,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(HeadlessCall::PushConstants {
            cmd,
            offset,
            len: data.len(),
        });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: vk::CommandBuffer,
        _first_binding: u32,
        _buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.record(HeadlessCall::BindVertexBuffers { cmd });
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.record(HeadlessCall::BindIndexBuffer { cmd });
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _viewports: &[vk::Viewport]) {
        self.record(HeadlessCall::SetViewportScissor { cmd });
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _scissors: &[vk::Rect2D]) {}

    fn cmd_draw(&self, cmd: vk::CommandBuffer, _vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.record(HeadlessCall::Draw { cmd });
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(HeadlessCall::Draw { cmd });
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cmd: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _draw_count: u32,
        _stride: u32,
    ) {
        self.record(HeadlessCall::Draw { cmd });
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, group_x: u32, group_y: u32, group_z: u32) {
        self.record(HeadlessCall::Dispatch {
            cmd,
            groups: [group_x, group_y, group_z],
        });
    }

    fn cmd_reset_query_pool(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, first: u32, count: u32) {
        self.record(HeadlessCall::CmdResetQueryPool { cmd, pool, first, count });
    }

    fn cmd_write_timestamp2(&self, cmd: vk::CommandBuffer, _stage: vk::PipelineStageFlags2, pool: vk::QueryPool, query: u32) {
        let mut state = self.state.borrow_mut();
        state.timestamp_tick += 1000;
        let tick = state.timestamp_tick;
        if let Some(query_pool) = state.query_pools.get_mut(&pool) {
            query_pool.values[query as usize] = tick;
        }
        state.calls.push(HeadlessCall::WriteTimestamp { cmd, pool, query });
    }

    fn cmd_begin_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32, _flags: vk::QueryControlFlags) {
        let mut state = self.state.borrow_mut();
        let begin = state.calls.len();
        state.open_queries.insert((pool, query), begin);
        state.calls.push(HeadlessCall::BeginQuery { cmd, pool, query });
    }

    fn cmd_end_query(&self, cmd: vk::CommandBuffer, pool: vk::QueryPool, query: u32) {
        let mut state = self.state.borrow_mut();
        // 统计 begin 与 end 之间记录的 draw / dispatch 数量作为结果
        let begin = state.open_queries.remove(&(pool, query)).unwrap_or(state.calls.len());
        let work = state.calls[begin..]
            .iter()
            .filter(|call| match call {
                HeadlessCall::Draw { cmd: c } | HeadlessCall::Dispatch { cmd: c, .. } => *c == cmd,
                _ => false,
            })
            .count() as u64;
        if let Some(query_pool) = state.query_pools.get_mut(&pool) {
            query_pool.values[query as usize] = work;
        }
        state.calls.push(HeadlessCall::EndQuery { cmd, pool, query });
    }

    fn cmd_begin_label(&self, cmd: vk::CommandBuffer, label: &str, _color: [f32; 4]) {
        self.record(HeadlessCall::BeginLabel {
            cmd,
            label: label.to_string(),
        });
    }

    fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        self.record(HeadlessCall::EndLabel { cmd });
    }
}
