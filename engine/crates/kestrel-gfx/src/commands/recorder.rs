use ash::vk;
use itertools::Itertools;

use crate::{
    backend::GfxBackend,
    commands::barrier::{BufferBarrierDesc, GfxBarrierMask, ImageBarrierDesc, resolve_buffer_range, resolve_range},
    error::{GfxError, GfxResultExt, validate_buffer_range, validate_range},
    query::{QueryHandle, QueryType, query_manager::QueryManager},
    resources::{
        BufferHandle, DescriptorHandle, ImageHandle, PipelineHandle, RenderTargetHandle, image::mip_extent,
        manager::ResourceManager, pipeline::GfxPipeline,
    },
};

/// 一次 blit 的描述
///
/// layer count 为 0 表示从 base 到最后；region 为 None 表示整个 mip
#[derive(Copy, Clone, Debug)]
pub struct BlitDesc {
    pub src: ImageHandle,
    pub dst: ImageHandle,
    pub src_mip: u32,
    pub dst_mip: u32,
    pub src_base_layer: u32,
    pub src_layer_count: u32,
    pub dst_base_layer: u32,
    pub dst_layer_count: u32,
    pub src_region: Option<[vk::Offset3D; 2]>,
    pub dst_region: Option<[vk::Offset3D; 2]>,
    pub src_layout: vk::ImageLayout,
    pub dst_layout: vk::ImageLayout,
    pub filter: vk::Filter,
}

impl BlitDesc {
    pub fn new(src: ImageHandle, dst: ImageHandle) -> Self {
        Self {
            src,
            dst,
            src_mip: 0,
            dst_mip: 0,
            src_base_layer: 0,
            src_layer_count: 0,
            dst_base_layer: 0,
            dst_layer_count: 0,
            src_region: None,
            dst_region: None,
            src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            filter: vk::Filter::LINEAR,
        }
    }

    #[inline]
    pub fn mips(mut self, src_mip: u32, dst_mip: u32) -> Self {
        self.src_mip = src_mip;
        self.dst_mip = dst_mip;
        self
    }

    #[inline]
    pub fn src_layers(mut self, base: u32, count: u32) -> Self {
        self.src_base_layer = base;
        self.src_layer_count = count;
        self
    }

    #[inline]
    pub fn dst_layers(mut self, base: u32, count: u32) -> Self {
        self.dst_base_layer = base;
        self.dst_layer_count = count;
        self
    }

    #[inline]
    pub fn regions(mut self, src: [vk::Offset3D; 2], dst: [vk::Offset3D; 2]) -> Self {
        self.src_region = Some(src);
        self.dst_region = Some(dst);
        self
    }

    #[inline]
    pub fn filter(mut self, filter: vk::Filter) -> Self {
        self.filter = filter;
        self
    }
}

/// begin_rendering 时 attachment 的 load 方式，None 表示 LOAD
#[derive(Copy, Clone, Debug, Default)]
pub struct RenderingClear {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

/// 录制命令的接口，只在 command list 处于 Recording 状态时存在
///
/// 通过 handle 引用资源，录制时从 [`ResourceManager`] 中解析出 vk 对象并检查范围
pub struct CommandRecorder<'a> {
    pub(crate) backend: &'a dyn GfxBackend,
    pub(crate) resources: &'a ResourceManager,
    pub(crate) cmd: vk::CommandBuffer,
    pub(crate) name: &'a str,
}

// getters
impl<'a> CommandRecorder<'a> {
    #[inline]
    pub fn vk_cmd(&self) -> vk::CommandBuffer {
        self.cmd
    }

    #[inline]
    pub fn resources(&self) -> &'a ResourceManager {
        self.resources
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }
}

/// 按照 (src stage, dst stage) 分组，组之间按首次出现排序，组内保持原有顺序
fn group_by_stages<T>(
    barriers: Vec<T>,
    stages: impl Fn(&T) -> (vk::PipelineStageFlags2, vk::PipelineStageFlags2),
) -> Vec<Vec<T>> {
    barriers
        .into_iter()
        .enumerate()
        .into_group_map_by(|(_, barrier)| stages(barrier))
        .into_values()
        .sorted_by_key(|group| group[0].0)
        .map(|group| group.into_iter().map(|(_, barrier)| barrier).collect())
        .collect()
}

// barrier
impl CommandRecorder<'_> {
    /// 所有 barrier 按照 stage 分组，每组只调用一次 `vkCmdPipelineBarrier2`
    ///
    /// - command type: synchronization
    /// - supported queue types: transfer, graphics, compute
    pub fn image_barriers(&self, barriers: &[ImageBarrierDesc]) {
        let barriers = barriers.iter().map(|desc| self.build_image_barrier(desc)).collect_vec();
        for group in group_by_stages(barriers, |b| (b.src_stage_mask, b.dst_stage_mask)) {
            let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&group);
            self.backend.cmd_pipeline_barrier2(self.cmd, &dependency_info);
        }
    }

    fn build_image_barrier(&self, desc: &ImageBarrierDesc) -> vk::ImageMemoryBarrier2<'static> {
        let image = self.resources.get_image(desc.image);
        let context = format!("image barrier on `{}`", image.name());
        let level_count = resolve_range(desc.base_mip, desc.mip_count, image.mip_levels()).or_fatal(&context);
        let layer_count = resolve_range(desc.base_layer, desc.layer_count, image.array_layers()).or_fatal(&context);

        vk::ImageMemoryBarrier2::default()
            .image(image.vk_image())
            .old_layout(desc.old_layout)
            .new_layout(desc.new_layout)
            .src_stage_mask(desc.mask.src_stage)
            .src_access_mask(desc.mask.src_access)
            .dst_stage_mask(desc.mask.dst_stage)
            .dst_access_mask(desc.mask.dst_access)
            .src_queue_family_index(desc.src_queue_family)
            .dst_queue_family_index(desc.dst_queue_family)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: image.aspect(),
                base_mip_level: desc.base_mip,
                level_count,
                base_array_layer: desc.base_layer,
                layer_count,
            })
    }

    /// - command type: synchronization
    /// - supported queue types: transfer, graphics, compute
    pub fn buffer_barriers(&self, barriers: &[BufferBarrierDesc]) {
        let barriers = barriers
            .iter()
            .map(|desc| {
                let buffer = self.resources.get_buffer(desc.buffer);
                let size = resolve_buffer_range(desc.offset, desc.size, buffer.size())
                    .or_fatal(&format!("buffer barrier on `{}`", buffer.name()));
                vk::BufferMemoryBarrier2::default()
                    .buffer(buffer.vk_buffer())
                    .offset(desc.offset)
                    .size(size)
                    .src_stage_mask(desc.mask.src_stage)
                    .src_access_mask(desc.mask.src_access)
                    .dst_stage_mask(desc.mask.dst_stage)
                    .dst_access_mask(desc.mask.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            })
            .collect_vec();
        for group in group_by_stages(barriers, |b| (b.src_stage_mask, b.dst_stage_mask)) {
            let dependency_info = vk::DependencyInfo::default().buffer_memory_barriers(&group);
            self.backend.cmd_pipeline_barrier2(self.cmd, &dependency_info);
        }
    }

    /// 全局的 memory barrier
    pub fn memory_barrier(&self, mask: GfxBarrierMask) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(mask.src_stage)
            .src_access_mask(mask.src_access)
            .dst_stage_mask(mask.dst_stage)
            .dst_access_mask(mask.dst_access);
        let dependency_info = vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        self.backend.cmd_pipeline_barrier2(self.cmd, &dependency_info);
    }
}

// 数据传输类型
impl CommandRecorder<'_> {
    /// - command type: action
    /// - supported queue types: transfer, graphics, compute
    pub fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, regions: &[vk::BufferCopy]) {
        let src = self.resources.get_buffer(src);
        let dst = self.resources.get_buffer(dst);
        let context = format!("copy buffer `{}` -> `{}`", src.name(), dst.name());
        for region in regions {
            validate_buffer_range(region.src_offset, region.size, src.size()).or_fatal(&context);
            validate_buffer_range(region.dst_offset, region.size, dst.size()).or_fatal(&context);
        }
        self.backend.cmd_copy_buffer(self.cmd, src.vk_buffer(), dst.vk_buffer(), regions);
    }

    /// 将 buffer 从头开始的数据拷贝到 image 的某个 mip 的所有 layer 中，image 需要处于 TRANSFER_DST
    ///
    /// - command type: action
    /// - supported queue types: transfer, graphics, compute
    pub fn copy_buffer_to_image(&self, src: BufferHandle, dst: ImageHandle, mip: u32) {
        let buffer = self.resources.get_buffer(src);
        let image = self.resources.get_image(dst);
        validate_range(mip, 1, image.mip_levels())
            .or_fatal(&format!("copy buffer `{}` to image `{}`", buffer.name(), image.name()));

        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: image.aspect(),
                mip_level: mip,
                base_array_layer: 0,
                layer_count: image.array_layers(),
            },
            image_offset: vk::Offset3D::default(),
            image_extent: mip_extent(image.extent(), mip),
        };
        self.backend.cmd_copy_buffer_to_image(
            self.cmd,
            buffer.vk_buffer(),
            image.vk_image(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            std::slice::from_ref(&region),
        );
    }

    /// - command type: action
    /// - supported queue types: graphics
    pub fn blit_image(&self, desc: &BlitDesc) {
        let src = self.resources.get_image(desc.src);
        let dst = self.resources.get_image(desc.dst);
        let context = format!("blit `{}` mip {} -> `{}` mip {}", src.name(), desc.src_mip, dst.name(), desc.dst_mip);

        validate_range(desc.src_mip, 1, src.mip_levels()).or_fatal(&context);
        validate_range(desc.dst_mip, 1, dst.mip_levels()).or_fatal(&context);
        let src_layers = resolve_range(desc.src_base_layer, desc.src_layer_count, src.array_layers()).or_fatal(&context);
        let dst_layers = resolve_range(desc.dst_base_layer, desc.dst_layer_count, dst.array_layers()).or_fatal(&context);
        if src_layers != dst_layers {
            Err::<(), _>(GfxError::BlitLayerMismatch {
                src: src_layers,
                dst: dst_layers,
            })
            .or_fatal(&context);
        }
        if desc.filter == vk::Filter::LINEAR {
            self.check_linear_filter(dst.format(), &context);
        }

        let full_region = |extent: vk::Extent3D| {
            [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: extent.width as i32,
                    y: extent.height as i32,
                    z: extent.depth as i32,
                },
            ]
        };
        let region = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: src.aspect(),
                mip_level: desc.src_mip,
                base_array_layer: desc.src_base_layer,
                layer_count: src_layers,
            },
            src_offsets: desc.src_region.unwrap_or_else(|| full_region(mip_extent(src.extent(), desc.src_mip))),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect(),
                mip_level: desc.dst_mip,
                base_array_layer: desc.dst_base_layer,
                layer_count: dst_layers,
            },
            dst_offsets: desc.dst_region.unwrap_or_else(|| full_region(mip_extent(dst.extent(), desc.dst_mip))),
        };
        self.backend.cmd_blit_image(
            self.cmd,
            src.vk_image(),
            desc.src_layout,
            dst.vk_image(),
            desc.dst_layout,
            std::slice::from_ref(&region),
            desc.filter,
        );
    }

    fn check_linear_filter(&self, format: vk::Format, context: &str) {
        let features = self.backend.format_features(format);
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            Err::<(), _>(GfxError::LinearFilterUnsupported(format)).or_fatal(context);
        }
    }

    /// 由 mip 0 逐级 blit 生成整个 mip chain
    ///
    /// 调用前 mip 0 处于 `base_layout`，其余 mip 的内容会被丢弃；
    /// 完成后整个 chain 处于 `final_layout`，并且对 `final_stage` / `final_access` 可见。
    ///
    /// - command type: action, synchronization
    /// - supported queue types: graphics
    pub fn generate_mipmaps(
        &self,
        image: ImageHandle,
        base_layout: vk::ImageLayout,
        final_layout: vk::ImageLayout,
        final_stage: vk::PipelineStageFlags2,
        final_access: vk::AccessFlags2,
    ) {
        let _span = tracy_client::span!("CommandRecorder::generate_mipmaps");

        let gfx_image = self.resources.get_image(image);
        let mip_levels = gfx_image.mip_levels();
        self.check_linear_filter(gfx_image.format(), &format!("generate mipmaps of `{}`", gfx_image.name()));

        let to_transfer_src = |mip: u32, old_layout: vk::ImageLayout| {
            ImageBarrierDesc::new(image)
                .mip_range(mip, 1)
                .layout_transfer(old_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
                .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
        };

        for mip in 1..mip_levels {
            let src_layout = if mip == 1 { base_layout } else { vk::ImageLayout::TRANSFER_DST_OPTIMAL };
            self.image_barriers(&[
                to_transfer_src(mip - 1, src_layout),
                ImageBarrierDesc::new(image)
                    .mip_range(mip, 1)
                    .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_mask(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE)
                    .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            ]);
            self.blit_image(&BlitDesc::new(image, image).mips(mip - 1, mip).filter(vk::Filter::LINEAR));
        }

        let last_layout = if mip_levels == 1 { base_layout } else { vk::ImageLayout::TRANSFER_DST_OPTIMAL };
        self.image_barriers(&[to_transfer_src(mip_levels - 1, last_layout)]);

        self.image_barriers(&[ImageBarrierDesc::new(image)
            .layout_transfer(vk::ImageLayout::TRANSFER_SRC_OPTIMAL, final_layout)
            .src_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ)
            .dst_mask(final_stage, final_access)]);
    }

    /// - command type: action
    /// - supported queue types: graphics, compute
    pub fn clear_color_image(&self, image: ImageHandle, layout: vk::ImageLayout, color: [f32; 4]) {
        let image = self.resources.get_image(image);
        self.backend.cmd_clear_color_image(
            self.cmd,
            image.vk_image(),
            layout,
            &vk::ClearColorValue { float32: color },
            &[image.full_range()],
        );
    }
}

// 绘制类型的命令
impl CommandRecorder<'_> {
    /// color attachment 需要处于 COLOR_ATTACHMENT_OPTIMAL，depth 需要处于 DEPTH_ATTACHMENT_OPTIMAL
    ///
    /// - command type: action, state
    /// - supported queue types: graphics
    pub fn begin_rendering(&self, render_target: RenderTargetHandle, clear: RenderingClear) {
        let render_target = self.resources.get_render_target(render_target);
        let (color_load_op, color_clear) = match clear.color {
            Some(float32) => (vk::AttachmentLoadOp::CLEAR, vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            }),
            None => (vk::AttachmentLoadOp::LOAD, vk::ClearValue::default()),
        };
        let color_attachments = render_target
            .color_attachments()
            .iter()
            .map(|image| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(self.resources.get_image(*image).view())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(color_load_op)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(color_clear)
            })
            .collect_vec();
        let depth_attachment = render_target.depth_attachment().map(|image| {
            let (load_op, depth) = match clear.depth {
                Some(depth) => (vk::AttachmentLoadOp::CLEAR, depth),
                None => (vk::AttachmentLoadOp::LOAD, 1.0),
            };
            vk::RenderingAttachmentInfo::default()
                .image_view(self.resources.get_image(image).view())
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(load_op)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_target.extent().into())
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }
        self.backend.cmd_begin_rendering(self.cmd, &rendering_info);
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn end_rendering(&self) {
        self.backend.cmd_end_rendering(self.cmd);
    }

    fn pipeline(&self, pipeline: PipelineHandle, bind_point: vk::PipelineBindPoint) -> &GfxPipeline {
        let gfx_pipeline = self.resources.get_pipeline(pipeline);
        if gfx_pipeline.bind_point() != bind_point {
            log::error!("pipeline `{}` is {:?}, expected {:?}", gfx_pipeline.name(), gfx_pipeline.bind_point(), bind_point);
            panic!("pipeline `{}` is {:?}, expected {:?}", gfx_pipeline.name(), gfx_pipeline.bind_point(), bind_point);
        }
        gfx_pipeline
    }

    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_graphics_pipeline(&self, pipeline: PipelineHandle) {
        let pipeline = self.pipeline(pipeline, vk::PipelineBindPoint::GRAPHICS);
        self.backend.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.vk_pipeline());
    }

    /// - command type: state
    /// - supported queue types: compute
    pub fn bind_compute_pipeline(&self, pipeline: PipelineHandle) {
        let pipeline = self.pipeline(pipeline, vk::PipelineBindPoint::COMPUTE);
        self.backend.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::COMPUTE, pipeline.vk_pipeline());
    }

    /// 使用 pipeline 的 layout 与 bind point 绑定 descriptor set
    ///
    /// - command type: state
    /// - supported queue types: graphics, compute
    pub fn bind_descriptors(&self, pipeline: PipelineHandle, first_set: u32, descriptors: &[DescriptorHandle]) {
        let pipeline = self.resources.get_pipeline(pipeline);
        let sets = descriptors.iter().map(|handle| self.resources.get_descriptor(*handle).set()).collect_vec();
        self.backend.cmd_bind_descriptor_sets(self.cmd, pipeline.bind_point(), pipeline.layout(), first_set, &sets);
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        pipeline: PipelineHandle,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        let pipeline = self.resources.get_pipeline(pipeline);
        self.backend.cmd_push_constants(self.cmd, pipeline.layout(), stages, offset, bytemuck::bytes_of(data));
    }

    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_vertex_buffer(&self, binding: u32, buffer: BufferHandle, offset: vk::DeviceSize) {
        let buffer = self.resources.get_buffer(buffer);
        self.backend.cmd_bind_vertex_buffers(self.cmd, binding, &[buffer.vk_buffer()], &[offset]);
    }

    /// - command type: state
    /// - supported queue types: graphics
    pub fn bind_index_buffer(&self, buffer: BufferHandle, offset: vk::DeviceSize, index_type: vk::IndexType) {
        let buffer = self.resources.get_buffer(buffer);
        self.backend.cmd_bind_index_buffer(self.cmd, buffer.vk_buffer(), offset, index_type);
    }

    /// viewport 上下翻转，使得 y 轴朝上
    ///
    /// - command type: state
    /// - supported queue types: graphics
    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        self.backend.cmd_set_viewport(self.cmd, &[viewport]);
        self.backend.cmd_set_scissor(self.cmd, &[extent.into()]);
    }

    /// 不使用 index buffer 的绘制
    ///
    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.backend.cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, first_instance);
    }

    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.backend.cmd_draw_indexed(self.cmd, index_count, instance_count, first_index, vertex_offset, first_instance);
    }

    /// - command type: action
    /// - supported queue types: graphics
    pub fn draw_indexed_indirect(&self, buffer: BufferHandle, offset: vk::DeviceSize, draw_count: u32, stride: u32) {
        let gfx_buffer = self.resources.get_buffer(buffer);
        validate_buffer_range(offset, draw_count as vk::DeviceSize * stride as vk::DeviceSize, gfx_buffer.size())
            .or_fatal(&format!("draw indirect from `{}`", gfx_buffer.name()));
        self.backend.cmd_draw_indexed_indirect(self.cmd, gfx_buffer.vk_buffer(), offset, draw_count, stride);
    }

    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn dispatch(&self, group_x: u32, group_y: u32, group_z: u32) {
        self.backend.cmd_dispatch(self.cmd, group_x, group_y, group_z);
    }
}

// query
impl CommandRecorder<'_> {
    fn query_slot(&self, queries: &QueryManager, query: QueryHandle, expected: &[QueryType]) -> (vk::QueryPool, u32) {
        if !expected.contains(&query.ty()) {
            log::error!("query {:?} can not be used here, expected {:?}", query, expected);
            panic!("query {:?} can not be used here, expected {:?}", query, expected);
        }
        queries.pool_slot(query)
    }

    /// - command type: action
    /// - supported queue types: transfer, graphics, compute
    pub fn write_timestamp(&self, queries: &QueryManager, query: QueryHandle, stage: vk::PipelineStageFlags2) {
        let (pool, slot) = self.query_slot(queries, query, &[QueryType::Timestamp]);
        self.backend.cmd_write_timestamp2(self.cmd, stage, pool, slot);
    }

    /// - command type: action, state
    /// - supported queue types: graphics, compute
    pub fn begin_query(&self, queries: &QueryManager, query: QueryHandle) {
        let (pool, slot) = self.query_slot(queries, query, &[QueryType::Occlusion, QueryType::PipelineStatistics]);
        self.backend.cmd_begin_query(self.cmd, pool, slot, vk::QueryControlFlags::empty());
    }

    /// - command type: action, state
    /// - supported queue types: graphics, compute
    pub fn end_query(&self, queries: &QueryManager, query: QueryHandle) {
        let (pool, slot) = self.query_slot(queries, query, &[QueryType::Occlusion, QueryType::PipelineStatistics]);
        self.backend.cmd_end_query(self.cmd, pool, slot);
    }

    /// 在 command stream 中 reset 一段连续的 query
    #[inline]
    pub fn reset_query_range(&self, pool: vk::QueryPool, first: u32, count: u32) {
        self.backend.cmd_reset_query_pool(self.cmd, pool, first, count);
    }
}

// debug label
impl CommandRecorder<'_> {
    #[inline]
    pub fn begin_label(&self, label: &str, color: [f32; 4]) {
        self.backend.cmd_begin_label(self.cmd, label, color);
    }

    #[inline]
    pub fn end_label(&self) {
        self.backend.cmd_end_label(self.cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_by_stages_keeps_first_occurrence_order() {
        let transfer = vk::PipelineStageFlags2::TRANSFER;
        let fragment = vk::PipelineStageFlags2::FRAGMENT_SHADER;
        let compute = vk::PipelineStageFlags2::COMPUTE_SHADER;
        let barriers = vec![
            (0, transfer, compute),
            (1, transfer, fragment),
            (2, transfer, compute),
            (3, compute, fragment),
            (4, transfer, fragment),
            (5, transfer, compute),
        ];

        let groups = group_by_stages(barriers, |&(_, src, dst)| (src, dst));
        let ids = groups
            .iter()
            .map(|group| group.iter().map(|&(id, _, _)| id).collect_vec())
            .collect_vec();
        assert_eq!(ids, vec![vec![0, 2, 5], vec![1, 4], vec![3]]);
    }

    #[test]
    fn test_group_by_stages_empty() {
        let groups = group_by_stages(Vec::<(vk::PipelineStageFlags2, vk::PipelineStageFlags2)>::new(), |&key| key);
        assert!(groups.is_empty());
    }
}
