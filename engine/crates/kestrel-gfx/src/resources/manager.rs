use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{GfxBackend, GfxBackendRc, set_object_name},
    commands::{
        barrier::{GfxBarrierMask, ImageBarrierDesc, layout_dst_mask},
        gfx_commands::GfxCommands,
    },
    error::{GfxError, GfxResultExt, validate_buffer_range},
    handle::HandleAllocator,
    resources::{
        BufferHandle, DescriptorHandle, ImageHandle, PipelineHandle, RenderTargetHandle, SamplerHandle,
        buffer::{BufferDesc, GfxBuffer},
        descriptor::{DescriptorDesc, DescriptorQuotas, DescriptorUpdate, GfxDescriptor, descriptor_image_layout, validate_update},
        image::{GfxImage, ImageDesc, ImageOwnership, derive_view_type, format_aspect_mask, validate_mip_levels},
        pipeline::{ComputePipelineDesc, GfxPipeline, GraphicsPipelineDesc},
        render_target::{GfxRenderTarget, RenderTargetDesc, resolve_render_target_extent},
        sampler::{GfxSampler, SamplerDesc},
    },
};

/// 所有 GPU 资源的持有者
///
/// 每种资源各有一张 handle 表。外部只持有 handle，通过 `get_*` 访问具体的资源。
/// 所有资源必须通过 `destroy_*` 或者最终的 [`ResourceManager::destroy`] 释放。
pub struct ResourceManager {
    backend: GfxBackendRc,

    images: HandleAllocator<GfxImage>,
    buffers: HandleAllocator<GfxBuffer>,
    samplers: HandleAllocator<GfxSampler>,
    descriptors: HandleAllocator<GfxDescriptor>,
    pipelines: HandleAllocator<GfxPipeline>,
    render_targets: HandleAllocator<GfxRenderTarget>,

    descriptor_pool: vk::DescriptorPool,
    destroyed: bool,
}

// new & init
impl ResourceManager {
    pub fn new(backend: GfxBackendRc, quotas: &DescriptorQuotas) -> Self {
        let _span = tracy_client::span!("ResourceManager::new");

        let pool_sizes = quotas.pool_sizes();
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(
                vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND | vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            )
            .max_sets(quotas.max_sets)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = backend.create_descriptor_pool(&pool_ci);
        set_object_name(backend.as_ref(), descriptor_pool, "global-descriptor-pool");
        log::info!("create descriptor pool: {:?}", quotas);

        Self {
            backend,
            images: HandleAllocator::new(),
            buffers: HandleAllocator::new(),
            samplers: HandleAllocator::new(),
            descriptors: HandleAllocator::new(),
            pipelines: HandleAllocator::new(),
            render_targets: HandleAllocator::new(),
            descriptor_pool,
            destroyed: false,
        }
    }
}

// getters
impl ResourceManager {
    #[inline]
    pub fn backend(&self) -> &dyn GfxBackend {
        self.backend.as_ref()
    }

    #[inline]
    #[track_caller]
    pub fn get_image(&self, handle: ImageHandle) -> &GfxImage {
        self.images.get(handle)
    }

    #[inline]
    #[track_caller]
    pub fn get_buffer(&self, handle: BufferHandle) -> &GfxBuffer {
        self.buffers.get(handle)
    }

    #[inline]
    #[track_caller]
    pub fn get_sampler(&self, handle: SamplerHandle) -> &GfxSampler {
        self.samplers.get(handle)
    }

    #[inline]
    #[track_caller]
    pub fn get_descriptor(&self, handle: DescriptorHandle) -> &GfxDescriptor {
        self.descriptors.get(handle)
    }

    #[inline]
    #[track_caller]
    pub fn get_pipeline(&self, handle: PipelineHandle) -> &GfxPipeline {
        self.pipelines.get(handle)
    }

    #[inline]
    #[track_caller]
    pub fn get_render_target(&self, handle: RenderTargetHandle) -> &GfxRenderTarget {
        self.render_targets.get(handle)
    }

    #[inline]
    pub fn is_image_valid(&self, handle: ImageHandle) -> bool {
        self.images.is_valid(handle)
    }

    #[inline]
    pub fn is_buffer_valid(&self, handle: BufferHandle) -> bool {
        self.buffers.is_valid(handle)
    }

    /// 当前存活的资源总数
    pub fn live_resource_count(&self) -> usize {
        self.images.len()
            + self.buffers.len()
            + self.samplers.len()
            + self.descriptors.len()
            + self.pipelines.len()
            + self.render_targets.len()
    }
}

// image
impl ResourceManager {
    pub fn create_image(&mut self, desc: &ImageDesc) -> ImageHandle {
        let _span = tracy_client::span!("ResourceManager::create_image");
        let context = format!("create image `{}`", desc.name);

        validate_mip_levels(desc.extent, desc.mip_levels).or_fatal(&context);
        let (image_type, view_type) = derive_view_type(desc.extent, desc.array_layers, desc.cube).or_fatal(&context);
        let create_flags =
            if desc.cube { vk::ImageCreateFlags::CUBE_COMPATIBLE } else { vk::ImageCreateFlags::empty() };

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(create_flags);
        let image = self.backend.create_image(&image_ci);
        set_object_name(self.backend.as_ref(), image, &desc.name);

        let handle = self.register_image(image, None, desc, image_type, view_type, create_flags, ImageOwnership::Owned);
        log::debug!(
            "create image `{}`: {}x{}x{}, mips {}, layers {}, {:?}",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.mip_levels,
            desc.array_layers,
            view_type
        );
        handle
    }

    /// 包装外部的 image（例如 swapchain image），manager 不会释放它的显存
    ///
    /// 如果没有提供 view，会在本地创建一个，并在销毁时释放
    pub fn create_image_borrowed(
        &mut self,
        image: vk::Image,
        view: Option<vk::ImageView>,
        desc: &ImageDesc,
    ) -> ImageHandle {
        let context = format!("borrow image `{}`", desc.name);
        validate_mip_levels(desc.extent, desc.mip_levels).or_fatal(&context);
        let (image_type, view_type) = derive_view_type(desc.extent, desc.array_layers, desc.cube).or_fatal(&context);
        let create_flags =
            if desc.cube { vk::ImageCreateFlags::CUBE_COMPATIBLE } else { vk::ImageCreateFlags::empty() };

        let ownership = ImageOwnership::Borrowed {
            owns_view: view.is_none(),
        };
        self.register_image(image, view, desc, image_type, view_type, create_flags, ownership)
    }

    #[allow(clippy::too_many_arguments)]
    fn register_image(
        &mut self,
        image: vk::Image,
        view: Option<vk::ImageView>,
        desc: &ImageDesc,
        image_type: vk::ImageType,
        view_type: vk::ImageViewType,
        create_flags: vk::ImageCreateFlags,
        ownership: ImageOwnership,
    ) -> ImageHandle {
        let aspect = format_aspect_mask(desc.format);
        let view = view.unwrap_or_else(|| {
            self.create_view(image, view_type, desc.format, aspect, 0, desc.mip_levels, desc.array_layers, &desc.name)
        });
        let mip_views = if desc.per_mip_views {
            (0..desc.mip_levels)
                .map(|mip| {
                    let name = format!("{}-mip{}", desc.name, mip);
                    self.create_view(image, view_type, desc.format, aspect, mip, 1, desc.array_layers, &name)
                })
                .collect_vec()
        } else {
            vec![]
        };

        self.images.alloc(GfxImage {
            handle: image,
            view,
            mip_views,
            image_type,
            view_type,
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
            create_flags,
            aspect,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            ownership,
            name: desc.name.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn create_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        base_mip: u32,
        mip_count: u32,
        layer_count: u32,
        name: &str,
    ) -> vk::ImageView {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: base_mip,
                level_count: mip_count,
                base_array_layer: 0,
                layer_count,
            });
        let view = self.backend.create_image_view(&view_ci);
        set_object_name(self.backend.as_ref(), view, &format!("{name}-view"));
        view
    }

    /// 依次销毁 mip view、完整的 view、image 与显存，最后释放 handle
    #[track_caller]
    pub fn destroy_image(&mut self, handle: ImageHandle) {
        let image = self.images.get(handle);
        for view in &image.mip_views {
            self.backend.destroy_image_view(*view);
        }
        match image.ownership {
            ImageOwnership::Owned => {
                self.backend.destroy_image_view(image.view);
                self.backend.destroy_image(image.handle);
            }
            ImageOwnership::Borrowed { owns_view: true } => self.backend.destroy_image_view(image.view),
            ImageOwnership::Borrowed { owns_view: false } => {}
        }
        log::debug!("destroy image `{}`", image.name);
        self.images.free(handle);
    }
}

// buffer
impl ResourceManager {
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> BufferHandle {
        let _span = tracy_client::span!("ResourceManager::create_buffer");

        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = self.backend.create_buffer(&buffer_ci, desc.host_mapped);
        set_object_name(self.backend.as_ref(), buffer, &desc.name);

        log::debug!("create buffer `{}`: {} bytes, {:?}", desc.name, desc.size, desc.usage);
        self.buffers.alloc(GfxBuffer {
            handle: buffer,
            size: desc.size,
            usage: desc.usage,
            host_mapped: desc.host_mapped,
            name: desc.name.clone(),
        })
    }

    #[track_caller]
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let buffer = self.buffers.get(handle);
        log::debug!("destroy buffer `{}`", buffer.name);
        self.backend.destroy_buffer(buffer.handle);
        self.buffers.free(handle);
    }

    /// 写入一个 host mapped 的 buffer
    #[track_caller]
    pub fn write_buffer(&self, handle: BufferHandle, offset: vk::DeviceSize, data: &[u8]) {
        let buffer = self.buffers.get(handle);
        let context = format!("write buffer `{}`", buffer.name);
        if !buffer.host_mapped {
            Err::<(), _>(GfxError::BufferNotMapped(buffer.name.clone())).or_fatal(&context);
        }
        validate_buffer_range(offset, data.len() as vk::DeviceSize, buffer.size).or_fatal(&context);
        self.backend.write_mapped(buffer.handle, offset, data);
    }

    /// size 为 `vk::WHOLE_SIZE` 时 flush 从 offset 到末尾的部分
    #[track_caller]
    pub fn flush_buffer(&self, handle: BufferHandle, offset: vk::DeviceSize, size: vk::DeviceSize) {
        let buffer = self.buffers.get(handle);
        let context = format!("flush buffer `{}`", buffer.name);
        if !buffer.host_mapped {
            Err::<(), _>(GfxError::BufferNotMapped(buffer.name.clone())).or_fatal(&context);
        }
        if size != vk::WHOLE_SIZE {
            validate_buffer_range(offset, size, buffer.size).or_fatal(&context);
        }
        self.backend.flush_mapped(buffer.handle, offset, size);
    }

    /// 通过临时的 stage buffer 将数据传输到 device local 的 buffer 中，阻塞直到传输完成
    pub fn upload_buffer_sync(&mut self, commands: &mut GfxCommands, dst: BufferHandle, data: &[u8]) {
        let _span = tracy_client::span!("ResourceManager::upload_buffer_sync");

        let dst_buffer = self.buffers.get(dst);
        let size = data.len() as vk::DeviceSize;
        validate_buffer_range(0, size, dst_buffer.size).or_fatal(&format!("upload buffer `{}`", dst_buffer.name));
        let name = format!("{}-stage", dst_buffer.name);

        let stage = self.create_buffer(&BufferDesc::new_stage_buffer(size, &name));
        self.write_buffer(stage, 0, data);
        self.flush_buffer(stage, 0, vk::WHOLE_SIZE);

        commands.one_time_submit(self, &name, |rec| {
            rec.copy_buffer(
                stage,
                dst,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );
        });

        self.destroy_buffer(stage);
    }

    /// 将数据写入 image 的 mip 0，完成后 image 处于 final_layout
    pub fn upload_image_sync(
        &mut self,
        commands: &mut GfxCommands,
        dst: ImageHandle,
        data: &[u8],
        final_layout: vk::ImageLayout,
    ) {
        let _span = tracy_client::span!("ResourceManager::upload_image_sync");

        let name = format!("{}-stage", self.images.get(dst).name);
        let stage = self.create_buffer(&BufferDesc::new_stage_buffer(data.len() as vk::DeviceSize, &name));
        self.write_buffer(stage, 0, data);
        self.flush_buffer(stage, 0, vk::WHOLE_SIZE);

        commands.one_time_submit(self, &name, |rec| {
            rec.image_barriers(&[ImageBarrierDesc::new(dst)
                .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .mip_range(0, 1)
                .mask(GfxBarrierMask {
                    src_stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
                    dst_stage: vk::PipelineStageFlags2::TRANSFER,
                    src_access: vk::AccessFlags2::NONE,
                    dst_access: vk::AccessFlags2::TRANSFER_WRITE,
                })]);
            rec.copy_buffer_to_image(stage, dst, 0);
            let (dst_stage, dst_access) = layout_dst_mask(final_layout);
            rec.image_barriers(&[ImageBarrierDesc::new(dst)
                .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, final_layout)
                .mip_range(0, 1)
                .mask(GfxBarrierMask {
                    src_stage: vk::PipelineStageFlags2::TRANSFER,
                    dst_stage,
                    src_access: vk::AccessFlags2::TRANSFER_WRITE,
                    dst_access,
                })]);
        });

        self.destroy_buffer(stage);
    }
}

// sampler
impl ResourceManager {
    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerHandle {
        let sampler = self.backend.create_sampler(&desc.create_info());
        set_object_name(self.backend.as_ref(), sampler, &desc.name);
        log::debug!("create sampler `{}`", desc.name);
        self.samplers.alloc(GfxSampler {
            handle: sampler,
            desc: desc.clone(),
        })
    }

    #[track_caller]
    pub fn destroy_sampler(&mut self, handle: SamplerHandle) {
        let sampler = self.samplers.get(handle);
        log::debug!("destroy sampler `{}`", sampler.desc.name);
        self.backend.destroy_sampler(sampler.handle);
        self.samplers.free(handle);
    }
}

// descriptor
impl ResourceManager {
    pub fn create_descriptor(&mut self, desc: &DescriptorDesc) -> DescriptorHandle {
        let _span = tracy_client::span!("ResourceManager::create_descriptor");

        let vk_bindings = desc
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.ty)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect_vec();
        let binding_flags = desc.bindings.iter().map(|binding| Self::binding_flags(binding.ty)).collect_vec();
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&vk_bindings)
            .push_next(&mut binding_flags_ci);

        let layout = self.backend.create_descriptor_set_layout(&layout_ci);
        set_object_name(self.backend.as_ref(), layout, &format!("{}-layout", desc.name));
        let set = self.backend.allocate_descriptor_set(self.descriptor_pool, layout);
        set_object_name(self.backend.as_ref(), set, &desc.name);

        log::debug!("create descriptor `{}`: {} bindings", desc.name, desc.bindings.len());
        self.descriptors.alloc(GfxDescriptor {
            set,
            layout,
            bindings: desc.bindings.clone(),
            name: desc.name.clone(),
        })
    }

    /// 每个 binding 都是 partially bound；只有 device 开启了对应 feature 的类型才允许 update after bind
    fn binding_flags(ty: vk::DescriptorType) -> vk::DescriptorBindingFlags {
        match ty {
            vk::DescriptorType::SAMPLER
            | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::STORAGE_BUFFER => {
                vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            }
            _ => vk::DescriptorBindingFlags::PARTIALLY_BOUND,
        }
    }

    /// 一次性写入多个 binding，所有写入在同一次 update 中提交
    #[track_caller]
    pub fn update_descriptor(&self, handle: DescriptorHandle, updates: &[DescriptorUpdate]) {
        enum Payload {
            Buffer(usize),
            Image(usize),
        }

        let descriptor = self.descriptors.get(handle);
        let context = format!("update descriptor `{}`", descriptor.name);

        let mut buffer_infos = Vec::with_capacity(updates.len());
        let mut image_infos = Vec::with_capacity(updates.len());
        let mut pending = Vec::with_capacity(updates.len());
        for update in updates {
            let ty = validate_update(&descriptor.bindings, update).or_fatal(&context);
            if let Some(info) = update.buffer {
                let buffer = self.buffers.get(info.buffer);
                let range = if info.range == 0 {
                    validate_buffer_range(info.offset, 0, buffer.size).or_fatal(&context);
                    vk::WHOLE_SIZE
                } else {
                    validate_buffer_range(info.offset, info.range, buffer.size).or_fatal(&context);
                    info.range
                };
                buffer_infos.push([vk::DescriptorBufferInfo {
                    buffer: buffer.handle,
                    offset: info.offset,
                    range,
                }]);
                pending.push((update, ty, Payload::Buffer(buffer_infos.len() - 1)));
            } else if let Some(info) = update.image {
                let image_view = match info.image {
                    None => vk::ImageView::null(),
                    Some(image) => {
                        let image = self.images.get(image);
                        match info.mip {
                            None => image.view,
                            Some(mip) => image.mip_view(mip).unwrap_or_else(|| {
                                Err::<vk::ImageView, _>(GfxError::RangeOutOfBounds {
                                    base: mip,
                                    count: 1,
                                    total: image.mip_views.len() as u32,
                                })
                                .or_fatal(&format!("{context}: mip view of `{}`", image.name))
                            }),
                        }
                    }
                };
                let sampler = info.sampler.map_or(vk::Sampler::null(), |sampler| self.samplers.get(sampler).handle);
                image_infos.push([vk::DescriptorImageInfo {
                    sampler,
                    image_view,
                    image_layout: descriptor_image_layout(ty),
                }]);
                pending.push((update, ty, Payload::Image(image_infos.len() - 1)));
            }
        }

        let writes = pending
            .iter()
            .map(|(update, ty, payload)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(descriptor.set)
                    .dst_binding(update.binding)
                    .dst_array_element(update.array_element)
                    .descriptor_type(*ty);
                match payload {
                    Payload::Buffer(index) => write.buffer_info(&buffer_infos[*index]),
                    Payload::Image(index) => write.image_info(&image_infos[*index]),
                }
            })
            .collect_vec();
        self.backend.update_descriptor_sets(&writes);
    }

    /// 先释放 set，再销毁 layout
    #[track_caller]
    pub fn destroy_descriptor(&mut self, handle: DescriptorHandle) {
        let descriptor = self.descriptors.get(handle);
        log::debug!("destroy descriptor `{}`", descriptor.name);
        self.backend.free_descriptor_set(self.descriptor_pool, descriptor.set);
        self.backend.destroy_descriptor_set_layout(descriptor.layout);
        self.descriptors.free(handle);
    }
}

// pipeline
impl ResourceManager {
    fn create_pipeline_layout(
        &self,
        descriptors: &[DescriptorHandle],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> vk::PipelineLayout {
        let set_layouts = descriptors.iter().map(|handle| self.descriptors.get(*handle).layout).collect_vec();
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = self.backend.create_pipeline_layout(&layout_ci);
        set_object_name(self.backend.as_ref(), layout, &format!("{name}-layout"));
        layout
    }

    pub fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> PipelineHandle {
        let _span = tracy_client::span!("ResourceManager::create_graphics_pipeline");

        let layout = self.create_pipeline_layout(&desc.descriptors, &desc.push_constant_ranges, &desc.name);

        let mut modules = vec![(desc.vertex.stage, self.backend.create_shader_module(&desc.vertex.spirv), desc.vertex.entry_point)];
        if let Some(fragment) = &desc.fragment {
            modules.push((fragment.stage, self.backend.create_shader_module(&fragment.spirv), fragment.entry_point));
        }
        let stages = modules
            .iter()
            .map(|(stage, module, entry)| {
                vk::PipelineShaderStageCreateInfo::default().stage(*stage).module(*module).name(entry)
            })
            .collect_vec();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(desc.topology);
        // viewport 和 scissor 都是动态状态，这里只需要数量
        let viewport = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let blend_attachment = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = vec![blend_attachment; desc.color_formats.len()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_ci = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&desc.color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout)
            .push_next(&mut rendering_ci);
        let pipeline = self.backend.create_graphics_pipeline(&pipeline_ci);
        set_object_name(self.backend.as_ref(), pipeline, &desc.name);

        // pipeline 创建之后 shader module 就不再需要了
        for (_, module, _) in modules {
            self.backend.destroy_shader_module(module);
        }

        log::debug!("create graphics pipeline `{}`", desc.name);
        self.pipelines.alloc(GfxPipeline {
            handle: pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            name: desc.name.clone(),
        })
    }

    pub fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> PipelineHandle {
        let _span = tracy_client::span!("ResourceManager::create_compute_pipeline");

        let layout = self.create_pipeline_layout(&desc.descriptors, &desc.push_constant_ranges, &desc.name);
        let module = self.backend.create_shader_module(&desc.shader.spirv);
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(desc.shader.entry_point);
        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);
        let pipeline = self.backend.create_compute_pipeline(&pipeline_ci);
        set_object_name(self.backend.as_ref(), pipeline, &desc.name);
        self.backend.destroy_shader_module(module);

        log::debug!("create compute pipeline `{}`", desc.name);
        self.pipelines.alloc(GfxPipeline {
            handle: pipeline,
            layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            name: desc.name.clone(),
        })
    }

    /// 先销毁 pipeline，再销毁 layout
    #[track_caller]
    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        let pipeline = self.pipelines.get(handle);
        log::debug!("destroy pipeline `{}`", pipeline.name);
        self.backend.destroy_pipeline(pipeline.handle);
        self.backend.destroy_pipeline_layout(pipeline.layout);
        self.pipelines.free(handle);
    }
}

// render target
impl ResourceManager {
    pub fn create_render_target(&mut self, desc: &RenderTargetDesc) -> RenderTargetHandle {
        let extent = resolve_render_target_extent(
            desc.color.iter().chain(desc.depth.iter()).map(|image| self.images.get(*image).extent_2d()),
        )
        .or_fatal(&format!("create render target `{}`", desc.name));

        log::debug!("create render target `{}`: {}x{}", desc.name, extent.width, extent.height);
        self.render_targets.alloc(GfxRenderTarget {
            color: desc.color.clone(),
            depth: desc.depth,
            extent,
            name: desc.name.clone(),
        })
    }

    /// render target 不持有 attachment，只释放 handle
    #[track_caller]
    pub fn destroy_render_target(&mut self, handle: RenderTargetHandle) {
        log::debug!("destroy render target `{}`", self.render_targets.get(handle).name);
        self.render_targets.free(handle);
    }
}

// destroy
impl ResourceManager {
    /// 按照依赖的逆序释放所有存活的资源，最后销毁 descriptor pool
    pub fn destroy(&mut self) {
        let _span = tracy_client::span!("ResourceManager::destroy");

        let live = self.live_resource_count();
        if live > 0 {
            log::warn!(
                "ResourceManager destroy with {} live resources: images {}, buffers {}, samplers {}, descriptors {}, pipelines {}, render targets {}",
                live,
                self.images.len(),
                self.buffers.len(),
                self.samplers.len(),
                self.descriptors.len(),
                self.pipelines.len(),
                self.render_targets.len()
            );
        }

        for handle in self.pipelines.valid_handles() {
            self.destroy_pipeline(handle);
        }
        for handle in self.render_targets.valid_handles() {
            self.destroy_render_target(handle);
        }
        for handle in self.descriptors.valid_handles() {
            self.destroy_descriptor(handle);
        }
        for handle in self.samplers.valid_handles() {
            self.destroy_sampler(handle);
        }
        for handle in self.buffers.valid_handles() {
            self.destroy_buffer(handle);
        }
        for handle in self.images.valid_handles() {
            self.destroy_image(handle);
        }

        self.backend.destroy_descriptor_pool(self.descriptor_pool);
        self.descriptor_pool = vk::DescriptorPool::null();
        self.destroyed = true;
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        debug_assert!(self.destroyed || std::thread::panicking(), "ResourceManager dropped without destroy()");
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use ash::vk::Handle;

    use super::*;
    use crate::{
        backend::headless::{HeadlessBackend, HeadlessCall},
        resources::descriptor::{DescriptorBinding, DescriptorBufferInfo, DescriptorImageInfo},
    };

    fn setup() -> (Rc<HeadlessBackend>, ResourceManager) {
        kestrel_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::default());
        let manager = ResourceManager::new(backend.clone(), &DescriptorQuotas::default());
        (backend, manager)
    }

    fn color_desc(name: &str) -> ImageDesc {
        ImageDesc::new_2d(
            256,
            256,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            name,
        )
    }

    #[test]
    fn test_create_destroy_image() {
        let (backend, mut manager) = setup();
        let image = manager.create_image(&color_desc("albedo").mip_levels(4).per_mip_views());

        let gfx_image = manager.get_image(image);
        assert_eq!(gfx_image.view_type(), vk::ImageViewType::TYPE_2D);
        assert_eq!(gfx_image.mip_levels(), 4);
        assert!(gfx_image.mip_view(3).is_some());
        assert!(gfx_image.mip_view(4).is_none());
        let vk_image = gfx_image.vk_image();
        assert_eq!(backend.debug_name(vk_image.as_raw()).as_deref(), Some("albedo"));

        manager.destroy_image(image);
        assert!(!manager.is_image_valid(image));

        // 4 个 mip view + 1 个完整 view，之后才释放显存
        let calls = backend.calls();
        let destroyed_views = calls.iter().filter(|call| matches!(call, HeadlessCall::DestroyImageView { .. })).count();
        assert_eq!(destroyed_views, 5);
        assert!(matches!(calls.last(), Some(HeadlessCall::FreeImageMemory { image }) if *image == vk_image));

        manager.destroy();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_cube_image() {
        let (_backend, mut manager) = setup();
        let cube = manager.create_image(&color_desc("sky").array_layers(6).cube());
        let image = manager.get_image(cube);
        assert_eq!(image.view_type(), vk::ImageViewType::CUBE);
        assert!(image.create_flags().contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        manager.destroy();
    }

    #[test]
    #[should_panic(expected = "cube image requires array layers to be a multiple of 6")]
    fn test_cube_image_bad_layers() {
        let (_backend, mut manager) = setup();
        manager.create_image(&color_desc("sky").array_layers(4).cube());
    }

    #[test]
    #[should_panic(expected = "mip level count 10 is invalid")]
    fn test_too_many_mips() {
        let (_backend, mut manager) = setup();
        manager.create_image(&color_desc("albedo").mip_levels(10));
    }

    #[test]
    fn test_borrowed_image_keeps_memory() {
        let (backend, mut manager) = setup();
        let external = vk::Image::from_raw(0xdead);
        let desc = ImageDesc::new_2d(
            800,
            600,
            vk::Format::B8G8R8A8_UNORM,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            "swapchain-0",
        );

        let borrowed = manager.create_image_borrowed(external, None, &desc);
        assert_eq!(manager.get_image(borrowed).ownership(), ImageOwnership::Borrowed { owns_view: true });
        manager.destroy_image(borrowed);

        let calls = backend.calls();
        assert!(calls.iter().any(|call| matches!(call, HeadlessCall::DestroyImageView { .. })));
        assert!(!calls.iter().any(|call| matches!(call, HeadlessCall::FreeImageMemory { .. })));
        manager.destroy();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_write_mapped_buffer() {
        let (backend, mut manager) = setup();
        let buffer = manager.create_buffer(&BufferDesc::new_stage_buffer(16, "stage"));
        manager.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        manager.flush_buffer(buffer, 0, vk::WHOLE_SIZE);

        let vk_buffer = manager.get_buffer(buffer).vk_buffer();
        assert_eq!(backend.read_mapped(vk_buffer, 4, 4), vec![1, 2, 3, 4]);
        manager.destroy();
    }

    #[test]
    #[should_panic(expected = "buffer range out of bounds")]
    fn test_write_out_of_range() {
        let (_backend, mut manager) = setup();
        let buffer = manager.create_buffer(&BufferDesc::new_stage_buffer(16, "stage"));
        manager.write_buffer(buffer, 12, &[0; 8]);
    }

    #[test]
    #[should_panic(expected = "is not host mapped")]
    fn test_write_unmapped() {
        let (_backend, mut manager) = setup();
        let buffer = manager.create_buffer(&BufferDesc::new(16, vk::BufferUsageFlags::STORAGE_BUFFER, "ssbo"));
        manager.write_buffer(buffer, 0, &[0; 4]);
    }

    #[test]
    fn test_update_descriptor() {
        let (backend, mut manager) = setup();
        let ubo = manager.create_buffer(&BufferDesc::new(256, vk::BufferUsageFlags::UNIFORM_BUFFER, "ubo"));
        let storage = manager.create_image(&ImageDesc::new_2d(
            64,
            64,
            vk::Format::R32_SFLOAT,
            vk::ImageUsageFlags::STORAGE,
            "storage",
        ));
        let descriptor = manager.create_descriptor(&DescriptorDesc {
            bindings: vec![
                DescriptorBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL),
                DescriptorBinding::new(1, vk::DescriptorType::STORAGE_IMAGE, 4, vk::ShaderStageFlags::COMPUTE),
            ],
            name: "per-frame".to_string(),
        });
        backend.clear_calls();

        manager.update_descriptor(
            descriptor,
            &[
                DescriptorUpdate::buffer(
                    0,
                    0,
                    DescriptorBufferInfo {
                        buffer: ubo,
                        offset: 0,
                        range: 0,
                    },
                ),
                DescriptorUpdate::image(
                    1,
                    2,
                    DescriptorImageInfo {
                        image: Some(storage),
                        ..Default::default()
                    },
                ),
            ],
        );

        let set = manager.get_descriptor(descriptor).set();
        let calls = backend.calls();
        let [HeadlessCall::UpdateDescriptorSets { writes }] = calls.as_slice() else {
            panic!("expected one batched update, got {calls:?}");
        };
        assert_eq!(
            writes,
            &vec![
                (set, 0, 0, vk::DescriptorType::UNIFORM_BUFFER, vk::ImageLayout::UNDEFINED),
                (set, 1, 2, vk::DescriptorType::STORAGE_IMAGE, vk::ImageLayout::GENERAL),
            ]
        );
        manager.destroy();
    }

    #[test]
    #[should_panic(expected = "array element 4 exceeds descriptor count 4")]
    fn test_update_descriptor_out_of_bounds() {
        let (_backend, mut manager) = setup();
        let descriptor = manager.create_descriptor(&DescriptorDesc {
            bindings: vec![DescriptorBinding::new(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                4,
                vk::ShaderStageFlags::FRAGMENT,
            )],
            name: "textures".to_string(),
        });
        manager.update_descriptor(descriptor, &[DescriptorUpdate::image(0, 4, DescriptorImageInfo::default())]);
    }

    #[test]
    fn test_render_target_extent() {
        let (_backend, mut manager) = setup();
        let color = manager.create_image(&ImageDesc::new_2d(
            800,
            600,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            "color",
        ));
        let depth = manager.create_image(&ImageDesc::new_2d(
            800,
            600,
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            "depth",
        ));
        let rt = manager.create_render_target(&RenderTargetDesc {
            color: vec![color],
            depth: Some(depth),
            name: "main".to_string(),
        });
        assert_eq!(manager.get_render_target(rt).extent(), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(manager.get_image(depth).aspect(), vk::ImageAspectFlags::DEPTH);
        manager.destroy();
    }

    #[test]
    #[should_panic(expected = "attachment extent mismatch")]
    fn test_render_target_mismatch() {
        let (_backend, mut manager) = setup();
        let a = manager.create_image(&color_desc("a"));
        let b = manager.create_image(&ImageDesc::new_2d(
            128,
            128,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            "b",
        ));
        manager.create_render_target(&RenderTargetDesc {
            color: vec![a, b],
            depth: None,
            name: "bad".to_string(),
        });
    }

    #[test]
    fn test_pipeline_shader_modules_released() {
        let (backend, mut manager) = setup();
        let descriptor = manager.create_descriptor(&DescriptorDesc {
            bindings: vec![DescriptorBinding::new(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                1,
                vk::ShaderStageFlags::COMPUTE,
            )],
            name: "cull".to_string(),
        });
        let live_before = backend.live_object_count();
        let pipeline = manager.create_compute_pipeline(&ComputePipelineDesc {
            shader: crate::resources::pipeline::ShaderStageDesc::new(vk::ShaderStageFlags::COMPUTE, vec![0x0723_0203]),
            descriptors: vec![descriptor],
            push_constant_ranges: vec![],
            name: "cull".to_string(),
        });
        // 只剩下 pipeline 与 layout
        assert_eq!(backend.live_object_count(), live_before + 2);
        assert_eq!(manager.get_pipeline(pipeline).bind_point(), vk::PipelineBindPoint::COMPUTE);

        manager.destroy();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let (backend, mut manager) = setup();
        manager.create_image(&color_desc("a"));
        manager.create_buffer(&BufferDesc::new(64, vk::BufferUsageFlags::VERTEX_BUFFER, "vb"));
        manager.create_sampler(&SamplerDesc::linear_repeat("linear"));
        assert_eq!(manager.live_resource_count(), 3);

        manager.destroy();
        assert_eq!(manager.live_resource_count(), 0);
        assert_eq!(backend.live_object_count(), 0);
    }
}
