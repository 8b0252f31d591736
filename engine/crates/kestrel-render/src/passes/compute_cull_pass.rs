use ash::vk;
use kestrel_gfx::{
    commands::barrier::{BufferBarrierDesc, GfxBarrierMask},
    resources::{
        DescriptorHandle, PipelineHandle,
        descriptor::{DescriptorBinding, DescriptorBufferInfo, DescriptorDesc, DescriptorUpdate},
        pipeline::{ComputePipelineDesc, ShaderStageDesc},
    },
};

use crate::pass::{PassContext, PassInitContext, RenderPass};

/// 与 shader 中的 local_size_x 保持一致
const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct CullPushConstants {
    draw_count: u32,
    _padding: [u32; 3],
}

/// 对 scene 中的 draw command 做 GPU culling
///
/// - binding 0: draw commands，可读写
/// - binding 1: transforms，只读
///
/// dispatch 之后 draw command buffer 可以直接用于 indirect draw
pub struct ComputeCullPass {
    spirv: Vec<u32>,
    descriptor: Option<DescriptorHandle>,
    pipeline: Option<PipelineHandle>,
}

impl ComputeCullPass {
    pub fn new(spirv: Vec<u32>) -> Self {
        Self {
            spirv,
            descriptor: None,
            pipeline: None,
        }
    }
}

impl RenderPass for ComputeCullPass {
    fn name(&self) -> &str {
        "compute-cull"
    }

    fn init(&mut self, ctx: &mut PassInitContext<'_>) {
        let descriptor = ctx.resources.create_descriptor(&DescriptorDesc {
            bindings: vec![
                DescriptorBinding::new(0, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
                DescriptorBinding::new(1, vk::DescriptorType::STORAGE_BUFFER, 1, vk::ShaderStageFlags::COMPUTE),
            ],
            name: "compute-cull".to_string(),
        });
        let whole = |buffer| DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: 0,
        };
        ctx.resources.update_descriptor(descriptor, &[
            DescriptorUpdate::buffer(0, 0, whole(ctx.scene.draw_commands())),
            DescriptorUpdate::buffer(1, 0, whole(ctx.scene.transforms())),
        ]);

        let pipeline = ctx.resources.create_compute_pipeline(&ComputePipelineDesc {
            shader: ShaderStageDesc::new(vk::ShaderStageFlags::COMPUTE, self.spirv.clone()),
            descriptors: vec![descriptor],
            push_constant_ranges: vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: size_of::<CullPushConstants>() as u32,
            }],
            name: "compute-cull".to_string(),
        });

        self.descriptor = Some(descriptor);
        self.pipeline = Some(pipeline);
    }

    fn process(&mut self, ctx: &PassContext<'_>) {
        let (Some(descriptor), Some(pipeline)) = (self.descriptor, self.pipeline) else {
            log::error!("compute cull pass is not initialized");
            panic!("compute cull pass is not initialized");
        };
        let draw_count = ctx.scene.draw_count();
        if draw_count == 0 {
            return;
        }

        let rec = ctx.recorder;
        rec.bind_compute_pipeline(pipeline);
        rec.bind_descriptors(pipeline, 0, &[descriptor]);
        rec.push_constants(pipeline, vk::ShaderStageFlags::COMPUTE, 0, &CullPushConstants {
            draw_count,
            ..Default::default()
        });
        rec.dispatch(draw_count.div_ceil(WORKGROUP_SIZE), 1, 1);

        rec.buffer_barriers(&[BufferBarrierDesc::new(ctx.scene.draw_commands()).mask(GfxBarrierMask {
            src_stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
            src_access: vk::AccessFlags2::SHADER_WRITE,
            dst_stage: vk::PipelineStageFlags2::DRAW_INDIRECT,
            dst_access: vk::AccessFlags2::INDIRECT_COMMAND_READ,
        })]);
    }

    fn pipeline_statistics(&self) -> bool {
        true
    }

    fn destroy(&mut self, ctx: &mut PassInitContext<'_>) {
        if let Some(pipeline) = self.pipeline.take() {
            ctx.resources.destroy_pipeline(pipeline);
        }
        if let Some(descriptor) = self.descriptor.take() {
            ctx.resources.destroy_descriptor(descriptor);
        }
    }
}
