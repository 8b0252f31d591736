use std::ffi::CStr;

use ash::vk;

use crate::resources::DescriptorHandle;

#[derive(Clone, Debug)]
pub struct ShaderStageDesc {
    pub stage: vk::ShaderStageFlags,
    pub spirv: Vec<u32>,
    pub entry_point: &'static CStr,
}

impl ShaderStageDesc {
    pub fn new(stage: vk::ShaderStageFlags, spirv: Vec<u32>) -> Self {
        Self {
            stage,
            spirv,
            entry_point: c"main",
        }
    }
}

/// 使用 dynamic rendering 的 graphics pipeline，viewport 与 scissor 为动态状态
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub vertex: ShaderStageDesc,
    pub fragment: Option<ShaderStageDesc>,

    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,

    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub alpha_blend: bool,

    pub descriptors: Vec<DescriptorHandle>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub name: String,
}

impl GraphicsPipelineDesc {
    pub fn new(vertex: ShaderStageDesc, fragment: Option<ShaderStageDesc>, name: impl Into<String>) -> Self {
        Self {
            vertex,
            fragment,
            vertex_bindings: vec![],
            vertex_attributes: vec![],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            color_formats: vec![],
            depth_format: None,
            depth_test: false,
            depth_write: false,
            alpha_blend: false,
            descriptors: vec![],
            push_constant_ranges: vec![],
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDesc {
    pub shader: ShaderStageDesc,
    pub descriptors: Vec<DescriptorHandle>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub name: String,
}

pub struct GfxPipeline {
    pub(crate) handle: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) bind_point: vk::PipelineBindPoint,
    pub(crate) name: String,
}

// getters
impl GfxPipeline {
    #[inline]
    pub fn vk_pipeline(&self) -> vk::Pipeline {
        self.handle
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
