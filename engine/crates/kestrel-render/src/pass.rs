use ash::vk;
use kestrel_gfx::{
    commands::{gfx_commands::GfxCommands, recorder::CommandRecorder},
    query::query_manager::QueryManager,
    resources::{ImageHandle, manager::ResourceManager},
};

use crate::{frame_counter::FrameLabel, scene::SceneBuffers, settings::RendererSettings};

/// pass 在 init、resize、destroy 时可以访问的对象
pub struct PassInitContext<'a> {
    pub resources: &'a mut ResourceManager,
    pub commands: &'a mut GfxCommands,
    pub queries: &'a mut QueryManager,
    pub settings: &'a RendererSettings,
    pub scene: &'a SceneBuffers,
    pub frame_extent: vk::Extent2D,
    pub swapchain_format: vk::Format,
}

/// 录制一个 pass 时可以访问的对象
///
/// command list 已经处于 Recording 状态，直接录制即可
pub struct PassContext<'a> {
    pub recorder: &'a CommandRecorder<'a>,
    pub resources: &'a ResourceManager,
    pub scene: &'a SceneBuffers,

    pub frame_id: u64,
    pub frame_label: FrameLabel,
    pub frame_extent: vk::Extent2D,
    /// 本帧 acquire 到的 swapchain image
    pub swapchain_image: ImageHandle,
}

/// Frame Pipeline 中的一个 pass
///
/// 按照注册时的 order 从小到大执行；每个 pass 都会被 debug label 与 timestamp 包围。
///
/// swapchain image 的 layout 约定：
/// - clear pass 之后为 `TRANSFER_DST_OPTIMAL`
/// - 中间的 pass 结束时需要保持 `TRANSFER_DST_OPTIMAL`
/// - present transition pass 将其转换为 `PRESENT_SRC_KHR`
pub trait RenderPass {
    fn name(&self) -> &str;

    /// 注册到 renderer 时调用一次
    fn init(&mut self, _ctx: &mut PassInitContext<'_>) {}

    /// swapchain 重建之后调用
    fn resize(&mut self, _ctx: &mut PassInitContext<'_>) {}

    fn process(&mut self, ctx: &PassContext<'_>);

    /// 为 true 时 renderer 会用 pipeline statistics query 包围这个 pass
    fn pipeline_statistics(&self) -> bool {
        false
    }

    /// 在 swapchain、scene buffer 与各个 manager 销毁之前调用
    fn destroy(&mut self, _ctx: &mut PassInitContext<'_>) {}
}
