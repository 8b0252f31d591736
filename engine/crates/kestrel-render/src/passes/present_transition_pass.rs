use ash::vk;
use kestrel_gfx::commands::barrier::ImageBarrierDesc;

use crate::pass::{PassContext, RenderPass};

/// 将 swapchain image 从 `TRANSFER_DST_OPTIMAL` 转换到 `PRESENT_SRC_KHR`，总是最后一个 pass
#[derive(Default)]
pub struct PresentTransitionPass;

impl RenderPass for PresentTransitionPass {
    fn name(&self) -> &str {
        "present-transition"
    }

    fn process(&mut self, ctx: &PassContext<'_>) {
        ctx.recorder.image_barriers(&[ImageBarrierDesc::new(ctx.swapchain_image)
            .layout_transfer(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR)
            .src_mask(vk::PipelineStageFlags2::ALL_TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .dst_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE)]);
    }
}
