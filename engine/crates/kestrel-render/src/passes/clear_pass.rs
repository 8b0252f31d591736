use ash::vk;
use kestrel_gfx::commands::barrier::ImageBarrierDesc;

use crate::pass::{PassContext, RenderPass};

/// 丢弃 swapchain image 之前的内容，并以固定颜色清空
pub struct ClearPass {
    color: [f32; 4],
}

impl ClearPass {
    pub fn new(color: [f32; 4]) -> Self {
        Self { color }
    }
}

impl Default for ClearPass {
    fn default() -> Self {
        Self::new([0.0, 0.0, 0.0, 1.0])
    }
}

impl RenderPass for ClearPass {
    fn name(&self) -> &str {
        "clear"
    }

    fn process(&mut self, ctx: &PassContext<'_>) {
        ctx.recorder.image_barriers(&[ImageBarrierDesc::new(ctx.swapchain_image)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
            .dst_mask(vk::PipelineStageFlags2::CLEAR, vk::AccessFlags2::TRANSFER_WRITE)]);
        ctx.recorder.clear_color_image(ctx.swapchain_image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, self.color);
    }
}
