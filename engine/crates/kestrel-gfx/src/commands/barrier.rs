use ash::vk;

use crate::{
    error::{GfxError, validate_buffer_range, validate_range},
    resources::{BufferHandle, ImageHandle},
};

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl Default for GfxBarrierMask {
    fn default() -> Self {
        Self {
            src_stage: vk::PipelineStageFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
        }
    }
}

/// image barrier 的描述，录制时才会根据 image 的实际 mip / layer 数量解析范围
///
/// `mip_count` 与 `layer_count` 为 0 表示从 base 一直到最后
#[derive(Copy, Clone, Debug)]
pub struct ImageBarrierDesc {
    pub image: ImageHandle,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub mask: GfxBarrierMask,

    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,

    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl ImageBarrierDesc {
    pub fn new(image: ImageHandle) -> Self {
        Self {
            image,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            mask: GfxBarrierMask::default(),
            base_mip: 0,
            mip_count: 0,
            base_layer: 0,
            layer_count: 0,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage: vk::PipelineStageFlags2, src_access: vk::AccessFlags2) -> Self {
        self.mask.src_stage = src_stage;
        self.mask.src_access = src_access;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage: vk::PipelineStageFlags2, dst_access: vk::AccessFlags2) -> Self {
        self.mask.dst_stage = dst_stage;
        self.mask.dst_access = dst_access;
        self
    }

    /// builder
    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.mask = mask;
        self
    }

    /// builder
    #[inline]
    pub fn mip_range(mut self, base_mip: u32, mip_count: u32) -> Self {
        self.base_mip = base_mip;
        self.mip_count = mip_count;
        self
    }

    /// builder
    #[inline]
    pub fn layer_range(mut self, base_layer: u32, layer_count: u32) -> Self {
        self.base_layer = base_layer;
        self.layer_count = layer_count;
        self
    }

    /// builder
    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family: u32, dst_queue_family: u32) -> Self {
        self.src_queue_family = src_queue_family;
        self.dst_queue_family = dst_queue_family;
        self
    }
}

/// `size` 为 0 表示从 offset 一直到 buffer 末尾
#[derive(Copy, Clone, Debug)]
pub struct BufferBarrierDesc {
    pub buffer: BufferHandle,
    pub mask: GfxBarrierMask,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

impl BufferBarrierDesc {
    pub fn new(buffer: BufferHandle) -> Self {
        Self {
            buffer,
            mask: GfxBarrierMask::default(),
            offset: 0,
            size: 0,
        }
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.mask = mask;
        self
    }

    #[inline]
    pub fn range(mut self, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.offset = offset;
        self.size = size;
        self
    }
}

/// image 进入 `layout` 之后，第一次使用它的 stage 与 access
pub fn layout_dst_mask(layout: vk::ImageLayout) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    match layout {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::GENERAL => (
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
        // present 由 semaphore 同步
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE),
        _ => (vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::MEMORY_READ),
    }
}

/// 解析 mip / layer 范围，返回实际的 count
///
/// count 为 0 时取 `total - base`；解析出空范围或者越界都是错误
pub fn resolve_range(base: u32, count: u32, total: u32) -> Result<u32, GfxError> {
    let count = if count == 0 { total.saturating_sub(base) } else { count };
    if count == 0 {
        return Err(GfxError::RangeOutOfBounds { base, count, total });
    }
    validate_range(base, count, total)?;
    Ok(count)
}

/// 与 [`resolve_range`] 相同，作用于 buffer 的字节范围
pub fn resolve_buffer_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    total: vk::DeviceSize,
) -> Result<vk::DeviceSize, GfxError> {
    let size = if size == 0 { total.saturating_sub(offset) } else { size };
    if size == 0 {
        return Err(GfxError::BufferRangeOutOfBounds { offset, size, total });
    }
    validate_buffer_range(offset, size, total)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_full_range() {
        assert_eq!(resolve_range(0, 0, 8), Ok(8));
        assert_eq!(resolve_range(3, 0, 8), Ok(5));
        assert_eq!(resolve_range(2, 4, 8), Ok(4));
        assert_eq!(resolve_range(7, 1, 8), Ok(1));
    }

    #[test]
    fn test_resolve_rejects_out_of_bounds() {
        assert_eq!(
            resolve_range(6, 4, 8),
            Err(GfxError::RangeOutOfBounds {
                base: 6,
                count: 4,
                total: 8
            })
        );
        // base 已经到达末尾，默认范围为空
        assert!(resolve_range(8, 0, 8).is_err());
        assert!(resolve_range(9, 0, 8).is_err());
    }

    #[test]
    fn test_layout_dst_mask() {
        let (stage, access) = layout_dst_mask(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert!(access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));

        let (stage, access) = layout_dst_mask(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(stage, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(access, vk::AccessFlags2::TRANSFER_READ);

        let (stage, access) = layout_dst_mask(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert_eq!(access, vk::AccessFlags2::SHADER_READ);
    }

    #[test]
    fn test_resolve_buffer_range() {
        assert_eq!(resolve_buffer_range(0, 0, 256), Ok(256));
        assert_eq!(resolve_buffer_range(64, 0, 256), Ok(192));
        assert_eq!(resolve_buffer_range(64, 64, 256), Ok(64));
        assert!(resolve_buffer_range(256, 0, 256).is_err());
        assert!(resolve_buffer_range(200, 64, 256).is_err());
    }
}
