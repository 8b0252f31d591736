use ash::vk;

use crate::{error::GfxError, resources::ImageHandle};

#[derive(Clone, Debug)]
pub struct RenderTargetDesc {
    pub color: Vec<ImageHandle>,
    pub depth: Option<ImageHandle>,
    pub name: String,
}

/// 一组 dynamic rendering 的 attachment，所有 attachment 的尺寸相同
pub struct GfxRenderTarget {
    pub(crate) color: Vec<ImageHandle>,
    pub(crate) depth: Option<ImageHandle>,
    pub(crate) extent: vk::Extent2D,
    pub(crate) name: String,
}

// getters
impl GfxRenderTarget {
    #[inline]
    pub fn color_attachments(&self) -> &[ImageHandle] {
        &self.color
    }

    #[inline]
    pub fn depth_attachment(&self) -> Option<ImageHandle> {
        self.depth
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 所有 attachment 的 extent 必须一致，返回这个共同的 extent
pub fn resolve_render_target_extent(
    extents: impl IntoIterator<Item = vk::Extent2D>,
) -> Result<vk::Extent2D, GfxError> {
    let mut extents = extents.into_iter();
    let expected = extents.next().ok_or(GfxError::EmptyRenderTarget)?;
    for found in extents {
        if found != expected {
            return Err(GfxError::AttachmentExtentMismatch { expected, found });
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_matching_extents() {
        assert_eq!(resolve_render_target_extent([extent(800, 600), extent(800, 600)]), Ok(extent(800, 600)));
        assert_eq!(resolve_render_target_extent([extent(1, 1)]), Ok(extent(1, 1)));
    }

    #[test]
    fn test_mismatched_extents() {
        assert_eq!(
            resolve_render_target_extent([extent(800, 600), extent(800, 600), extent(400, 300)]),
            Err(GfxError::AttachmentExtentMismatch {
                expected: extent(800, 600),
                found: extent(400, 300)
            })
        );
        assert_eq!(resolve_render_target_extent([]), Err(GfxError::EmptyRenderTarget));
    }
}
