use ash::vk;

use crate::error::GfxError;

/// image 是否由 manager 持有显存
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageOwnership {
    /// 由 manager 分配显存，销毁时释放
    Owned,
    /// 外部提供的 image（例如 swapchain image），销毁时不释放显存；
    /// `owns_view` 表示 view 是否由 manager 创建
    Borrowed { owns_view: bool },
}

/// 创建 image 所需的参数
#[derive(Clone, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub cube: bool,
    /// 为每个 mip level 额外创建一个单独的 view
    pub per_mip_views: bool,
    pub name: String,
}

impl ImageDesc {
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags, name: impl Into<String>) -> Self {
        Self {
            extent: vk::Extent3D { width, height, depth: 1 },
            format,
            usage,
            mip_levels: 1,
            array_layers: 1,
            cube: false,
            per_mip_views: false,
            name: name.into(),
        }
    }

    pub fn new_3d(extent: vk::Extent3D, format: vk::Format, usage: vk::ImageUsageFlags, name: impl Into<String>) -> Self {
        Self {
            extent,
            ..Self::new_2d(extent.width, extent.height, format, usage, name)
        }
    }

    #[inline]
    pub fn mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[inline]
    pub fn cube(mut self) -> Self {
        self.cube = true;
        self
    }

    #[inline]
    pub fn per_mip_views(mut self) -> Self {
        self.per_mip_views = true;
        self
    }
}

pub struct GfxImage {
    pub(crate) handle: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) mip_views: Vec<vk::ImageView>,

    pub(crate) image_type: vk::ImageType,
    pub(crate) view_type: vk::ImageViewType,
    pub(crate) extent: vk::Extent3D,
    pub(crate) format: vk::Format,
    pub(crate) usage: vk::ImageUsageFlags,
    pub(crate) create_flags: vk::ImageCreateFlags,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) mip_levels: u32,
    pub(crate) array_layers: u32,

    pub(crate) ownership: ImageOwnership,
    pub(crate) name: String,
}

// getters
impl GfxImage {
    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// 单个 mip level 的 view，只有创建时要求了 per_mip_views 才存在
    #[inline]
    pub fn mip_view(&self, mip: u32) -> Option<vk::ImageView> {
        self.mip_views.get(mip as usize).copied()
    }

    #[inline]
    pub fn image_type(&self) -> vk::ImageType {
        self.image_type
    }

    #[inline]
    pub fn view_type(&self) -> vk::ImageViewType {
        self.view_type
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    #[inline]
    pub fn create_flags(&self) -> vk::ImageCreateFlags {
        self.create_flags
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    #[inline]
    pub fn ownership(&self) -> ImageOwnership {
        self.ownership
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 整个 image 的 subresource range
    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

// tools
/// 根据 extent 与 layer 数量推导 image type 与 view type
///
/// - depth > 1 为 3D，否则 height > 1 为 2D，否则为 1D
/// - cube 要求 layer 数量是 6 的倍数，多于 6 层时为 CUBE_ARRAY
/// - layer 数量大于 1 时使用对应的 ARRAY 类型，3D image 不能有多个 layer
pub fn derive_view_type(
    extent: vk::Extent3D,
    array_layers: u32,
    cube: bool,
) -> Result<(vk::ImageType, vk::ImageViewType), GfxError> {
    let image_type = if extent.depth > 1 {
        vk::ImageType::TYPE_3D
    } else if extent.height > 1 {
        vk::ImageType::TYPE_2D
    } else {
        vk::ImageType::TYPE_1D
    };

    if cube {
        if array_layers == 0 || array_layers % 6 != 0 {
            return Err(GfxError::CubeLayerCount(array_layers));
        }
        let view_type = if array_layers > 6 { vk::ImageViewType::CUBE_ARRAY } else { vk::ImageViewType::CUBE };
        return Ok((vk::ImageType::TYPE_2D, view_type));
    }

    let is_array = array_layers > 1;
    let view_type = match image_type {
        vk::ImageType::TYPE_3D if is_array => return Err(GfxError::VolumeArray(array_layers)),
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        vk::ImageType::TYPE_2D if is_array => vk::ImageViewType::TYPE_2D_ARRAY,
        vk::ImageType::TYPE_2D => vk::ImageViewType::TYPE_2D,
        _ if is_array => vk::ImageViewType::TYPE_1D_ARRAY,
        _ => vk::ImageViewType::TYPE_1D,
    };
    Ok((image_type, view_type))
}

/// 完整 mip chain 的层数
#[inline]
pub fn max_mip_levels(extent: vk::Extent3D) -> u32 {
    let max_dim = extent.width.max(extent.height).max(extent.depth).max(1);
    u32::BITS - max_dim.leading_zeros()
}

pub fn validate_mip_levels(extent: vk::Extent3D, mip_levels: u32) -> Result<(), GfxError> {
    if mip_levels == 0 || mip_levels > max_mip_levels(extent) {
        return Err(GfxError::InvalidMipCount {
            mips: mip_levels,
            width: extent.width,
            height: extent.height,
            depth: extent.depth,
        });
    }
    Ok(())
}

/// 第 level 层 mip 的 extent，每个维度减半并且不小于 1
#[inline]
pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (extent.width >> level).max(1),
        height: (extent.height >> level).max(1),
        depth: (extent.depth >> level).max(1),
    }
}

/// 根据 format 得到 aspect mask
pub fn format_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => vk::ImageAspectFlags::DEPTH,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}
