use ash::vk;

use crate::{
    error::GfxError,
    resources::{BufferHandle, ImageHandle, SamplerHandle},
};

/// 全局 descriptor pool 中各类 descriptor 的容量
#[derive(Copy, Clone, Debug)]
pub struct DescriptorQuotas {
    pub max_sets: u32,
    pub samplers: u32,
    pub combined_image_samplers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
}

impl Default for DescriptorQuotas {
    fn default() -> Self {
        Self {
            max_sets: 128,
            samplers: 32,
            combined_image_samplers: 1024,
            sampled_images: 1024,
            storage_images: 128,
            uniform_buffers: 128,
            storage_buffers: 256,
        }
    }
}

impl DescriptorQuotas {
    pub(crate) fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        [
            (vk::DescriptorType::SAMPLER, self.samplers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, self.combined_image_samplers),
            (vk::DescriptorType::SAMPLED_IMAGE, self.sampled_images),
            (vk::DescriptorType::STORAGE_IMAGE, self.storage_images),
            (vk::DescriptorType::UNIFORM_BUFFER, self.uniform_buffers),
            (vk::DescriptorType::STORAGE_BUFFER, self.storage_buffers),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect()
    }
}

/// descriptor layout 中的一个 binding
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub fn new(binding: u32, ty: vk::DescriptorType, count: u32, stages: vk::ShaderStageFlags) -> Self {
        Self { binding, ty, count, stages }
    }
}

#[derive(Clone, Debug)]
pub struct DescriptorDesc {
    pub bindings: Vec<DescriptorBinding>,
    pub name: String,
}

pub struct GfxDescriptor {
    pub(crate) set: vk::DescriptorSet,
    pub(crate) layout: vk::DescriptorSetLayout,
    pub(crate) bindings: Vec<DescriptorBinding>,
    pub(crate) name: String,
}

// getters
impl GfxDescriptor {
    #[inline]
    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DescriptorBufferInfo {
    pub buffer: BufferHandle,
    pub offset: vk::DeviceSize,
    /// 0 表示从 offset 到 buffer 末尾
    pub range: vk::DeviceSize,
}

/// sampler-only 的 descriptor 只填 sampler
#[derive(Copy, Clone, Debug, Default)]
pub struct DescriptorImageInfo {
    pub image: Option<ImageHandle>,
    /// 使用单个 mip 的 view，None 表示完整的 view
    pub mip: Option<u32>,
    pub sampler: Option<SamplerHandle>,
}

/// 对一个 binding 的一个数组元素的更新，buffer 与 image 必须恰好提供一个
#[derive(Copy, Clone, Debug)]
pub struct DescriptorUpdate {
    pub binding: u32,
    pub array_element: u32,
    pub buffer: Option<DescriptorBufferInfo>,
    pub image: Option<DescriptorImageInfo>,
}

impl DescriptorUpdate {
    pub fn buffer(binding: u32, array_element: u32, info: DescriptorBufferInfo) -> Self {
        Self {
            binding,
            array_element,
            buffer: Some(info),
            image: None,
        }
    }

    pub fn image(binding: u32, array_element: u32, info: DescriptorImageInfo) -> Self {
        Self {
            binding,
            array_element,
            buffer: None,
            image: Some(info),
        }
    }
}

#[inline]
fn is_buffer_descriptor(ty: vk::DescriptorType) -> bool {
    matches!(
        ty,
        vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
    )
}

/// descriptor 写入时 image 应处于的 layout
///
/// storage image 为 GENERAL；sampled / combined 为 SHADER_READ_ONLY；sampler-only 没有 layout
pub fn descriptor_image_layout(ty: vk::DescriptorType) -> vk::ImageLayout {
    match ty {
        vk::DescriptorType::STORAGE_IMAGE => vk::ImageLayout::GENERAL,
        vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        | vk::DescriptorType::INPUT_ATTACHMENT => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        _ => vk::ImageLayout::UNDEFINED,
    }
}

/// 根据声明的 bindings 检查一次更新，返回该 binding 的 descriptor type
pub fn validate_update(bindings: &[DescriptorBinding], update: &DescriptorUpdate) -> Result<vk::DescriptorType, GfxError> {
    let binding = bindings
        .iter()
        .find(|b| b.binding == update.binding)
        .ok_or(GfxError::UnknownBinding(update.binding))?;

    if update.array_element >= binding.count {
        return Err(GfxError::ArrayElementOutOfBounds {
            binding: binding.binding,
            element: update.array_element,
            count: binding.count,
        });
    }

    match (&update.buffer, &update.image) {
        (Some(_), None) if !is_buffer_descriptor(binding.ty) => Err(GfxError::DescriptorKindMismatch {
            binding: binding.binding,
            ty: binding.ty,
            kind: "buffer",
        }),
        (None, Some(_)) if is_buffer_descriptor(binding.ty) => Err(GfxError::DescriptorKindMismatch {
            binding: binding.binding,
            ty: binding.ty,
            kind: "image",
        }),
        (Some(_), None) | (None, Some(_)) => Ok(binding.ty),
        _ => Err(GfxError::AmbiguousDescriptorWrite(binding.binding)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handle::HandleAllocator, resources::buffer::GfxBuffer};

    fn bindings() -> Vec<DescriptorBinding> {
        vec![
            DescriptorBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL),
            DescriptorBinding::new(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 16, vk::ShaderStageFlags::FRAGMENT),
            DescriptorBinding::new(2, vk::DescriptorType::STORAGE_IMAGE, 1, vk::ShaderStageFlags::COMPUTE),
        ]
    }

    fn buffer_info() -> DescriptorBufferInfo {
        let mut buffers = HandleAllocator::new();
        let buffer = buffers.alloc(GfxBuffer {
            handle: vk::Buffer::null(),
            size: 64,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            host_mapped: false,
            name: "ubo".to_string(),
        });
        DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: 0,
        }
    }

    #[test]
    fn test_valid_updates() {
        let bindings = bindings();
        assert_eq!(
            validate_update(&bindings, &DescriptorUpdate::buffer(0, 0, buffer_info())),
            Ok(vk::DescriptorType::UNIFORM_BUFFER)
        );
        assert_eq!(
            validate_update(&bindings, &DescriptorUpdate::image(1, 15, DescriptorImageInfo::default())),
            Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        );
    }

    #[test]
    fn test_binding_and_element_bounds() {
        let bindings = bindings();
        assert_eq!(
            validate_update(&bindings, &DescriptorUpdate::buffer(7, 0, buffer_info())),
            Err(GfxError::UnknownBinding(7))
        );
        assert_eq!(
            validate_update(&bindings, &DescriptorUpdate::image(1, 16, DescriptorImageInfo::default())),
            Err(GfxError::ArrayElementOutOfBounds {
                binding: 1,
                element: 16,
                count: 16
            })
        );
    }

    #[test]
    fn test_exactly_one_info() {
        let bindings = bindings();
        let both = DescriptorUpdate {
            binding: 0,
            array_element: 0,
            buffer: Some(buffer_info()),
            image: Some(DescriptorImageInfo::default()),
        };
        let neither = DescriptorUpdate {
            binding: 0,
            array_element: 0,
            buffer: None,
            image: None,
        };
        assert_eq!(validate_update(&bindings, &both), Err(GfxError::AmbiguousDescriptorWrite(0)));
        assert_eq!(validate_update(&bindings, &neither), Err(GfxError::AmbiguousDescriptorWrite(0)));
    }

    #[test]
    fn test_kind_mismatch() {
        let bindings = bindings();
        assert!(matches!(
            validate_update(&bindings, &DescriptorUpdate::image(0, 0, DescriptorImageInfo::default())),
            Err(GfxError::DescriptorKindMismatch { kind: "image", .. })
        ));
        assert!(matches!(
            validate_update(&bindings, &DescriptorUpdate::buffer(2, 0, buffer_info())),
            Err(GfxError::DescriptorKindMismatch { kind: "buffer", .. })
        ));
    }

    #[test]
    fn test_image_layout_from_type() {
        assert_eq!(descriptor_image_layout(vk::DescriptorType::STORAGE_IMAGE), vk::ImageLayout::GENERAL);
        assert_eq!(
            descriptor_image_layout(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(descriptor_image_layout(vk::DescriptorType::SAMPLER), vk::ImageLayout::UNDEFINED);
    }
}
