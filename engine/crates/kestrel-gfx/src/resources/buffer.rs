use ash::vk;

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    /// 为 true 时 buffer 在整个生命周期内保持 map 状态
    pub host_mapped: bool,
    pub name: String,
}

impl BufferDesc {
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags, name: impl Into<String>) -> Self {
        Self {
            size,
            usage,
            host_mapped: false,
            name: name.into(),
        }
    }

    /// 仅用于 CPU -> GPU 传输的 stage buffer
    pub fn new_stage_buffer(size: vk::DeviceSize, name: impl Into<String>) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC, name).host_mapped()
    }

    #[inline]
    pub fn host_mapped(mut self) -> Self {
        self.host_mapped = true;
        self
    }
}

pub struct GfxBuffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) size: vk::DeviceSize,
    pub(crate) usage: vk::BufferUsageFlags,
    pub(crate) host_mapped: bool,
    pub(crate) name: String,
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn is_host_mapped(&self) -> bool {
        self.host_mapped
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
