use ash::vk;
use kestrel_gfx::resources::{BufferHandle, buffer::BufferDesc, manager::ResourceManager};

/// 线性分配的 upload buffer，在整个生命周期内保持 map
///
/// 每帧开始时 `reset`，之后通过 `push` 依次写入数据
pub struct UploadBuffer {
    buffer: BufferHandle,
    capacity: vk::DeviceSize,
    cursor: vk::DeviceSize,
    /// 设备要求的最小 offset 对齐
    min_alignment: vk::DeviceSize,
    non_coherent_atom_size: vk::DeviceSize,
    name: String,
}

// new & init
impl UploadBuffer {
    pub fn new(resources: &mut ResourceManager, capacity: vk::DeviceSize, name: impl Into<String>) -> Self {
        let name = name.into();
        let limits = resources.backend().limits();
        let buffer = resources.create_buffer(&BufferDesc::new_stage_buffer(capacity, name.clone()));
        Self {
            buffer,
            capacity,
            cursor: 0,
            min_alignment: limits.min_storage_buffer_offset_alignment.max(1),
            non_coherent_atom_size: limits.non_coherent_atom_size.max(1),
            name,
        }
    }
}

// getters
impl UploadBuffer {
    #[inline]
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    #[inline]
    pub fn cursor(&self) -> vk::DeviceSize {
        self.cursor
    }

    #[inline]
    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }
}

// tools
impl UploadBuffer {
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// 写入数据并返回其 offset
    ///
    /// offset 同时满足 `align` 与设备的最小对齐；超出容量时 panic
    pub fn push(&mut self, resources: &ResourceManager, bytes: &[u8], align: vk::DeviceSize) -> vk::DeviceSize {
        let align = align.max(1).max(self.min_alignment);
        let offset = self.cursor.next_multiple_of(align);
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.capacity {
            log::error!(
                "upload buffer `{}` overflow: {} bytes at offset {}, capacity {}",
                self.name,
                bytes.len(),
                offset,
                self.capacity
            );
            panic!(
                "upload buffer `{}` overflow: {} bytes at offset {}, capacity {}",
                self.name,
                bytes.len(),
                offset,
                self.capacity
            );
        }

        resources.write_buffer(self.buffer, offset, bytes);
        self.cursor = end;
        offset
    }

    /// flush 已写入的范围，按照 non coherent atom size 向上取整
    pub fn flush(&self, resources: &ResourceManager) {
        if self.cursor == 0 {
            return;
        }
        // 向上取整越过容量时，不对齐的末尾只能用 WHOLE_SIZE 覆盖
        let size = self.cursor.next_multiple_of(self.non_coherent_atom_size);
        let size = if size > self.capacity { vk::WHOLE_SIZE } else { size };
        resources.flush_buffer(self.buffer, 0, size);
    }
}

// destroy
impl UploadBuffer {
    pub fn destroy(self, resources: &mut ResourceManager) {
        resources.destroy_buffer(self.buffer);
    }
}
