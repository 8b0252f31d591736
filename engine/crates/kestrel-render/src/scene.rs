//! 所有 frame slot 共享的场景 buffer，以及每帧的场景变化
//!
//! 写入共享 buffer 之前与之后都有 barrier：shader read -> transfer write -> shader read

use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{
    commands::{
        barrier::{BufferBarrierDesc, GfxBarrierMask},
        recorder::CommandRecorder,
    },
    resources::{BufferHandle, buffer::BufferDesc, manager::ResourceManager},
};

use crate::{settings::SceneCapacities, upload_buffer::UploadBuffer};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraData {
    pub view: glam::Mat4,
    pub projection: glam::Mat4,
    pub view_projection: glam::Mat4,
    pub position: glam::Vec4,
}

impl CameraData {
    pub fn look_at(position: glam::Vec3, target: glam::Vec3, fov_y: f32, aspect: f32) -> Self {
        let view = glam::Mat4::look_at_rh(position, target, glam::Vec3::Y);
        let projection = glam::Mat4::perspective_rh(fov_y, aspect, 0.1, 1000.0);
        Self {
            view,
            projection,
            view_projection: projection * view,
            position: position.extend(1.0),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TransformData {
    pub model: glam::Mat4,
    /// model 矩阵逆的转置
    pub normal: glam::Mat4,
}

impl TransformData {
    pub fn new(model: glam::Mat4) -> Self {
        Self {
            model,
            normal: model.inverse().transpose(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialData {
    pub base_color: glam::Vec4,
    pub emissive: glam::Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub albedo_texture: u32,
    pub _padding: u32,
}

/// 与 `VkDrawIndexedIndirectCommand` 的布局相同
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawCommand {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

/// 一帧之内场景的变化，每个元素带有目标位置的下标
#[derive(Clone, Debug, Default)]
pub struct SceneChanges {
    pub camera: Option<CameraData>,
    pub transforms: Vec<(u32, TransformData)>,
    pub materials: Vec<(u32, MaterialData)>,
    pub draw_commands: Vec<(u32, DrawCommand)>,
}

impl SceneChanges {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.camera.is_none() && self.transforms.is_empty() && self.materials.is_empty() && self.draw_commands.is_empty()
    }
}

/// 设备端的场景 buffer，被所有 frame slot 共享
pub struct SceneBuffers {
    camera: BufferHandle,
    transforms: BufferHandle,
    materials: BufferHandle,
    draw_commands: BufferHandle,

    capacities: SceneCapacities,
    /// 已经写入过的 draw command 的数量（最大下标 + 1）
    draw_count: u32,
}

/// scene buffer 可能被读取的阶段
fn scene_read_mask() -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    (
        vk::PipelineStageFlags2::DRAW_INDIRECT
            | vk::PipelineStageFlags2::VERTEX_SHADER
            | vk::PipelineStageFlags2::FRAGMENT_SHADER
            | vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::INDIRECT_COMMAND_READ | vk::AccessFlags2::UNIFORM_READ | vk::AccessFlags2::SHADER_READ,
    )
}

// new & init
impl SceneBuffers {
    pub fn new(resources: &mut ResourceManager, capacities: &SceneCapacities) -> Self {
        let storage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        let buffer = |resources: &mut ResourceManager, stride: usize, count: u32, usage, name: &str| {
            resources.create_buffer(&BufferDesc::new(stride as vk::DeviceSize * count.max(1) as vk::DeviceSize, usage, name))
        };

        let camera = buffer(
            resources,
            size_of::<CameraData>(),
            1,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            "scene-camera",
        );
        let transforms = buffer(resources, size_of::<TransformData>(), capacities.transforms, storage, "scene-transforms");
        let materials = buffer(resources, size_of::<MaterialData>(), capacities.materials, storage, "scene-materials");
        let draw_commands = buffer(
            resources,
            size_of::<DrawCommand>(),
            capacities.draw_commands,
            storage | vk::BufferUsageFlags::INDIRECT_BUFFER,
            "scene-draw-commands",
        );
        log::info!(
            "create scene buffers: {} transforms, {} materials, {} draw commands",
            capacities.transforms,
            capacities.materials,
            capacities.draw_commands
        );

        Self {
            camera,
            transforms,
            materials,
            draw_commands,
            capacities: *capacities,
            draw_count: 0,
        }
    }
}

// getters
impl SceneBuffers {
    #[inline]
    pub fn camera(&self) -> BufferHandle {
        self.camera
    }

    #[inline]
    pub fn transforms(&self) -> BufferHandle {
        self.transforms
    }

    #[inline]
    pub fn materials(&self) -> BufferHandle {
        self.materials
    }

    #[inline]
    pub fn draw_commands(&self) -> BufferHandle {
        self.draw_commands
    }

    #[inline]
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }
}

/// 将带下标的元素排序、去重（同一下标保留最后一次写入），合并为连续的区间
///
/// 返回 (起始下标, 区间内的元素)
fn index_runs<T: bytemuck::Pod>(name: &str, elements: &[(u32, T)], capacity: u32) -> Vec<(u32, Vec<T>)> {
    if let Some((index, _)) = elements.iter().find(|(index, _)| *index >= capacity) {
        log::error!("scene {} index {} out of capacity {}", name, index, capacity);
        panic!("scene {} index {} out of capacity {}", name, index, capacity);
    }

    let mut latest = elements.iter().enumerate().map(|(order, (index, value))| (*index, order, *value)).collect_vec();
    latest.sort_by_key(|(index, order, _)| (*index, std::cmp::Reverse(*order)));
    latest.dedup_by_key(|(index, _, _)| *index);

    let mut runs: Vec<(u32, Vec<T>)> = Vec::new();
    for (index, _, value) in latest {
        match runs.last_mut() {
            Some((start, values)) if *start + values.len() as u32 == index => values.push(value),
            _ => runs.push((index, vec![value])),
        }
    }
    runs
}

fn runs_as_bytes<T: bytemuck::Pod>(runs: Vec<(u32, Vec<T>)>) -> Vec<(u32, Vec<u8>)> {
    runs.into_iter().map(|(start, values)| (start, bytemuck::cast_slice(&values).to_vec())).collect()
}

// tools
impl SceneBuffers {
    /// 将场景变化写入 upload buffer，然后拷贝到共享的 scene buffer 中
    ///
    /// 拷贝前后的 barrier 与拷贝本身都是批量录制的
    pub fn upload(&mut self, rec: &CommandRecorder<'_>, upload: &mut UploadBuffer, changes: &SceneChanges) {
        let _span = tracy_client::span!("SceneBuffers::upload");
        if changes.is_empty() {
            return;
        }
        let resources = rec.resources();

        let mut copies: Vec<(BufferHandle, Vec<vk::BufferCopy>)> = Vec::new();
        let mut stage = |dst: BufferHandle, stride: usize, runs: Vec<(u32, Vec<u8>)>| {
            if runs.is_empty() {
                return;
            }
            let regions = runs
                .into_iter()
                .map(|(start, bytes)| vk::BufferCopy {
                    src_offset: upload.push(resources, &bytes, 16),
                    dst_offset: start as vk::DeviceSize * stride as vk::DeviceSize,
                    size: bytes.len() as vk::DeviceSize,
                })
                .collect_vec();
            copies.push((dst, regions));
        };
        if let Some(camera) = &changes.camera {
            stage(self.camera, size_of::<CameraData>(), vec![(0, bytemuck::bytes_of(camera).to_vec())]);
        }
        stage(
            self.transforms,
            size_of::<TransformData>(),
            runs_as_bytes(index_runs("transform", &changes.transforms, self.capacities.transforms)),
        );
        stage(
            self.materials,
            size_of::<MaterialData>(),
            runs_as_bytes(index_runs("material", &changes.materials, self.capacities.materials)),
        );
        let draw_runs = index_runs("draw command", &changes.draw_commands, self.capacities.draw_commands);
        if let Some((start, values)) = draw_runs.last() {
            self.draw_count = self.draw_count.max(start + values.len() as u32);
        }
        stage(self.draw_commands, size_of::<DrawCommand>(), runs_as_bytes(draw_runs));

        upload.flush(resources);

        let (read_stages, read_access) = scene_read_mask();
        let to_transfer = GfxBarrierMask {
            src_stage: read_stages,
            src_access: read_access,
            dst_stage: vk::PipelineStageFlags2::TRANSFER,
            dst_access: vk::AccessFlags2::TRANSFER_WRITE,
        };
        let to_read = GfxBarrierMask {
            src_stage: vk::PipelineStageFlags2::TRANSFER,
            src_access: vk::AccessFlags2::TRANSFER_WRITE,
            dst_stage: read_stages,
            dst_access: read_access,
        };

        rec.buffer_barriers(&copies.iter().map(|(dst, _)| BufferBarrierDesc::new(*dst).mask(to_transfer)).collect_vec());
        for (dst, regions) in &copies {
            rec.copy_buffer(upload.buffer(), *dst, regions);
        }
        rec.buffer_barriers(&copies.iter().map(|(dst, _)| BufferBarrierDesc::new(*dst).mask(to_read)).collect_vec());
    }
}

// destroy
impl SceneBuffers {
    pub fn destroy(&self, resources: &mut ResourceManager) {
        for buffer in [self.camera, self.transforms, self.materials, self.draw_commands] {
            resources.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layouts() {
        assert_eq!(size_of::<CameraData>(), 208);
        assert_eq!(size_of::<TransformData>(), 128);
        assert_eq!(size_of::<MaterialData>(), 48);
        assert_eq!(size_of::<DrawCommand>(), size_of::<vk::DrawIndexedIndirectCommand>());
    }

    #[test]
    fn test_index_runs_merge_and_dedup() {
        let runs = index_runs("draw", &[(5, 50u32), (1, 10), (2, 20), (6, 60), (1, 11), (3, 30)], 8);
        assert_eq!(runs, vec![(1, vec![11, 20, 30]), (5, vec![50, 60])]);
        assert!(index_runs::<u32>("draw", &[], 8).is_empty());
    }

    #[test]
    #[should_panic(expected = "scene transform index 8 out of capacity 8")]
    fn test_index_out_of_capacity_panics() {
        index_runs("transform", &[(8, 0u32)], 8);
    }
}
