//! GPU query：timestamp、occlusion 以及 pipeline statistics
//!
//! 每种 query 一个固定容量的 pool，slot 由各自的 [`HandleAllocator`](crate::handle::HandleAllocator) 分配。

pub mod query_manager;

use std::ops::Range;

use ash::vk;
use itertools::Itertools;

use crate::handle::Handle;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryType {
    Timestamp,
    Occlusion,
    PipelineStatistics,
}

impl QueryType {
    pub const ALL: [QueryType; 3] = [QueryType::Timestamp, QueryType::Occlusion, QueryType::PipelineStatistics];

    #[inline]
    pub fn vk_query_type(self) -> vk::QueryType {
        match self {
            QueryType::Timestamp => vk::QueryType::TIMESTAMP,
            QueryType::Occlusion => vk::QueryType::OCCLUSION,
            QueryType::PipelineStatistics => vk::QueryType::PIPELINE_STATISTICS,
        }
    }
}

/// 一个 query：类型 + 在该类型 pool 中的 slot
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHandle {
    pub(crate) ty: QueryType,
    pub(crate) slot: Handle<()>,
}

impl QueryHandle {
    #[inline]
    pub fn ty(&self) -> QueryType {
        self.ty
    }

    /// 在 query pool 中的物理位置
    #[inline]
    pub fn slot_id(&self) -> u32 {
        self.slot.index()
    }
}

/// pipeline statistics query 的结果，字段顺序与统计 bit 的顺序一致
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PipelineStatistics {
    pub vertex_shader_invocations: u32,
    pub geometry_shader_invocations: u32,
    pub fragment_shader_invocations: u32,
    pub tessellation_control_shader_patches: u32,
    pub tessellation_evaluation_shader_invocations: u32,
    pub compute_shader_invocations: u32,
}

impl PipelineStatistics {
    /// 创建 pool 时使用的统计项
    pub const FLAGS: vk::QueryPipelineStatisticFlags = vk::QueryPipelineStatisticFlags::from_raw(
        vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS.as_raw()
            | vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_INVOCATIONS.as_raw()
            | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS.as_raw()
            | vk::QueryPipelineStatisticFlags::TESSELLATION_CONTROL_SHADER_PATCHES.as_raw()
            | vk::QueryPipelineStatisticFlags::TESSELLATION_EVALUATION_SHADER_INVOCATIONS.as_raw()
            | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS.as_raw(),
    );

    /// 结果尚未就绪时填入的值
    pub const NOT_READY: Self = Self {
        vertex_shader_invocations: u32::MAX,
        geometry_shader_invocations: u32::MAX,
        fragment_shader_invocations: u32::MAX,
        tessellation_control_shader_patches: u32::MAX,
        tessellation_evaluation_shader_invocations: u32::MAX,
        compute_shader_invocations: u32::MAX,
    };

    #[inline]
    pub fn is_ready(&self) -> bool {
        *self != Self::NOT_READY
    }
}

/// 每种 query pool 的容量
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueryCapacities {
    pub timestamp: u32,
    pub occlusion: u32,
    pub pipeline_statistics: u32,
}

impl QueryCapacities {
    #[inline]
    pub fn get(&self, ty: QueryType) -> u32 {
        match ty {
            QueryType::Timestamp => self.timestamp,
            QueryType::Occlusion => self.occlusion,
            QueryType::PipelineStatistics => self.pipeline_statistics,
        }
    }
}

impl Default for QueryCapacities {
    fn default() -> Self {
        Self {
            timestamp: 256,
            occlusion: 32,
            pipeline_statistics: 32,
        }
    }
}

/// 将一组 slot id 合并为尽量少的连续区间
///
/// 输入可以乱序、可以重复；输出的区间按起点升序，互不相交也不相邻
pub fn contiguous_runs(ids: &[u32]) -> Vec<Range<u32>> {
    let mut runs: Vec<Range<u32>> = Vec::new();
    for id in ids.iter().copied().sorted_unstable().dedup() {
        match runs.last_mut() {
            Some(run) if run.end == id => run.end += 1,
            _ => runs.push(id..id + 1),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_runs() {
        assert_eq!(contiguous_runs(&[1, 2, 3, 7, 8, 10]), vec![1..4, 7..9, 10..11]);
        assert_eq!(contiguous_runs(&[10, 8, 2, 7, 3, 1]), vec![1..4, 7..9, 10..11]);
        assert_eq!(contiguous_runs(&[]), Vec::<Range<u32>>::new());
        assert_eq!(contiguous_runs(&[5]), vec![5..6]);
        assert_eq!(contiguous_runs(&[4, 4, 5, 5]), vec![4..6]);
    }

    #[test]
    fn test_runs_cover_input_exactly() {
        let ids = [0u32, 31, 2, 3, 4, 30, 17, 16, 1, 29];
        let runs = contiguous_runs(&ids);

        let covered = runs.iter().flat_map(|run| run.clone()).collect_vec();
        assert_eq!(covered, ids.iter().copied().sorted().collect_vec());
        // 相邻的区间之间至少隔一个 id
        for (a, b) in runs.iter().tuple_windows() {
            assert!(a.end < b.start);
        }
        assert_eq!(runs.len(), 4);
    }

    #[test]
    fn test_statistics_layout() {
        assert_eq!(std::mem::size_of::<PipelineStatistics>(), 24);
        assert_eq!(PipelineStatistics::FLAGS.as_raw().count_ones(), 6);
        assert!(!PipelineStatistics::NOT_READY.is_ready());
        assert!(PipelineStatistics::default().is_ready());
    }
}
