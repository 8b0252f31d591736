use std::collections::HashMap;

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{GfxBackendRc, set_object_name},
    commands::recorder::CommandRecorder,
    handle::HandleAllocator,
    query::{PipelineStatistics, QueryCapacities, QueryHandle, QueryType, contiguous_runs},
};

struct QueryPool {
    /// 容量为 0 时为 null
    pool: vk::QueryPool,
    slots: HandleAllocator<()>,
    capacity: u32,
}

/// 一次 readback 的结果
///
/// 未就绪的 query 填入 sentinel：scalar 为 `u64::MAX`，statistics 的每个字段为 `u32::MAX`
#[derive(Default, Debug)]
pub struct QueryReadback {
    scalars: HashMap<QueryHandle, u64>,
    statistics: HashMap<QueryHandle, PipelineStatistics>,
}

impl QueryReadback {
    pub const NOT_READY: u64 = u64::MAX;

    /// timestamp / occlusion 的结果
    #[inline]
    pub fn scalar(&self, query: QueryHandle) -> Option<u64> {
        self.scalars.get(&query).copied()
    }

    #[inline]
    pub fn statistics(&self, query: QueryHandle) -> Option<PipelineStatistics> {
        self.statistics.get(&query).copied()
    }

    /// query 在这次 readback 中存在并且结果已经就绪
    pub fn is_ready(&self, query: QueryHandle) -> bool {
        match query.ty {
            QueryType::PipelineStatistics => self.statistics.get(&query).is_some_and(PipelineStatistics::is_ready),
            _ => self.scalars.get(&query).is_some_and(|value| *value != Self::NOT_READY),
        }
    }
}

/// 管理三种 query pool，提供批量的 reset 与 readback
///
/// 批量操作会先按类型分组，再把 slot 合并为连续区间，每个区间只调用一次 API
pub struct QueryManager {
    backend: GfxBackendRc,
    pools: HashMap<QueryType, QueryPool>,
    timestamp_period_ns: f32,
    destroyed: bool,
}

// new & init
impl QueryManager {
    pub fn new(backend: GfxBackendRc, capacities: &QueryCapacities) -> Self {
        let pools = QueryType::ALL
            .into_iter()
            .map(|ty| {
                let capacity = capacities.get(ty);
                let pool = if capacity == 0 {
                    vk::QueryPool::null()
                } else {
                    let mut info = vk::QueryPoolCreateInfo::default().query_type(ty.vk_query_type()).query_count(capacity);
                    if ty == QueryType::PipelineStatistics {
                        info = info.pipeline_statistics(PipelineStatistics::FLAGS);
                    }
                    let pool = backend.create_query_pool(&info);
                    set_object_name(backend.as_ref(), pool, &format!("query-pool-{ty:?}"));
                    // 新创建的 query 处于未定义状态，使用前必须 reset
                    backend.reset_query_pool(pool, 0, capacity);
                    pool
                };
                log::debug!("create {:?} query pool, capacity: {}", ty, capacity);
                (
                    ty,
                    QueryPool {
                        pool,
                        slots: HandleAllocator::with_capacity(capacity as usize),
                        capacity,
                    },
                )
            })
            .collect();

        Self {
            timestamp_period_ns: backend.limits().timestamp_period,
            backend,
            pools,
            destroyed: false,
        }
    }
}

// getters
impl QueryManager {
    /// 一个 timestamp tick 对应的纳秒数
    #[inline]
    pub fn timestamp_period_ns(&self) -> f32 {
        self.timestamp_period_ns
    }

    #[inline]
    pub fn capacity(&self, ty: QueryType) -> u32 {
        self.pools[&ty].capacity
    }

    #[inline]
    pub fn live_count(&self, ty: QueryType) -> usize {
        self.pools[&ty].slots.len()
    }

    #[inline]
    pub fn vk_pool(&self, ty: QueryType) -> vk::QueryPool {
        self.pools[&ty].pool
    }

    /// query 所在的 pool 以及 slot
    #[track_caller]
    pub fn pool_slot(&self, query: QueryHandle) -> (vk::QueryPool, u32) {
        let pool = &self.pools[&query.ty];
        if !pool.slots.is_valid(query.slot) {
            log::error!("invalid query: {:?}", query);
            panic!("invalid query: {:?}", query);
        }
        (pool.pool, query.slot_id())
    }
}

// create & destroy
impl QueryManager {
    /// pool 中没有空闲的 slot 时 panic
    pub fn create_query(&mut self, ty: QueryType) -> QueryHandle {
        let pool = self.pools.get_mut(&ty).unwrap();
        if pool.slots.len() as u32 >= pool.capacity {
            log::error!("{:?} query pool exhausted, capacity: {}", ty, pool.capacity);
            panic!("{:?} query pool exhausted, capacity: {}", ty, pool.capacity);
        }
        QueryHandle {
            ty,
            slot: pool.slots.alloc(()),
        }
    }

    #[track_caller]
    pub fn destroy_query(&mut self, query: QueryHandle) {
        self.pools.get_mut(&query.ty).unwrap().slots.free(query.slot);
    }
}

// batch operations
impl QueryManager {
    /// 按类型分组，每组内合并为连续区间
    fn runs(&self, queries: &[QueryHandle]) -> Vec<(QueryType, vk::QueryPool, std::ops::Range<u32>)> {
        let groups = queries.iter().copied().into_group_map_by(|query| query.ty);
        groups
            .into_iter()
            .sorted_by_key(|(ty, _)| *ty)
            .flat_map(|(ty, queries)| {
                let ids = queries.iter().map(|query| self.pool_slot(*query).1).collect_vec();
                let pool = self.pools[&ty].pool;
                contiguous_runs(&ids).into_iter().map(move |run| (ty, pool, run))
            })
            .collect()
    }

    /// 在 host 端 reset
    pub fn reset_queries_immediate(&self, queries: &[QueryHandle]) {
        for (_, pool, run) in self.runs(queries) {
            self.backend.reset_query_pool(pool, run.start, run.len() as u32);
        }
    }

    /// 在 command stream 中 reset
    pub fn reset_queries_cmd(&self, recorder: &CommandRecorder<'_>, queries: &[QueryHandle]) {
        for (_, pool, run) in self.runs(queries) {
            recorder.reset_query_range(pool, run.start, run.len() as u32);
        }
    }

    /// 读取 query 的结果，不等待
    ///
    /// 未就绪的区间填入 sentinel，其他错误直接 panic
    pub fn read_queries(&self, queries: &[QueryHandle]) -> QueryReadback {
        let _span = tracy_client::span!("QueryManager::read_queries");

        let by_slot: HashMap<(QueryType, u32), QueryHandle> =
            queries.iter().map(|query| ((query.ty, query.slot_id()), *query)).collect();
        let mut readback = QueryReadback::default();
        for (ty, pool, run) in self.runs(queries) {
            let count = run.len() as u32;
            let stride = match ty {
                QueryType::PipelineStatistics => size_of::<PipelineStatistics>(),
                _ => size_of::<u64>(),
            };
            let mut data = vec![0u8; stride * count as usize];
            let flags = match ty {
                QueryType::PipelineStatistics => vk::QueryResultFlags::empty(),
                _ => vk::QueryResultFlags::TYPE_64,
            };

            let ready = match self.backend.get_query_pool_results(pool, run.start, count, &mut data, stride as u64, flags)
            {
                vk::Result::SUCCESS => true,
                vk::Result::NOT_READY => false,
                result => {
                    log::error!("read {:?} queries [{}, {}) failed: {:?}", ty, run.start, run.end, result);
                    panic!("read {:?} queries [{}, {}) failed: {:?}", ty, run.start, run.end, result);
                }
            };

            let pool_slots = &self.pools[&ty].slots;
            for (i, slot) in run.enumerate() {
                let Some(&query) = by_slot.get(&(ty, slot)) else {
                    continue;
                };
                debug_assert!(pool_slots.is_valid(query.slot));
                let bytes = &data[i * stride..(i + 1) * stride];
                match ty {
                    QueryType::PipelineStatistics => {
                        let value =
                            if ready { bytemuck::pod_read_unaligned(bytes) } else { PipelineStatistics::NOT_READY };
                        readback.statistics.insert(query, value);
                    }
                    _ => {
                        let value =
                            if ready { bytemuck::pod_read_unaligned::<u64>(bytes) } else { QueryReadback::NOT_READY };
                        readback.scalars.insert(query, value);
                    }
                }
            }
        }
        readback
    }
}

// destroy
impl QueryManager {
    pub fn destroy(&mut self) {
        for (ty, pool) in self.pools.drain() {
            if !pool.slots.is_empty() {
                log::warn!("destroy {:?} query pool with {} live queries", ty, pool.slots.len());
            }
            if pool.pool != vk::QueryPool::null() {
                self.backend.destroy_query_pool(pool.pool);
            }
        }
        self.destroyed = true;
    }
}

impl Drop for QueryManager {
    fn drop(&mut self) {
        debug_assert!(self.destroyed || std::thread::panicking(), "QueryManager dropped without destroy()");
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        backend::{
            QueueKind,
            headless::{HeadlessBackend, HeadlessCall, HeadlessConfig},
        },
        commands::gfx_commands::GfxCommands,
        resources::{descriptor::DescriptorQuotas, manager::ResourceManager},
    };

    fn setup(capacities: QueryCapacities) -> (Rc<HeadlessBackend>, QueryManager) {
        kestrel_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let queries = QueryManager::new(backend.clone(), &capacities);
        backend.clear_calls();
        (backend, queries)
    }

    fn reset_calls(backend: &HeadlessBackend) -> Vec<(u32, u32)> {
        backend
            .calls()
            .iter()
            .filter_map(|call| match call {
                HeadlessCall::ResetQueryPool { first, count, .. } => Some((*first, *count)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_reset_coalesces_contiguous_slots() {
        let (backend, mut queries) = setup(QueryCapacities::default());
        let handles = (0..11).map(|_| queries.create_query(QueryType::Timestamp)).collect_vec();
        let picked = [10, 2, 8, 1, 3, 7].map(|i| handles[i]);

        queries.reset_queries_immediate(&picked);
        assert_eq!(reset_calls(&backend), vec![(1, 3), (7, 2), (10, 1)]);
        queries.destroy();
    }

    #[test]
    fn test_reset_groups_by_type() {
        let (backend, mut queries) = setup(QueryCapacities::default());
        let a = queries.create_query(QueryType::Timestamp);
        let b = queries.create_query(QueryType::Occlusion);
        let c = queries.create_query(QueryType::Timestamp);
        queries.reset_queries_immediate(&[b, c, a]);

        let pools = backend
            .calls()
            .iter()
            .filter_map(|call| match call {
                HeadlessCall::ResetQueryPool { pool, first, count } => Some((*pool, *first, *count)),
                _ => None,
            })
            .collect_vec();
        assert_eq!(
            pools,
            vec![
                (queries.vk_pool(QueryType::Timestamp), 0, 2),
                (queries.vk_pool(QueryType::Occlusion), 0, 1)
            ]
        );
        queries.destroy();
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let (_backend, mut queries) = setup(QueryCapacities {
            timestamp: 2,
            ..Default::default()
        });
        let a = queries.create_query(QueryType::Timestamp);
        let _b = queries.create_query(QueryType::Timestamp);
        queries.destroy_query(a);
        let c = queries.create_query(QueryType::Timestamp);
        assert_eq!(c.slot_id(), a.slot_id());
        assert_ne!(c, a);
        assert_eq!(queries.live_count(QueryType::Timestamp), 2);
        queries.destroy();
    }

    #[test]
    #[should_panic(expected = "Occlusion query pool exhausted, capacity: 1")]
    fn test_exhausted_pool_panics() {
        let (_backend, mut queries) = setup(QueryCapacities {
            occlusion: 1,
            ..Default::default()
        });
        queries.create_query(QueryType::Occlusion);
        queries.create_query(QueryType::Occlusion);
    }

    #[test]
    fn test_not_ready_fills_sentinels() {
        let (backend, mut queries) = setup(QueryCapacities::default());
        let timestamp = queries.create_query(QueryType::Timestamp);
        let stats = queries.create_query(QueryType::PipelineStatistics);
        backend.set_queries_ready(false);

        let readback = queries.read_queries(&[timestamp, stats]);
        assert_eq!(readback.scalar(timestamp), Some(u64::MAX));
        assert_eq!(readback.statistics(stats), Some(PipelineStatistics::NOT_READY));
        assert!(!readback.is_ready(timestamp));
        assert!(!readback.is_ready(stats));
        queries.destroy();
    }

    #[test]
    fn test_read_recorded_queries() {
        let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let mut resources = ResourceManager::new(backend.clone(), &DescriptorQuotas::default());
        let mut commands = GfxCommands::new(backend.clone(), 1_000_000_000);
        let mut queries = QueryManager::new(backend.clone(), &QueryCapacities::default());

        let start = queries.create_query(QueryType::Timestamp);
        let end = queries.create_query(QueryType::Timestamp);
        let stats = queries.create_query(QueryType::PipelineStatistics);

        let list = commands.alloc_command_list(QueueKind::Graphics, "profiled");
        commands.begin(list, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        {
            let rec = commands.recorder(list, &resources);
            queries.reset_queries_cmd(&rec, &[start, end, stats]);
            rec.write_timestamp(&queries, start, vk::PipelineStageFlags2::TOP_OF_PIPE);
            rec.begin_query(&queries, stats);
            rec.dispatch(1, 1, 1);
            rec.dispatch(2, 1, 1);
            rec.end_query(&queries, stats);
            rec.write_timestamp(&queries, end, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
        }
        commands.end(list);
        let fence = commands.create_fence(false, "profiled-fence");
        commands.submit(QueueKind::Graphics, &[crate::commands::submit_info::GfxSubmitInfo::new(&[list])], Some(fence));
        commands.wait_fence(fence);

        let readback = queries.read_queries(&[start, end, stats]);
        let elapsed = readback.scalar(end).unwrap() - readback.scalar(start).unwrap();
        assert_eq!(elapsed, 1000);
        assert_eq!(readback.statistics(stats).unwrap().compute_shader_invocations, 2);
        assert!(readback.is_ready(stats));

        // 两个 timestamp 相邻，只读取一次
        let reads = backend
            .calls()
            .iter()
            .filter(|call| matches!(call, HeadlessCall::GetQueryResults { .. }))
            .count();
        assert_eq!(reads, 2);

        queries.destroy();
        commands.destroy();
        resources.destroy();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_read_many_queries_in_any_order() {
        let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let mut resources = ResourceManager::new(backend.clone(), &DescriptorQuotas::default());
        let mut commands = GfxCommands::new(backend.clone(), 1_000_000_000);
        let mut queries = QueryManager::new(backend.clone(), &QueryCapacities::default());

        let all = (0..200).map(|_| queries.create_query(QueryType::Timestamp)).collect_vec();
        // 每 5 个释放一个，slot 之间出现空洞
        let (freed, live): (Vec<_>, Vec<_>) = all.into_iter().enumerate().partition(|(i, _)| i % 5 == 4);
        for (_, query) in freed {
            queries.destroy_query(query);
        }
        let live = live.into_iter().map(|(_, query)| query).collect_vec();
        assert_eq!(live.len(), 160);

        let list = commands.alloc_command_list(QueueKind::Graphics, "many-timestamps");
        commands.begin(list, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        {
            let rec = commands.recorder(list, &resources);
            queries.reset_queries_cmd(&rec, &live);
            for query in &live {
                rec.write_timestamp(&queries, *query, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
            }
        }
        commands.end(list);
        let fence = commands.create_fence(false, "many-timestamps-fence");
        commands.submit(QueueKind::Graphics, &[crate::commands::submit_info::GfxSubmitInfo::new(&[list])], Some(fence));
        commands.wait_fence(fence);

        let shuffled = live.iter().copied().enumerate().sorted_by_key(|(i, _)| (i * 73) % live.len()).collect_vec();
        let handles = shuffled.iter().map(|(_, query)| *query).collect_vec();
        let readback = queries.read_queries(&handles);
        for (i, query) in shuffled {
            assert_eq!(readback.scalar(query), Some((i as u64 + 1) * 1000), "query {i}");
        }

        queries.destroy();
        commands.destroy();
        resources.destroy();
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    #[should_panic(expected = "can not be used here")]
    fn test_timestamp_in_begin_query_panics() {
        let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let resources = ResourceManager::new(backend.clone(), &DescriptorQuotas::default());
        let mut commands = GfxCommands::new(backend.clone(), 1_000_000_000);
        let mut queries = QueryManager::new(backend.clone(), &QueryCapacities::default());
        let timestamp = queries.create_query(QueryType::Timestamp);

        let list = commands.alloc_command_list(QueueKind::Graphics, "bad");
        commands.begin(list, vk::CommandBufferUsageFlags::empty());
        commands.recorder(list, &resources).begin_query(&queries, timestamp);
    }
}
