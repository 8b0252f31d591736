use std::collections::BTreeMap;

use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{
    backend::QueueKind,
    commands::{CommandListHandle, FenceHandle, SemaphoreHandle, gfx_commands::GfxCommands},
    query::{PipelineStatistics, QueryHandle, QueryType, query_manager::QueryManager},
    resources::manager::ResourceManager,
};

use crate::{frame_counter::FrameLabel, upload_buffer::UploadBuffer};

/// 一个 pass 使用的 query
pub struct PassQueries {
    pub name: String,
    pub start: QueryHandle,
    pub end: QueryHandle,
    pub statistics: Option<QueryHandle>,
}

/// 一个 frame slot 在上一次使用时写入的 query
pub struct FrameQueries {
    pub frame_start: QueryHandle,
    pub frame_end: QueryHandle,
    /// key 为 pass 的 order
    pub passes: BTreeMap<u32, PassQueries>,
    /// 写入这些 query 的那一帧；None 表示还没有提交过
    pub submitted_frame: Option<u64>,
}

impl FrameQueries {
    pub fn handles(&self) -> Vec<QueryHandle> {
        std::iter::once(self.frame_start)
            .chain(std::iter::once(self.frame_end))
            .chain(self.passes.values().flat_map(|pass| [Some(pass.start), Some(pass.end), pass.statistics]).flatten())
            .collect_vec()
    }
}

/// 一个 pass 在一帧中的 GPU 耗时
#[derive(Clone, Debug, PartialEq)]
pub struct PassTiming {
    pub name: String,
    /// query 未就绪时为 None
    pub gpu_ns: Option<f64>,
    pub statistics: Option<PipelineStatistics>,
}

/// 某一帧的 GPU 耗时，在同一个 frame slot 下一次使用时读回
#[derive(Clone, Debug, PartialEq)]
pub struct FrameTimings {
    pub frame_id: u64,
    pub frame_label: FrameLabel,
    pub frame_gpu_ns: Option<f64>,
    /// 按照 pass 的执行顺序
    pub passes: Vec<PassTiming>,
}

/// 每个 frames in flight 独占的对象
///
/// fence 是这些对象可以被复用的唯一依据
pub struct FrameSlot {
    label: FrameLabel,

    pub(crate) command_list: CommandListHandle,
    pub(crate) acquire_semaphore: SemaphoreHandle,
    pub(crate) render_complete_semaphore: SemaphoreHandle,
    pub(crate) fence: FenceHandle,

    pub(crate) upload: UploadBuffer,
    pub(crate) queries: FrameQueries,
}

// new & init
impl FrameSlot {
    pub fn new(
        label: FrameLabel,
        resources: &mut ResourceManager,
        commands: &mut GfxCommands,
        queries: &mut QueryManager,
        upload_buffer_size: vk::DeviceSize,
    ) -> Self {
        let command_list = commands.alloc_command_list(QueueKind::Graphics, &format!("frame-{label}"));
        let acquire_semaphore = commands.create_semaphore(&format!("frame-{label}-acquire"));
        let render_complete_semaphore = commands.create_semaphore(&format!("frame-{label}-render-complete"));
        // 第一次使用之前不需要等待
        let fence = commands.create_fence(true, &format!("frame-{label}"));
        let upload = UploadBuffer::new(resources, upload_buffer_size, format!("frame-{label}-upload"));

        let queries = FrameQueries {
            frame_start: queries.create_query(QueryType::Timestamp),
            frame_end: queries.create_query(QueryType::Timestamp),
            passes: BTreeMap::new(),
            submitted_frame: None,
        };

        log::info!("create frame slot {}", label);
        Self {
            label,
            command_list,
            acquire_semaphore,
            render_complete_semaphore,
            fence,
            upload,
            queries,
        }
    }
}

// getters
impl FrameSlot {
    #[inline]
    pub fn label(&self) -> FrameLabel {
        self.label
    }

    #[inline]
    pub fn command_list(&self) -> CommandListHandle {
        self.command_list
    }

    #[inline]
    pub fn fence(&self) -> FenceHandle {
        self.fence
    }

    #[inline]
    pub fn acquire_semaphore(&self) -> SemaphoreHandle {
        self.acquire_semaphore
    }

    #[inline]
    pub fn render_complete_semaphore(&self) -> SemaphoreHandle {
        self.render_complete_semaphore
    }

    #[inline]
    pub fn upload(&self) -> &UploadBuffer {
        &self.upload
    }
}

// tools
impl FrameSlot {
    /// 为 pass 分配 query；已经存在的不会重复分配
    pub fn ensure_pass_queries(&mut self, queries: &mut QueryManager, order: u32, name: &str, statistics: bool) {
        self.queries.passes.entry(order).or_insert_with(|| PassQueries {
            name: name.to_string(),
            start: queries.create_query(QueryType::Timestamp),
            end: queries.create_query(QueryType::Timestamp),
            statistics: statistics.then(|| queries.create_query(QueryType::PipelineStatistics)),
        });
    }

    /// 读回上一次使用时写入的 query，然后在 host 端 reset
    ///
    /// 只能在 fence 等待完成之后调用
    pub fn collect_timings(&mut self, queries: &QueryManager) -> Option<FrameTimings> {
        let frame_id = self.queries.submitted_frame.take()?;
        let handles = self.queries.handles();
        let readback = queries.read_queries(&handles);
        queries.reset_queries_immediate(&handles);

        let period = queries.timestamp_period_ns() as f64;
        let elapsed = |start: QueryHandle, end: QueryHandle| match (readback.is_ready(start), readback.is_ready(end)) {
            (true, true) => {
                let start = readback.scalar(start)?;
                let end = readback.scalar(end)?;
                Some(end.saturating_sub(start) as f64 * period)
            }
            _ => None,
        };

        let passes = self
            .queries
            .passes
            .values()
            .map(|pass| PassTiming {
                name: pass.name.clone(),
                gpu_ns: elapsed(pass.start, pass.end),
                statistics: pass
                    .statistics
                    .filter(|query| readback.is_ready(*query))
                    .and_then(|query| readback.statistics(query)),
            })
            .collect_vec();

        Some(FrameTimings {
            frame_id,
            frame_label: self.label,
            frame_gpu_ns: elapsed(self.queries.frame_start, self.queries.frame_end),
            passes,
        })
    }
}

// destroy
impl FrameSlot {
    /// 调用前 device 需要处于 idle
    pub fn destroy(self, resources: &mut ResourceManager, commands: &mut GfxCommands, queries: &mut QueryManager) {
        for query in self.queries.handles() {
            queries.destroy_query(query);
        }
        self.upload.destroy(resources);
        commands.destroy_fence(self.fence);
        commands.destroy_semaphore(self.acquire_semaphore);
        commands.destroy_semaphore(self.render_complete_semaphore);
        commands.free_command_list(self.command_list);
        log::info!("destroy frame slot {}", self.label);
    }
}
