use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use ash::vk;
use itertools::Itertools;
use kestrel_gfx::{
    backend::{GfxBackendRc, QueueKind},
    commands::{gfx_commands::GfxCommands, submit_info::GfxSubmitInfo},
    query::query_manager::QueryManager,
    resources::manager::ResourceManager,
    swapchain::render_swapchain::{AcquireOutcome, RenderSwapchain},
};

use crate::{
    frame_counter::FrameCounter,
    frame_slot::{FrameSlot, FrameTimings},
    pass::{PassContext, PassInitContext, RenderPass},
    passes::{
        CLEAR_PASS_ORDER, PRESENT_TRANSITION_PASS_ORDER, UI_PASS_ORDER,
        clear_pass::ClearPass,
        present_transition_pass::PresentTransitionPass,
        ui_pass::{UiCallbackSlot, UiPass},
    },
    scene::{SceneBuffers, SceneChanges},
    settings::RendererSettings,
};

/// 一次 `render_frame` 的结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// swapchain 过期，这一帧没有录制也没有提交，需要先 resize
    Skipped,
}

const PASS_LABEL_COLOR: [f32; 4] = [0.8, 0.5, 0.2, 1.0];

/// Frame Pipeline 的入口
///
/// 持有所有 manager、swapchain、frame slot 与 pass，每帧按照固定的步骤录制并提交一个 command list
pub struct Renderer {
    settings: RendererSettings,

    resources: ResourceManager,
    commands: GfxCommands,
    queries: QueryManager,
    swapchain: RenderSwapchain,

    frame_counter: FrameCounter,
    slots: Vec<FrameSlot>,
    scene: SceneBuffers,

    /// key 为执行顺序
    passes: BTreeMap<u32, Box<dyn RenderPass>>,
    ui_callback: UiCallbackSlot,

    resize_requested: bool,
    last_timings: Option<FrameTimings>,
    destroyed: bool,
}

// new & init
impl Renderer {
    pub fn new(backend: GfxBackendRc, settings: RendererSettings) -> Self {
        let _span = tracy_client::span!("Renderer::new");

        let mut resources = ResourceManager::new(backend.clone(), &(&settings.descriptors).into());
        let mut commands = GfxCommands::new(backend.clone(), settings.fence_timeout_ns);
        let mut queries = QueryManager::new(backend.clone(), &(&settings.queries).into());
        let swapchain = RenderSwapchain::new(backend, &mut resources, &settings.swapchain_desc());

        let frame_counter = FrameCounter::new(0, settings.frames_in_flight);
        let slots = frame_counter
            .frame_labels()
            .into_iter()
            .map(|label| FrameSlot::new(label, &mut resources, &mut commands, &mut queries, settings.upload_buffer_size))
            .collect_vec();
        let scene = SceneBuffers::new(&mut resources, &settings.scene);

        log::info!(
            "renderer created: {} frames in flight, extent {}x{}",
            settings.frames_in_flight,
            swapchain.extent().width,
            swapchain.extent().height
        );

        let mut renderer = Self {
            settings,
            resources,
            commands,
            queries,
            swapchain,
            frame_counter,
            slots,
            scene,
            passes: BTreeMap::new(),
            ui_callback: Rc::new(RefCell::new(None)),
            resize_requested: false,
            last_timings: None,
            destroyed: false,
        };

        renderer.add_pass(CLEAR_PASS_ORDER, Box::new(ClearPass::default()));
        renderer.add_pass(UI_PASS_ORDER, Box::new(UiPass::new(renderer.ui_callback.clone())));
        renderer.add_pass(PRESENT_TRANSITION_PASS_ORDER, Box::new(PresentTransitionPass));
        renderer
    }

    /// 注册 pass 并立即调用 `init`；order 不能重复
    pub fn add_pass(&mut self, order: u32, mut pass: Box<dyn RenderPass>) {
        if let Some(existing) = self.passes.get(&order) {
            log::error!("render pass order {} is already used by `{}`", order, existing.name());
            panic!("render pass order {} is already used by `{}`", order, existing.name());
        }

        pass.init(&mut PassInitContext {
            resources: &mut self.resources,
            commands: &mut self.commands,
            queries: &mut self.queries,
            settings: &self.settings,
            scene: &self.scene,
            frame_extent: self.swapchain.extent(),
            swapchain_format: self.swapchain.format(),
        });
        log::info!("add render pass `{}` at order {}", pass.name(), order);
        self.passes.insert(order, pass);
    }

    /// UI 回调在 [`UiPass`] 中每帧调用一次
    pub fn set_ui_callback(&mut self, callback: impl FnMut(&PassContext<'_>) + 'static) {
        *self.ui_callback.borrow_mut() = Some(Box::new(callback));
    }

    pub fn clear_ui_callback(&mut self) {
        self.ui_callback.borrow_mut().take();
    }
}

// getters
impl Renderer {
    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// 同时借出资源与命令层，用于初始化阶段的同步上传
    #[inline]
    pub fn gfx_mut(&mut self) -> (&mut ResourceManager, &mut GfxCommands) {
        (&mut self.resources, &mut self.commands)
    }

    #[inline]
    pub fn commands(&self) -> &GfxCommands {
        &self.commands
    }

    #[inline]
    pub fn swapchain(&self) -> &RenderSwapchain {
        &self.swapchain
    }

    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn frame_slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    #[inline]
    pub fn scene(&self) -> &SceneBuffers {
        &self.scene
    }

    #[inline]
    pub fn frame_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// 按照执行顺序排列的 pass 名字
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.values().map(|pass| pass.name()).collect()
    }

    /// acquire 或 present 返回了 out of date / suboptimal
    #[inline]
    pub fn need_resize(&self) -> bool {
        self.resize_requested
    }

    /// 最近一次读回的 GPU 耗时，比提交晚 frames in flight 帧
    #[inline]
    pub fn last_timings(&self) -> Option<&FrameTimings> {
        self.last_timings.as_ref()
    }
}

// update
impl Renderer {
    pub fn render_frame(&mut self, changes: &SceneChanges) -> FrameOutcome {
        let _span = tracy_client::span!("Renderer::render_frame");

        let frame_id = self.frame_counter.frame_id();
        let frame_label = self.frame_counter.frame_label();
        let slot = &mut self.slots[*frame_label];

        // 1. 等待这个 slot 上一次的提交完成
        {
            let _span = tracy_client::span!("wait frame fence");
            self.commands.wait_fence(slot.fence);
        }

        // 2. fence 已经证明 query 写入完成，可以读回
        if let Some(timings) = slot.collect_timings(&self.queries) {
            log::debug!(
                "frame {} gpu time: {:?} ns",
                timings.frame_id,
                timings.frame_gpu_ns
            );
            self.last_timings = Some(timings);
        }

        // 3. acquire；out of date 时跳过这一帧，fence 保持 signal 状态
        let image_index = match self.swapchain.acquire(
            &self.commands,
            slot.acquire_semaphore,
            self.settings.fence_timeout_ns,
        ) {
            AcquireOutcome::OutOfDate => {
                log::warn!("skip frame {}: swapchain out of date", self.frame_counter.frame_name());
                self.resize_requested = true;
                return FrameOutcome::Skipped;
            }
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                self.resize_requested |= suboptimal;
                image_index
            }
        };
        let swapchain_image = self.swapchain.image(image_index);

        // 4. 之后这个 slot 的对象都可以复用
        self.commands.reset_fence(slot.fence);
        self.commands.reset(slot.command_list);
        self.commands.begin(slot.command_list, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        for (order, pass) in &self.passes {
            slot.ensure_pass_queries(&mut self.queries, *order, pass.name(), pass.pipeline_statistics());
        }

        {
            let rec = self.commands.recorder(slot.command_list, &self.resources);

            // 5. reset 上一次使用的 query
            let query_handles = slot.queries.handles();
            self.queries.reset_queries_cmd(&rec, &query_handles);
            rec.write_timestamp(&self.queries, slot.queries.frame_start, vk::PipelineStageFlags2::TOP_OF_PIPE);

            // 6. 场景上传
            slot.upload.reset();
            self.scene.upload(&rec, &mut slot.upload, changes);

            // 7. 按顺序执行 pass
            let ctx = PassContext {
                recorder: &rec,
                resources: &self.resources,
                scene: &self.scene,
                frame_id,
                frame_label,
                frame_extent: self.swapchain.extent(),
                swapchain_image,
            };
            for (order, pass) in self.passes.iter_mut() {
                let _span = tracy_client::span!("record pass");
                let pass_queries = &slot.queries.passes[order];

                rec.begin_label(pass.name(), PASS_LABEL_COLOR);
                rec.write_timestamp(&self.queries, pass_queries.start, vk::PipelineStageFlags2::TOP_OF_PIPE);
                if let Some(statistics) = pass_queries.statistics {
                    rec.begin_query(&self.queries, statistics);
                }

                pass.process(&ctx);

                if let Some(statistics) = pass_queries.statistics {
                    rec.end_query(&self.queries, statistics);
                }
                rec.write_timestamp(&self.queries, pass_queries.end, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
                rec.end_label();
            }

            // 8. frame end
            rec.write_timestamp(&self.queries, slot.queries.frame_end, vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
        }
        self.commands.end(slot.command_list);

        let submit_info = GfxSubmitInfo::new(&[slot.command_list])
            .wait(
                slot.acquire_semaphore,
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags2::ALL_TRANSFER,
                None,
            )
            .signal(slot.render_complete_semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, None);
        self.commands.submit(QueueKind::Graphics, &[submit_info], Some(slot.fence));
        slot.queries.submitted_frame = Some(frame_id);

        // 9. present，然后切换到下一个 slot
        let present = self.swapchain.present(&self.commands, image_index, slot.render_complete_semaphore);
        self.resize_requested |= present.need_recreate();

        self.frame_counter.next_frame();
        tracy_client::frame_mark();
        FrameOutcome::Presented { image_index }
    }

    /// 重建 swapchain，然后通知所有 pass
    ///
    /// extent 为 0 时（例如窗口最小化）什么也不做
    pub fn resize(&mut self, extent: vk::Extent2D) {
        let _span = tracy_client::span!("Renderer::resize");
        if extent.width == 0 || extent.height == 0 {
            log::warn!("ignore resize to empty extent {}x{}", extent.width, extent.height);
            return;
        }

        self.commands.device_wait_idle();
        self.swapchain.recreate(&mut self.resources, extent);

        let mut ctx = PassInitContext {
            resources: &mut self.resources,
            commands: &mut self.commands,
            queries: &mut self.queries,
            settings: &self.settings,
            scene: &self.scene,
            frame_extent: self.swapchain.extent(),
            swapchain_format: self.swapchain.format(),
        };
        for pass in self.passes.values_mut() {
            pass.resize(&mut ctx);
        }
        self.resize_requested = false;
    }
}

// destroy
impl Renderer {
    /// 1. device idle
    /// 2. 逆序销毁 pass
    /// 3. swapchain image、frame slot、scene buffer、query
    /// 4. 命令层
    /// 5. 资源管理器
    pub fn destroy(&mut self) {
        let _span = tracy_client::span!("Renderer::destroy");
        self.commands.device_wait_idle();

        let passes = std::mem::take(&mut self.passes);
        let mut ctx = PassInitContext {
            resources: &mut self.resources,
            commands: &mut self.commands,
            queries: &mut self.queries,
            settings: &self.settings,
            scene: &self.scene,
            frame_extent: self.swapchain.extent(),
            swapchain_format: self.swapchain.format(),
        };
        for (_, mut pass) in passes.into_iter().rev() {
            pass.destroy(&mut ctx);
        }
        self.ui_callback.borrow_mut().take();

        self.swapchain.destroy(&mut self.resources);
        for slot in self.slots.drain(..) {
            slot.destroy(&mut self.resources, &mut self.commands, &mut self.queries);
        }
        self.scene.destroy(&mut self.resources);
        self.queries.destroy();

        self.commands.destroy();
        self.resources.destroy();

        self.destroyed = true;
        log::info!("renderer destroyed");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        debug_assert!(self.destroyed || std::thread::panicking(), "Renderer dropped without destroy()");
    }
}
