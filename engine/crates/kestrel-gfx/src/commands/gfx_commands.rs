use std::collections::HashMap;

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{GfxBackend, GfxBackendRc, GfxQueueFamilies, QueueKind, set_object_name},
    commands::{
        CommandListHandle, FenceHandle, SemaphoreHandle,
        command_list::{CommandListState, GfxCommandList},
        recorder::CommandRecorder,
        submit_info::{GfxSubmitInfo, ResolvedSubmit, SemaphoreOp},
        sync::{GfxFence, GfxSemaphore},
    },
    error::{GfxError, GfxResultExt},
    handle::HandleAllocator,
    resources::manager::ResourceManager,
};

/// command list、queue 以及同步对象的管理者
///
/// 每个不同的 queue family 创建一个 command pool，alias 到同一个 family 的队列共享 pool。
pub struct GfxCommands {
    backend: GfxBackendRc,
    families: GfxQueueFamilies,
    /// queue family -> command pool
    pools: HashMap<u32, vk::CommandPool>,

    lists: HandleAllocator<GfxCommandList>,
    fences: HandleAllocator<GfxFence>,
    semaphores: HandleAllocator<GfxSemaphore>,

    /// 等待 fence 的超时时间，超时视为设备丢失
    fence_timeout_ns: u64,
    destroyed: bool,
}

// new & init
impl GfxCommands {
    pub fn new(backend: GfxBackendRc, fence_timeout_ns: u64) -> Self {
        let _span = tracy_client::span!("GfxCommands::new");

        let families = backend.queue_families();
        let mut pools = HashMap::new();
        for kind in QueueKind::ALL {
            let family = families.get(kind).family;
            pools.entry(family).or_insert_with(|| {
                let pool = backend.create_command_pool(family);
                set_object_name(backend.as_ref(), pool, &format!("command-pool-family{family}"));
                pool
            });
        }
        log::info!(
            "create {} command pools for queue families: graphics {}, compute {}, transfer {}",
            pools.len(),
            families.graphics.family,
            families.compute.family,
            families.transfer.family
        );

        Self {
            backend,
            families,
            pools,
            lists: HandleAllocator::new(),
            fences: HandleAllocator::new(),
            semaphores: HandleAllocator::new(),
            fence_timeout_ns,
            destroyed: false,
        }
    }
}

// getters
impl GfxCommands {
    #[inline]
    pub fn backend(&self) -> &dyn GfxBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn queue_families(&self) -> GfxQueueFamilies {
        self.families
    }

    #[inline]
    pub fn command_pool(&self, kind: QueueKind) -> vk::CommandPool {
        self.pools[&self.families.get(kind).family]
    }

    /// 不同 queue family 的数量，也就是 command pool 的数量
    #[inline]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    #[inline]
    #[track_caller]
    pub fn get_command_list(&self, handle: CommandListHandle) -> &GfxCommandList {
        self.lists.get(handle)
    }

    #[inline]
    #[track_caller]
    pub fn list_state(&self, handle: CommandListHandle) -> CommandListState {
        self.lists.get(handle).state()
    }

    #[inline]
    #[track_caller]
    pub fn vk_fence(&self, handle: FenceHandle) -> vk::Fence {
        self.fences.get(handle).handle()
    }

    #[inline]
    #[track_caller]
    pub fn vk_semaphore(&self, handle: SemaphoreHandle) -> vk::Semaphore {
        self.semaphores.get(handle).handle()
    }
}

// command list
impl GfxCommands {
    pub fn alloc_command_list(&mut self, kind: QueueKind, name: &str) -> CommandListHandle {
        let queue_family = self.families.get(kind).family;
        let pool = self.pools[&queue_family];
        let cmd = self.backend.allocate_command_buffer(pool);
        set_object_name(self.backend.as_ref(), cmd, name);
        log::debug!("alloc command list `{}` on {:?} queue", name, kind);

        self.lists.alloc(GfxCommandList {
            cmd,
            pool,
            kind,
            queue_family,
            state: CommandListState::Initial,
            pending_fence: None,
            name: name.to_string(),
        })
    }

    #[track_caller]
    pub fn free_command_list(&mut self, handle: CommandListHandle) {
        let list = self.lists.get(handle);
        if list.state == CommandListState::Pending {
            Err::<(), _>(GfxError::InvalidCommandState {
                name: list.name.clone(),
                state: list.state.name(),
                expected: "not Pending",
            })
            .or_fatal("free command list");
        }
        log::debug!("free command list `{}`", list.name);
        self.backend.free_command_buffer(list.pool, list.cmd);
        self.lists.free(handle);
    }

    /// 开始录制，同时打开一个以 list 名字命名的 debug label
    #[track_caller]
    pub fn begin(&mut self, handle: CommandListHandle, usage: vk::CommandBufferUsageFlags) {
        let list = self.lists.get_mut(handle);
        list.on_begin().or_fatal("begin command list");
        self.backend.begin_command_buffer(list.cmd, usage);
        self.backend.cmd_begin_label(list.cmd, &list.name, [0.4, 0.6, 0.9, 1.0]);
    }

    #[track_caller]
    pub fn end(&mut self, handle: CommandListHandle) {
        let list = self.lists.get_mut(handle);
        list.on_end().or_fatal("end command list");
        self.backend.cmd_end_label(list.cmd);
        self.backend.end_command_buffer(list.cmd);
    }

    /// 将 command list 重置为 Initial，Pending 状态下调用是错误
    #[track_caller]
    pub fn reset(&mut self, handle: CommandListHandle) {
        let list = self.lists.get_mut(handle);
        list.on_reset().or_fatal("reset command list");
        self.backend.reset_command_buffer(list.cmd);
    }

    /// 借出一个 recorder，command list 必须处于 Recording 状态
    #[track_caller]
    pub fn recorder<'a>(&'a self, handle: CommandListHandle, resources: &'a ResourceManager) -> CommandRecorder<'a> {
        let list = self.lists.get(handle);
        list.check_recording().or_fatal("record command list");
        CommandRecorder {
            backend: self.backend.as_ref(),
            resources,
            cmd: list.cmd,
            name: &list.name,
        }
    }
}

// submit
impl GfxCommands {
    /// 提交到 `kind` 对应的 queue
    ///
    /// 所有 command list 必须处于 Executable 并且属于该 queue 的 family；
    /// 提交之后它们处于 Pending，直到 `fence` 被 [`GfxCommands::wait_fence`] 观察到 signal
    #[track_caller]
    pub fn submit(&mut self, kind: QueueKind, submits: &[GfxSubmitInfo], fence: Option<FenceHandle>) {
        let _span = tracy_client::span!("GfxCommands::submit");
        let queue = self.families.get(kind);

        for handle in submits.iter().flat_map(|submit| submit.command_lists.iter()) {
            let list = self.lists.get_mut(*handle);
            if list.queue_family != queue.family {
                Err::<(), _>(GfxError::WrongQueueFamily {
                    name: list.name.clone(),
                    list_family: list.queue_family,
                    queue_family: queue.family,
                })
                .or_fatal("submit");
            }
            list.on_submit(fence).or_fatal("submit");
        }

        let resolve_ops = |ops: &[SemaphoreOp]| {
            ops.iter().map(|op| (self.semaphores.get(op.semaphore).handle, op.stage, op.value)).collect_vec()
        };
        let resolved = submits
            .iter()
            .map(|submit| {
                let command_buffers =
                    submit.command_lists.iter().map(|handle| self.lists.get(*handle).cmd).collect_vec();
                ResolvedSubmit::new(&command_buffers, &resolve_ops(&submit.waits), &resolve_ops(&submit.signals))
            })
            .collect_vec();
        let submit_infos = resolved.iter().map(ResolvedSubmit::submit_info).collect_vec();

        let vk_fence = fence.map_or(vk::Fence::null(), |fence| self.fences.get(fence).handle);
        self.backend.queue_submit(queue.queue, &submit_infos, vk_fence);
    }

    /// 同步提交：录制、提交、等待完成，然后释放临时的 command list 与 fence
    ///
    /// 这是唯一会阻塞等待 GPU 的提交方式，只用于初始化阶段的上传等操作
    pub fn one_time_submit<R>(
        &mut self,
        resources: &ResourceManager,
        name: &str,
        record: impl FnOnce(&CommandRecorder<'_>) -> R,
    ) -> R {
        let _span = tracy_client::span!("GfxCommands::one_time_submit");

        let list = self.alloc_command_list(QueueKind::Graphics, name);
        self.begin(list, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = record(&self.recorder(list, resources));
        self.end(list);

        let fence = self.create_fence(false, &format!("{name}-fence"));
        self.submit(QueueKind::Graphics, &[GfxSubmitInfo::new(&[list])], Some(fence));
        self.wait_fence(fence);

        self.destroy_fence(fence);
        self.free_command_list(list);
        result
    }
}

// fence & semaphore
impl GfxCommands {
    pub fn create_fence(&mut self, signaled: bool, name: &str) -> FenceHandle {
        let fence = self.backend.create_fence(signaled);
        set_object_name(self.backend.as_ref(), fence, name);
        log::debug!("create fence `{}`, signaled: {}", name, signaled);
        self.fences.alloc(GfxFence {
            handle: fence,
            name: name.to_string(),
        })
    }

    /// 阻塞等待 fence signal；成功之后，所有以该 fence 提交的 command list 回到 Executable
    ///
    /// 超时视为设备丢失，直接 panic
    #[track_caller]
    pub fn wait_fence(&mut self, handle: FenceHandle) {
        let _span = tracy_client::span!("GfxCommands::wait_fence");

        let fence = self.fences.get(handle);
        match self.backend.wait_fence(fence.handle, self.fence_timeout_ns) {
            vk::Result::SUCCESS => {}
            result => {
                log::error!("wait fence `{}` failed: {:?} (timeout {}ns)", fence.name, result, self.fence_timeout_ns);
                panic!("wait fence `{}` failed: {:?} (timeout {}ns)", fence.name, result, self.fence_timeout_ns);
            }
        }

        for list_handle in self.lists.valid_handles() {
            let list = self.lists.get_mut(list_handle);
            if list.pending_fence == Some(handle) {
                list.on_complete();
            }
        }
    }

    #[track_caller]
    pub fn reset_fence(&mut self, handle: FenceHandle) {
        self.backend.reset_fence(self.fences.get(handle).handle);
    }

    #[track_caller]
    pub fn destroy_fence(&mut self, handle: FenceHandle) {
        let fence = self.fences.get(handle);
        if let Some((_, list)) = self.lists.iter().find(|(_, list)| list.pending_fence == Some(handle)) {
            log::error!("destroy fence `{}` while command list `{}` is pending on it", fence.name, list.name);
            panic!("destroy fence `{}` while command list `{}` is pending on it", fence.name, list.name);
        }
        let fence = self.fences.take(handle);
        log::debug!("destroy fence `{}`", fence.name);
        self.backend.destroy_fence(fence.handle);
    }

    pub fn create_semaphore(&mut self, name: &str) -> SemaphoreHandle {
        self.alloc_semaphore(None, name)
    }

    pub fn create_timeline_semaphore(&mut self, initial_value: u64, name: &str) -> SemaphoreHandle {
        self.alloc_semaphore(Some(initial_value), name)
    }

    fn alloc_semaphore(&mut self, timeline: Option<u64>, name: &str) -> SemaphoreHandle {
        let semaphore = self.backend.create_semaphore(timeline);
        set_object_name(self.backend.as_ref(), semaphore, name);
        log::debug!("create semaphore `{}`, timeline: {:?}", name, timeline);
        self.semaphores.alloc(GfxSemaphore {
            handle: semaphore,
            timeline,
            name: name.to_string(),
        })
    }

    #[track_caller]
    pub fn destroy_semaphore(&mut self, handle: SemaphoreHandle) {
        let semaphore = self.semaphores.take(handle);
        log::debug!("destroy semaphore `{}`", semaphore.name);
        self.backend.destroy_semaphore(semaphore.handle);
    }

    /// 等待 device idle，之后所有 Pending 的 command list 回到 Executable
    pub fn device_wait_idle(&mut self) {
        let _span = tracy_client::span!("GfxCommands::device_wait_idle");
        self.backend.device_wait_idle();
        for handle in self.lists.valid_handles() {
            self.lists.get_mut(handle).on_complete();
        }
    }
}

// destroy
impl GfxCommands {
    pub fn destroy(&mut self) {
        let _span = tracy_client::span!("GfxCommands::destroy");
        self.device_wait_idle();

        for handle in self.lists.valid_handles() {
            self.free_command_list(handle);
        }
        for handle in self.fences.valid_handles() {
            self.destroy_fence(handle);
        }
        for handle in self.semaphores.valid_handles() {
            self.destroy_semaphore(handle);
        }
        for (_, pool) in self.pools.drain() {
            self.backend.destroy_command_pool(pool);
        }
        self.destroyed = true;
    }
}

impl Drop for GfxCommands {
    fn drop(&mut self) {
        debug_assert!(self.destroyed || std::thread::panicking(), "GfxCommands dropped without destroy()");
    }
}
