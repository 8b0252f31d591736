use ash::vk;
use itertools::Itertools;

use crate::commands::{CommandListHandle, SemaphoreHandle};

#[derive(Copy, Clone, Debug)]
pub(crate) struct SemaphoreOp {
    pub semaphore: SemaphoreHandle,
    pub stage: vk::PipelineStageFlags2,
    /// binary semaphore 为 None
    pub value: Option<u64>,
}

/// 一次 submit 的描述：若干 command list，以及需要等待和 signal 的 semaphore
///
/// 只记录 handle，在提交时由 [`GfxCommands`](crate::commands::gfx_commands::GfxCommands) 解析为 `vk::SubmitInfo2`
#[derive(Clone, Debug, Default)]
pub struct GfxSubmitInfo {
    pub(crate) command_lists: Vec<CommandListHandle>,
    pub(crate) waits: Vec<SemaphoreOp>,
    pub(crate) signals: Vec<SemaphoreOp>,
}

impl GfxSubmitInfo {
    pub fn new(command_lists: &[CommandListHandle]) -> Self {
        Self {
            command_lists: command_lists.to_vec(),
            waits: vec![],
            signals: vec![],
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: SemaphoreHandle, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.waits.push(SemaphoreOp { semaphore, stage, value });
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: SemaphoreHandle, stage: vk::PipelineStageFlags2, value: Option<u64>) -> Self {
        self.signals.push(SemaphoreOp { semaphore, stage, value });
        self
    }

    #[inline]
    pub fn command_lists(&self) -> &[CommandListHandle] {
        &self.command_lists
    }
}

/// 解析之后的 submit，持有 `vk::SubmitInfo2` 所引用的数组
pub(crate) struct ResolvedSubmit {
    command_buffers: Vec<vk::CommandBufferSubmitInfo<'static>>,
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
}

impl ResolvedSubmit {
    pub fn new(
        command_buffers: &[vk::CommandBuffer],
        waits: &[(vk::Semaphore, vk::PipelineStageFlags2, Option<u64>)],
        signals: &[(vk::Semaphore, vk::PipelineStageFlags2, Option<u64>)],
    ) -> Self {
        let semaphore_info = |(semaphore, stage, value): &(vk::Semaphore, vk::PipelineStageFlags2, Option<u64>)| {
            vk::SemaphoreSubmitInfo::default()
                .semaphore(*semaphore)
                .stage_mask(*stage)
                .value(value.unwrap_or_default())
        };
        Self {
            command_buffers: command_buffers
                .iter()
                .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
                .collect_vec(),
            wait_infos: waits.iter().map(semaphore_info).collect_vec(),
            signal_infos: signals.iter().map(semaphore_info).collect_vec(),
        }
    }

    #[inline]
    pub fn submit_info(&self) -> vk::SubmitInfo2<'_> {
        vk::SubmitInfo2::default()
            .command_buffer_infos(&self.command_buffers)
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
    }
}
