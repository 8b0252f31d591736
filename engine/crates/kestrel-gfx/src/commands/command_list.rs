use ash::vk;

use crate::{backend::QueueKind, commands::FenceHandle, error::GfxError};

/// command list 的状态
///
/// Initial -> Recording -> Executable -> Pending -> Executable
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandListState {
    Initial,
    Recording,
    Executable,
    /// 已经提交，等待 fence signal
    Pending,
}

impl CommandListState {
    pub fn name(self) -> &'static str {
        match self {
            CommandListState::Initial => "Initial",
            CommandListState::Recording => "Recording",
            CommandListState::Executable => "Executable",
            CommandListState::Pending => "Pending",
        }
    }
}

pub struct GfxCommandList {
    pub(crate) cmd: vk::CommandBuffer,
    pub(crate) pool: vk::CommandPool,
    pub(crate) kind: QueueKind,
    pub(crate) queue_family: u32,

    pub(crate) state: CommandListState,
    pub(crate) pending_fence: Option<FenceHandle>,

    pub(crate) name: String,
}

// getters
impl GfxCommandList {
    #[inline]
    pub fn vk_command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    #[inline]
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    #[inline]
    pub fn state(&self) -> CommandListState {
        self.state
    }

    #[inline]
    pub fn pending_fence(&self) -> Option<FenceHandle> {
        self.pending_fence
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// 状态转换，只修改状态，不调用 GPU API
impl GfxCommandList {
    fn transition(
        &mut self,
        allowed: &[CommandListState],
        expected: &'static str,
        to: CommandListState,
    ) -> Result<(), GfxError> {
        if !allowed.contains(&self.state) {
            return Err(GfxError::InvalidCommandState {
                name: self.name.clone(),
                state: self.state.name(),
                expected,
            });
        }
        self.state = to;
        Ok(())
    }

    pub(crate) fn on_begin(&mut self) -> Result<(), GfxError> {
        self.transition(&[CommandListState::Initial], "Initial", CommandListState::Recording)
    }

    pub(crate) fn on_end(&mut self) -> Result<(), GfxError> {
        self.transition(&[CommandListState::Recording], "Recording", CommandListState::Executable)
    }

    pub(crate) fn on_reset(&mut self) -> Result<(), GfxError> {
        self.transition(
            &[CommandListState::Initial, CommandListState::Executable],
            "Initial or Executable",
            CommandListState::Initial,
        )
    }

    pub(crate) fn on_submit(&mut self, fence: Option<FenceHandle>) -> Result<(), GfxError> {
        self.transition(&[CommandListState::Executable], "Executable", CommandListState::Pending)?;
        self.pending_fence = fence;
        Ok(())
    }

    /// 提交的 fence 已经 signal，或者 device 已经 idle
    pub(crate) fn on_complete(&mut self) {
        if self.state == CommandListState::Pending {
            self.state = CommandListState::Executable;
            self.pending_fence = None;
        }
    }

    pub(crate) fn check_recording(&self) -> Result<(), GfxError> {
        if self.state != CommandListState::Recording {
            return Err(GfxError::InvalidCommandState {
                name: self.name.clone(),
                state: self.state.name(),
                expected: "Recording",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> GfxCommandList {
        GfxCommandList {
            cmd: vk::CommandBuffer::null(),
            pool: vk::CommandPool::null(),
            kind: QueueKind::Graphics,
            queue_family: 0,
            state: CommandListState::Initial,
            pending_fence: None,
            name: "frame-A".to_string(),
        }
    }

    #[test]
    fn test_full_cycle() {
        let mut list = list();
        list.on_begin().unwrap();
        assert_eq!(list.state(), CommandListState::Recording);
        list.on_end().unwrap();
        assert_eq!(list.state(), CommandListState::Executable);
        list.on_submit(None).unwrap();
        assert_eq!(list.state(), CommandListState::Pending);
        list.on_complete();
        assert_eq!(list.state(), CommandListState::Executable);
        list.on_reset().unwrap();
        assert_eq!(list.state(), CommandListState::Initial);
    }

    #[test]
    fn test_out_of_order_calls() {
        let mut list = list();
        assert_eq!(
            list.on_end(),
            Err(GfxError::InvalidCommandState {
                name: "frame-A".to_string(),
                state: "Initial",
                expected: "Recording"
            })
        );
        assert!(list.on_submit(None).is_err());

        list.on_begin().unwrap();
        assert!(list.on_begin().is_err());
        assert!(list.on_reset().is_err());
    }

    #[test]
    fn test_pending_can_not_reset_or_begin() {
        let mut list = list();
        list.on_begin().unwrap();
        list.on_end().unwrap();
        list.on_submit(None).unwrap();

        let err = list.on_reset().unwrap_err();
        assert_eq!(err.to_string(), "command list frame-A is Pending, expected Initial or Executable");
        assert!(list.on_begin().is_err());
        assert!(list.check_recording().is_err());
    }
}
