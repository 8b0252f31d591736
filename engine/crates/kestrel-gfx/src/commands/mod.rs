pub mod barrier;
pub mod command_list;
pub mod gfx_commands;
pub mod recorder;
pub mod submit_info;
pub mod sync;

use crate::handle::Handle;

pub type CommandListHandle = Handle<command_list::GfxCommandList>;
pub type FenceHandle = Handle<sync::GfxFence>;
pub type SemaphoreHandle = Handle<sync::GfxSemaphore>;
