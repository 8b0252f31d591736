//! Kestrel 的 Frame Pipeline
//!
//! [`renderer::Renderer`] 持有 N 个 [`frame_slot::FrameSlot`]，每帧在其中一个 slot 上
//! 等待 fence、读回 query、acquire、录制 pass、提交并 present。

pub mod frame_counter;
pub mod frame_slot;
pub mod pass;
pub mod passes;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod upload_buffer;
