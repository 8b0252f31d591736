//! Kestrel 的 GFX 层
//!
//! 所有 GPU 对象都通过句柄访问，由各个 manager 显式创建与销毁；
//! 所有对 GPU API 的调用都经过 [`backend::GfxBackend`]。

pub mod backend;
pub mod commands;
pub mod error;
pub mod handle;
pub mod query;
pub mod resources;
pub mod swapchain;

pub use ash::vk;
