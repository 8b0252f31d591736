//! 内置的 pass
//!
//! - [`clear_pass::ClearPass`]：order 0，清空 swapchain image
//! - [`ui_pass::UiPass`]：order 900，调用外部注册的 UI 回调
//! - [`present_transition_pass::PresentTransitionPass`]：order 1000，转换到 present layout
//! - [`compute_cull_pass::ComputeCullPass`]：可选，由应用通过 `add_pass` 注册

pub mod clear_pass;
pub mod compute_cull_pass;
pub mod present_transition_pass;
pub mod ui_pass;

pub const CLEAR_PASS_ORDER: u32 = 0;
pub const UI_PASS_ORDER: u32 = 900;
pub const PRESENT_TRANSITION_PASS_ORDER: u32 = 1000;
