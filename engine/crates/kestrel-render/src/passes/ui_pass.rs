use std::{cell::RefCell, rc::Rc};

use crate::pass::{PassContext, RenderPass};

/// UI 回调，在 swapchain image 处于 `TRANSFER_DST_OPTIMAL` 时被调用，返回时也需要保持这个 layout
pub type UiCallback = Box<dyn FnMut(&PassContext<'_>)>;

/// 与 renderer 共享的回调槽位，可以在运行期间替换
pub type UiCallbackSlot = Rc<RefCell<Option<UiCallback>>>;

/// 调用外部注册的 UI 回调；没有回调时什么也不录制
pub struct UiPass {
    callback: UiCallbackSlot,
}

impl UiPass {
    pub fn new(callback: UiCallbackSlot) -> Self {
        Self { callback }
    }
}

impl RenderPass for UiPass {
    fn name(&self) -> &str {
        "ui"
    }

    fn process(&mut self, ctx: &PassContext<'_>) {
        if let Some(callback) = self.callback.borrow_mut().as_mut() {
            callback(ctx);
        }
    }
}
