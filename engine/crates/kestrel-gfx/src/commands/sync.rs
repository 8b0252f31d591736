use ash::vk;

/// # Destroy
/// 只能通过 [`GfxCommands::destroy_fence`](crate::commands::gfx_commands::GfxCommands::destroy_fence) 销毁
pub struct GfxFence {
    pub(crate) handle: vk::Fence,
    pub(crate) name: String,
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct GfxSemaphore {
    pub(crate) handle: vk::Semaphore,
    /// timeline semaphore 的初始值；binary semaphore 为 None
    pub(crate) timeline: Option<u64>,
    pub(crate) name: String,
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    #[inline]
    pub fn is_timeline(&self) -> bool {
        self.timeline.is_some()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}
