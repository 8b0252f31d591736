use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{GfxBackendRc, QueueKind, SwapchainDesc, set_object_name},
    commands::{SemaphoreHandle, gfx_commands::GfxCommands},
    resources::{ImageHandle, image::ImageDesc, manager::ResourceManager},
};

/// acquire 的结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `suboptimal` 为 true 时仍然可以渲染，但应当在之后重建 swapchain
    Acquired { image_index: u32, suboptimal: bool },
    /// 没有拿到 image，semaphore 也不会被 signal
    OutOfDate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    #[inline]
    pub fn need_recreate(self) -> bool {
        self != PresentOutcome::Presented
    }
}

/// 对 backend swapchain 的封装
///
/// swapchain image 以 borrowed image 的形式注册到 [`ResourceManager`]，
/// 销毁 handle 时只会销毁本地创建的 view。
pub struct RenderSwapchain {
    backend: GfxBackendRc,
    swapchain: vk::SwapchainKHR,
    desc: SwapchainDesc,
    images: Vec<ImageHandle>,
}

// new & init
impl RenderSwapchain {
    pub fn new(backend: GfxBackendRc, resources: &mut ResourceManager, desc: &SwapchainDesc) -> Self {
        let mut desc = SwapchainDesc {
            old_swapchain: vk::SwapchainKHR::null(),
            ..*desc
        };
        let (swapchain, extent) = backend.create_swapchain(&desc);
        desc.extent = extent;
        set_object_name(backend.as_ref(), swapchain, "main");
        log::info!(
            "create swapchain: extent {}x{}, format {:?}, present mode {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.present_mode
        );

        let mut render_swapchain = Self {
            backend,
            swapchain,
            desc,
            images: vec![],
        };
        render_swapchain.register_images(resources);
        render_swapchain
    }

    fn register_images(&mut self, resources: &mut ResourceManager) {
        self.images = self
            .backend
            .swapchain_images(self.swapchain)
            .into_iter()
            .enumerate()
            .map(|(i, image)| {
                let desc = ImageDesc::new_2d(
                    self.desc.extent.width,
                    self.desc.extent.height,
                    self.desc.format,
                    self.desc.usage,
                    format!("swapchain-{i}"),
                );
                resources.create_image_borrowed(image, None, &desc)
            })
            .collect_vec();
        log::info!("swapchain has {} images", self.images.len());
    }
}

// getters
impl RenderSwapchain {
    #[inline]
    pub fn image(&self, image_index: u32) -> ImageHandle {
        self.images[image_index as usize]
    }

    #[inline]
    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn vk_swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

// update
impl RenderSwapchain {
    /// timeout: nano seconds
    ///
    /// 超时以及 out of date 以外的错误都会 panic
    pub fn acquire(&self, commands: &GfxCommands, semaphore: SemaphoreHandle, timeout_ns: u64) -> AcquireOutcome {
        let _span = tracy_client::span!("RenderSwapchain::acquire");
        match self.backend.acquire_next_image(self.swapchain, timeout_ns, commands.vk_semaphore(semaphore)) {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", image_index);
                }
                AcquireOutcome::Acquired { image_index, suboptimal }
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                AcquireOutcome::OutOfDate
            }
            Err(e) => {
                log::error!("failed to acquire next swapchain image: {:?}", e);
                panic!("failed to acquire next swapchain image: {:?}", e);
            }
        }
    }

    /// 在 graphics queue 上 present，等待 `wait_semaphore`
    pub fn present(&self, commands: &GfxCommands, image_index: u32, wait_semaphore: SemaphoreHandle) -> PresentOutcome {
        let _span = tracy_client::span!("RenderSwapchain::present");
        let queue = commands.queue_families().get(QueueKind::Graphics).queue;
        match self.backend.queue_present(queue, self.swapchain, image_index, commands.vk_semaphore(wait_semaphore)) {
            Ok(false) => PresentOutcome::Presented,
            Ok(true) => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                PresentOutcome::Suboptimal
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                PresentOutcome::OutOfDate
            }
            Err(e) => {
                log::error!("failed to present swapchain image: {:?}", e);
                panic!("failed to present swapchain image: {:?}", e);
            }
        }
    }

    /// 以新的 extent 重建 swapchain，旧的 image handle 全部失效
    pub fn recreate(&mut self, resources: &mut ResourceManager, extent: vk::Extent2D) {
        let _span = tracy_client::span!("RenderSwapchain::recreate");
        log::warn!(
            "recreate swapchain: {}x{} -> {}x{}",
            self.desc.extent.width,
            self.desc.extent.height,
            extent.width,
            extent.height
        );
        self.backend.device_wait_idle();
        self.destroy_images(resources);

        let old_swapchain = self.swapchain;
        self.desc = SwapchainDesc {
            extent,
            old_swapchain,
            ..self.desc
        };
        let (swapchain, actual_extent) = self.backend.create_swapchain(&self.desc);
        if actual_extent != extent {
            log::info!(
                "surface clamped swapchain extent {}x{} -> {}x{}",
                extent.width,
                extent.height,
                actual_extent.width,
                actual_extent.height
            );
        }
        self.swapchain = swapchain;
        self.desc.extent = actual_extent;
        set_object_name(self.backend.as_ref(), self.swapchain, "main");
        self.backend.destroy_swapchain(old_swapchain);
        self.desc.old_swapchain = vk::SwapchainKHR::null();

        self.register_images(resources);
    }

    fn destroy_images(&mut self, resources: &mut ResourceManager) {
        for image in self.images.drain(..) {
            resources.destroy_image(image);
        }
    }
}

// destroy
impl RenderSwapchain {
    /// 需要在 [`ResourceManager::destroy`] 之前调用
    pub fn destroy(&mut self, resources: &mut ResourceManager) {
        self.destroy_images(resources);
        self.backend.destroy_swapchain(self.swapchain);
        self.swapchain = vk::SwapchainKHR::null();
    }
}

impl Drop for RenderSwapchain {
    fn drop(&mut self) {
        debug_assert!(
            self.swapchain == vk::SwapchainKHR::null() || std::thread::panicking(),
            "RenderSwapchain dropped without destroy()"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::{
        backend::headless::{HeadlessBackend, HeadlessConfig},
        resources::{descriptor::DescriptorQuotas, image::ImageOwnership},
    };

    fn desc(width: u32, height: u32) -> SwapchainDesc {
        SwapchainDesc {
            extent: vk::Extent2D { width, height },
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            present_mode: vk::PresentModeKHR::FIFO,
            image_count: 3,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            old_swapchain: vk::SwapchainKHR::null(),
        }
    }

    struct Fixture {
        backend: Rc<HeadlessBackend>,
        resources: ResourceManager,
        commands: GfxCommands,
        swapchain: RenderSwapchain,
    }

    fn setup() -> Fixture {
        kestrel_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
        let mut resources = ResourceManager::new(backend.clone(), &DescriptorQuotas::default());
        let commands = GfxCommands::new(backend.clone(), 1_000_000_000);
        let swapchain = RenderSwapchain::new(backend.clone(), &mut resources, &desc(800, 600));
        Fixture {
            backend,
            resources,
            commands,
            swapchain,
        }
    }

    impl Fixture {
        fn destroy(mut self) {
            self.swapchain.destroy(&mut self.resources);
            self.commands.destroy();
            self.resources.destroy();
            assert_eq!(self.backend.live_object_count(), 0);
        }
    }

    #[test]
    fn test_images_are_borrowed() {
        let fixture = setup();
        assert_eq!(fixture.swapchain.images().len(), 3);
        for image in fixture.swapchain.images() {
            let image = fixture.resources.get_image(*image);
            assert_eq!(image.ownership(), ImageOwnership::Borrowed { owns_view: true });
            assert_eq!(image.extent_2d(), vk::Extent2D { width: 800, height: 600 });
        }
        fixture.destroy();
    }

    #[test]
    fn test_acquire_and_present() {
        let mut fixture = setup();
        let acquired = fixture.commands.create_semaphore("acquired");
        let rendered = fixture.commands.create_semaphore("rendered");

        let outcome = fixture.swapchain.acquire(&fixture.commands, acquired, 1_000_000_000);
        assert_eq!(
            outcome,
            AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: false
            }
        );
        assert_eq!(fixture.swapchain.present(&fixture.commands, 0, rendered), PresentOutcome::Presented);

        fixture.backend.set_next_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        assert_eq!(
            fixture.swapchain.acquire(&fixture.commands, acquired, 1_000_000_000),
            AcquireOutcome::Acquired {
                image_index: 1,
                suboptimal: true
            }
        );
        fixture.backend.set_next_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(fixture.swapchain.present(&fixture.commands, 1, rendered).need_recreate());
        fixture.destroy();
    }

    #[test]
    fn test_out_of_date_acquire() {
        let mut fixture = setup();
        let acquired = fixture.commands.create_semaphore("acquired");
        fixture.backend.set_next_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(fixture.swapchain.acquire(&fixture.commands, acquired, 1_000_000_000), AcquireOutcome::OutOfDate);
        fixture.destroy();
    }

    #[test]
    #[should_panic(expected = "failed to acquire next swapchain image")]
    fn test_acquire_device_lost_panics() {
        let mut fixture = setup();
        let acquired = fixture.commands.create_semaphore("acquired");
        fixture.backend.set_next_acquire_result(vk::Result::ERROR_DEVICE_LOST);
        fixture.swapchain.acquire(&fixture.commands, acquired, 1_000_000_000);
    }

    #[test]
    fn test_recreate_replaces_images() {
        let mut fixture = setup();
        let old_images = fixture.swapchain.images().to_vec();
        let old_swapchain = fixture.swapchain.vk_swapchain();

        fixture.swapchain.recreate(&mut fixture.resources, vk::Extent2D { width: 1024, height: 768 });

        assert_ne!(fixture.swapchain.vk_swapchain(), old_swapchain);
        assert_eq!(fixture.swapchain.extent(), vk::Extent2D { width: 1024, height: 768 });
        for image in &old_images {
            assert!(!fixture.resources.is_image_valid(*image));
        }
        let new_image = fixture.resources.get_image(fixture.swapchain.image(0));
        assert_eq!(new_image.extent_2d(), vk::Extent2D { width: 1024, height: 768 });
        fixture.destroy();
    }

    #[test]
    fn test_recreate_uses_surface_extent() {
        let mut fixture = setup();
        fixture.backend.set_surface_extent(Some(vk::Extent2D { width: 800, height: 600 }));

        fixture.swapchain.recreate(&mut fixture.resources, vk::Extent2D { width: 801, height: 600 });

        assert_eq!(fixture.swapchain.extent(), vk::Extent2D { width: 800, height: 600 });
        for image in fixture.swapchain.images() {
            let image = fixture.resources.get_image(*image);
            assert_eq!(image.extent_2d(), vk::Extent2D { width: 800, height: 600 });
        }
        fixture.destroy();
    }

    #[test]
    fn test_new_uses_surface_extent() {
        kestrel_crate_tools::init_log::init_test_log();
        let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
        backend.set_surface_extent(Some(vk::Extent2D { width: 640, height: 360 }));
        let mut resources = ResourceManager::new(backend.clone(), &DescriptorQuotas::default());

        let mut swapchain = RenderSwapchain::new(backend.clone(), &mut resources, &desc(1920, 1080));
        assert_eq!(swapchain.extent(), vk::Extent2D { width: 640, height: 360 });
        let image = resources.get_image(swapchain.image(0));
        assert_eq!(image.extent_2d(), vk::Extent2D { width: 640, height: 360 });

        swapchain.destroy(&mut resources);
        resources.destroy();
        assert_eq!(backend.live_object_count(), 0);
    }
}
