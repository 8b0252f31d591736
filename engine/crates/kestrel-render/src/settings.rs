use std::path::Path;

use anyhow::Context;
use ash::vk;
use kestrel_gfx::{backend::SwapchainDesc, query::QueryCapacities, resources::descriptor::DescriptorQuotas};
use serde::Deserialize;

/// 渲染器配置，从 TOML 加载，所有字段都有默认值
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererSettings {
    /// frames in flight 的数量
    pub frames_in_flight: usize,
    /// 等待 fence 与 acquire 的超时时间
    pub fence_timeout_ns: u64,
    /// 每个 frame slot 的 upload buffer 大小
    pub upload_buffer_size: u64,

    pub swapchain: SwapchainSettings,
    pub queries: QuerySettings,
    pub descriptors: DescriptorSettings,
    pub scene: SceneCapacities,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout_ns: 1_000_000_000,
            upload_buffer_size: 4 * 1024 * 1024,
            swapchain: SwapchainSettings::default(),
            queries: QuerySettings::default(),
            descriptors: DescriptorSettings::default(),
            scene: SceneCapacities::default(),
        }
    }
}

impl RendererSettings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("read settings `{}`", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parse settings `{}`", path.display()))
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let settings: Self = toml::from_str(text)?;
        anyhow::ensure!(
            (1..=26).contains(&settings.frames_in_flight),
            "frames_in_flight must be in [1, 26], got {}",
            settings.frames_in_flight
        );
        anyhow::ensure!(
            settings.swapchain.width > 0 && settings.swapchain.height > 0,
            "swapchain extent must not be empty"
        );
        Ok(settings)
    }

    pub fn swapchain_desc(&self) -> SwapchainDesc {
        SwapchainDesc {
            extent: self.swapchain.extent(),
            format: self.swapchain.format.vk_format(),
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            present_mode: self.swapchain.present_mode.vk_present_mode(),
            image_count: self.swapchain.image_count,
            // TRANSFER_DST 用于 clear pass
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            old_swapchain: vk::SwapchainKHR::null(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwapchainSettings {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
    pub present_mode: PresentMode,
    pub image_count: u32,
}

impl Default for SwapchainSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: SurfaceFormat::Bgra8Unorm,
            present_mode: PresentMode::Fifo,
            image_count: 3,
        }
    }
}

impl SwapchainSettings {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFormat {
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba8Unorm,
    Rgba8Srgb,
}

impl SurfaceFormat {
    pub fn vk_format(self) -> vk::Format {
        match self {
            SurfaceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            SurfaceFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            SurfaceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            SurfaceFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    Fifo,
    Mailbox,
    Immediate,
}

impl PresentMode {
    pub fn vk_present_mode(self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

/// 各类 query pool 的容量
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuerySettings {
    pub timestamp: u32,
    pub occlusion: u32,
    pub pipeline_statistics: u32,
}

impl Default for QuerySettings {
    fn default() -> Self {
        let capacities = QueryCapacities::default();
        Self {
            timestamp: capacities.timestamp,
            occlusion: capacities.occlusion,
            pipeline_statistics: capacities.pipeline_statistics,
        }
    }
}

impl From<&QuerySettings> for QueryCapacities {
    fn from(settings: &QuerySettings) -> Self {
        Self {
            timestamp: settings.timestamp,
            occlusion: settings.occlusion,
            pipeline_statistics: settings.pipeline_statistics,
        }
    }
}

/// 全局 descriptor pool 的容量
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DescriptorSettings {
    pub max_sets: u32,
    pub samplers: u32,
    pub combined_image_samplers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
}

impl Default for DescriptorSettings {
    fn default() -> Self {
        let quotas = DescriptorQuotas::default();
        Self {
            max_sets: quotas.max_sets,
            samplers: quotas.samplers,
            combined_image_samplers: quotas.combined_image_samplers,
            sampled_images: quotas.sampled_images,
            storage_images: quotas.storage_images,
            uniform_buffers: quotas.uniform_buffers,
            storage_buffers: quotas.storage_buffers,
        }
    }
}

impl From<&DescriptorSettings> for DescriptorQuotas {
    fn from(settings: &DescriptorSettings) -> Self {
        Self {
            max_sets: settings.max_sets,
            samplers: settings.samplers,
            combined_image_samplers: settings.combined_image_samplers,
            sampled_images: settings.sampled_images,
            storage_images: settings.storage_images,
            uniform_buffers: settings.uniform_buffers,
            storage_buffers: settings.storage_buffers,
        }
    }
}

/// 共享场景 buffer 的容量，单位为元素个数
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SceneCapacities {
    pub transforms: u32,
    pub materials: u32,
    pub draw_commands: u32,
}

impl Default for SceneCapacities {
    fn default() -> Self {
        Self {
            transforms: 1024,
            materials: 256,
            draw_commands: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings = RendererSettings::from_toml_str("").unwrap();
        assert_eq!(settings, RendererSettings::default());
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.fence_timeout_ns, 1_000_000_000);
    }

    #[test]
    fn test_partial_toml() {
        let settings = RendererSettings::from_toml_str(
            r#"
            frames_in_flight = 2

            [swapchain]
            width = 640
            format = "rgba8_srgb"
            present_mode = "mailbox"

            [queries]
            timestamp = 64

            [scene]
            draw_commands = 16
            "#,
        )
        .unwrap();

        assert_eq!(settings.frames_in_flight, 2);
        assert_eq!(settings.swapchain.extent(), vk::Extent2D { width: 640, height: 720 });
        assert_eq!(settings.swapchain_desc().format, vk::Format::R8G8B8A8_SRGB);
        assert_eq!(settings.swapchain_desc().present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(QueryCapacities::from(&settings.queries).timestamp, 64);
        assert_eq!(settings.queries.occlusion, QueryCapacities::default().occlusion);
        assert_eq!(settings.scene.draw_commands, 16);
        assert_eq!(settings.scene.transforms, 1024);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(RendererSettings::from_toml_str("frames_in_flight = 0").is_err());
        assert!(RendererSettings::from_toml_str("frames_in_flight = 27").is_err());
        assert!(RendererSettings::from_toml_str("[swapchain]\nwidth = 0").is_err());
        assert!(RendererSettings::from_toml_str("[swapchain]\nformat = \"r5g6b5\"").is_err());
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = RendererSettings::load("/nonexistent/kestrel.toml").unwrap_err();
        assert!(err.to_string().contains("read settings `/nonexistent/kestrel.toml`"));
    }
}
