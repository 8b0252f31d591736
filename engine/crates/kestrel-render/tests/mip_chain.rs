use std::rc::Rc;

use ash::vk;
use kestrel_gfx::{
    backend::headless::{HeadlessBackend, HeadlessCall, HeadlessConfig},
    commands::barrier::ImageBarrierDesc,
    resources::{buffer::BufferDesc, image::ImageDesc},
};
use kestrel_render::{renderer::Renderer, settings::RendererSettings};

/// 上传 256x256 的 mip 0，然后在同一次提交中生成 4 级 mip
#[test]
fn test_upload_and_generate_mip_chain() {
    kestrel_crate_tools::init_log::init_test_log();
    let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
    let mut renderer = Renderer::new(backend.clone(), RendererSettings::default());

    let format = vk::Format::R8G8B8A8_UNORM;
    backend.set_format_features(
        format,
        vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
            | vk::FormatFeatureFlags::BLIT_SRC
            | vk::FormatFeatureFlags::BLIT_DST,
    );

    let (resources, commands) = renderer.gfx_mut();
    let image = resources.create_image(
        &ImageDesc::new_2d(
            256,
            256,
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
            "albedo",
        )
        .mip_levels(4),
    );
    let pixels = vec![0x7fu8; 256 * 256 * 4];
    let stage = resources.create_buffer(&BufferDesc::new_stage_buffer(pixels.len() as u64, "albedo-stage"));
    resources.write_buffer(stage, 0, &pixels);
    resources.flush_buffer(stage, 0, vk::WHOLE_SIZE);

    backend.clear_calls();
    commands.one_time_submit(resources, "albedo-upload", |rec| {
        rec.image_barriers(&[ImageBarrierDesc::new(image)
            .mip_range(0, 1)
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)]);
        rec.copy_buffer_to_image(stage, image, 0);
        rec.generate_mipmaps(
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_READ,
        );
    });

    let calls = backend.calls();
    let blits = calls
        .iter()
        .filter_map(|call| match call {
            HeadlessCall::BlitImage {
                src_mip,
                dst_mip,
                dst_extent,
                filter,
                ..
            } => Some((*src_mip, *dst_mip, dst_extent.width, dst_extent.height, *filter)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        blits,
        vec![
            (0, 1, 128, 128, vk::Filter::LINEAR),
            (1, 2, 64, 64, vk::Filter::LINEAR),
            (2, 3, 32, 32, vk::Filter::LINEAR),
        ]
    );

    // 最后一个 barrier 覆盖整个 chain，转换到最终 layout
    let last = calls
        .iter()
        .rev()
        .find_map(|call| match call {
            HeadlessCall::PipelineBarrier { images, .. } if !images.is_empty() => Some(images[0]),
            _ => None,
        })
        .unwrap();
    assert_eq!(last.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!((last.range.base_mip_level, last.range.level_count), (0, 4));
    assert_eq!(last.dst_stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);

    // one time submit 已经等待完成
    assert!(calls.iter().any(|call| matches!(call, HeadlessCall::WaitFence { result, .. } if *result == vk::Result::SUCCESS)));

    let (resources, _) = renderer.gfx_mut();
    resources.destroy_buffer(stage);
    resources.destroy_image(image);
    renderer.destroy();
    assert_eq!(backend.live_object_count(), 0);
}
