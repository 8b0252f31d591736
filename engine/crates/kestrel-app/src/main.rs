//! 在 headless backend 上运行若干帧
//!
//! 用法：`kestrel-demo [settings.toml] [frame count]`

use std::rc::Rc;

use anyhow::Context;
use ash::vk;
use kestrel_crate_tools::init_log::init_log;
use kestrel_gfx::backend::headless::{HeadlessBackend, HeadlessConfig};
use kestrel_render::{
    frame_slot::FrameTimings,
    passes::compute_cull_pass::ComputeCullPass,
    renderer::{FrameOutcome, Renderer},
    scene::{CameraData, DrawCommand, MaterialData, SceneChanges, TransformData},
    settings::RendererSettings,
};

const DEFAULT_FRAME_COUNT: u64 = 16;
const CULL_PASS_ORDER: u32 = 500;
const OBJECT_COUNT: u32 = 8;

/// headless backend 不会解析 SPIR-V，只需要一个合法的 magic number
const CULL_SHADER_SPIRV: [u32; 5] = [0x0723_0203, 0x0001_0500, 0, 1, 0];

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

fn load_settings(path: Option<&str>) -> anyhow::Result<RendererSettings> {
    match path {
        Some(path) => RendererSettings::load(path),
        None => {
            log::info!("no settings file given, use defaults");
            Ok(RendererSettings::default())
        }
    }
}

/// 第一帧写入所有物体，之后每帧只更新相机和一个物体
fn scene_changes(frame: u64, aspect: f32) -> SceneChanges {
    let angle = frame as f32 * 0.05;
    let camera = CameraData::look_at(
        glam::vec3(angle.cos() * 10.0, 3.0, angle.sin() * 10.0),
        glam::Vec3::ZERO,
        60f32.to_radians(),
        aspect,
    );
    let transform = |i: u32| {
        let offset = i as f32 - OBJECT_COUNT as f32 / 2.0;
        TransformData::new(glam::Mat4::from_rotation_y(angle + offset) * glam::Mat4::from_translation(glam::vec3(offset, 0.0, 0.0)))
    };

    if frame == 0 {
        SceneChanges {
            camera: Some(camera),
            transforms: (0..OBJECT_COUNT).map(|i| (i, transform(i))).collect(),
            materials: vec![(0, MaterialData {
                base_color: glam::vec4(0.8, 0.3, 0.2, 1.0),
                roughness: 0.5,
                ..Default::default()
            })],
            draw_commands: (0..OBJECT_COUNT)
                .map(|i| {
                    (i, DrawCommand {
                        index_count: 36,
                        instance_count: 1,
                        first_instance: i,
                        ..Default::default()
                    })
                })
                .collect(),
        }
    } else {
        let moving = (frame % OBJECT_COUNT as u64) as u32;
        SceneChanges {
            camera: Some(camera),
            transforms: vec![(moving, transform(moving))],
            ..Default::default()
        }
    }
}

fn log_timings(timings: &FrameTimings) {
    let fmt_ns = |ns: Option<f64>| ns.map_or("not ready".to_string(), |ns| format!("{:.3}us", ns / 1000.0));
    log::info!(
        "frame {} [{}] gpu: {}",
        timings.frame_id,
        timings.frame_label,
        fmt_ns(timings.frame_gpu_ns)
    );
    for pass in &timings.passes {
        match pass.statistics {
            Some(statistics) => log::info!(
                "\t{:<20} {} (compute invocations: {})",
                pass.name,
                fmt_ns(pass.gpu_ns),
                statistics.compute_shader_invocations
            ),
            None => log::info!("\t{:<20} {}", pass.name, fmt_ns(pass.gpu_ns)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(panic_handler));
    init_log();
    tracy_client::Client::start();
    tracy_client::set_thread_name!("RenderThread");

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let settings = load_settings(args.first().map(String::as_str))?;
    let frame_count = match args.get(1) {
        Some(count) => count.parse::<u64>().with_context(|| format!("invalid frame count `{count}`"))?,
        None => DEFAULT_FRAME_COUNT,
    };

    let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
    let mut renderer = Renderer::new(backend.clone(), settings);
    renderer.add_pass(CULL_PASS_ORDER, Box::new(ComputeCullPass::new(CULL_SHADER_SPIRV.to_vec())));
    renderer.set_ui_callback(|ctx| log::trace!("ui frame {} [{}]", ctx.frame_id, ctx.frame_label));

    let mut scene_frame = 0;
    for frame in 0..frame_count {
        // 模拟一次窗口尺寸变化
        if frame == frame_count / 2 {
            backend.set_next_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }

        let extent = renderer.frame_extent();
        let aspect = extent.width as f32 / extent.height as f32;
        match renderer.render_frame(&scene_changes(scene_frame, aspect)) {
            FrameOutcome::Presented { .. } => scene_frame += 1,
            FrameOutcome::Skipped => log::warn!("frame {} skipped", frame),
        }

        if renderer.need_resize() {
            renderer.resize(vk::Extent2D {
                width: extent.width / 2,
                height: extent.height / 2,
            });
        }
        if let Some(timings) = renderer.last_timings() {
            log_timings(timings);
        }
    }

    renderer.destroy();
    log::info!("{} frames done, {} objects still alive", frame_count, backend.live_object_count());
    Ok(())
}
