use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use ash::vk::{self, Handle};
use kestrel_gfx::backend::headless::{HeadlessBackend, HeadlessCall, HeadlessConfig};
use kestrel_render::{
    frame_counter::FrameLabel,
    pass::{PassContext, PassInitContext, RenderPass},
    passes::compute_cull_pass::ComputeCullPass,
    renderer::{FrameOutcome, Renderer},
    scene::{CameraData, DrawCommand, MaterialData, SceneChanges, TransformData},
    settings::RendererSettings,
};

fn test_settings() -> RendererSettings {
    let mut settings = RendererSettings::from_toml_str(
        r#"
        frames_in_flight = 3
        upload_buffer_size = 65536

        [swapchain]
        width = 640
        height = 480

        [scene]
        transforms = 16
        materials = 4
        draw_commands = 8
        "#,
    )
    .unwrap();
    settings.fence_timeout_ns = 1_000_000;
    settings
}

fn setup() -> (Rc<HeadlessBackend>, Renderer) {
    kestrel_crate_tools::init_log::init_test_log();
    let backend = Rc::new(HeadlessBackend::new(HeadlessConfig::default()));
    let renderer = Renderer::new(backend.clone(), test_settings());
    (backend, renderer)
}

fn teardown(backend: Rc<HeadlessBackend>, mut renderer: Renderer) {
    renderer.destroy();
    assert_eq!(backend.live_object_count(), 0);
}

fn labels(calls: &[HeadlessCall]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|call| match call {
            HeadlessCall::BeginLabel { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

/// 记录生命周期调用的 pass
struct TracePass {
    name: &'static str,
    trace: Rc<RefCell<Vec<String>>>,
}

impl RenderPass for TracePass {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, _ctx: &mut PassInitContext<'_>) {
        self.trace.borrow_mut().push(format!("init:{}", self.name));
    }

    fn resize(&mut self, ctx: &mut PassInitContext<'_>) {
        self.trace
            .borrow_mut()
            .push(format!("resize:{}:{}x{}", self.name, ctx.frame_extent.width, ctx.frame_extent.height));
    }

    fn process(&mut self, ctx: &PassContext<'_>) {
        self.trace.borrow_mut().push(format!("process:{}:{}", self.name, ctx.frame_id));
    }

    fn destroy(&mut self, _ctx: &mut PassInitContext<'_>) {
        self.trace.borrow_mut().push(format!("destroy:{}", self.name));
    }
}

#[test]
fn test_passes_execute_in_order() {
    let (backend, mut renderer) = setup();
    assert_eq!(renderer.pass_names(), vec!["clear", "ui", "present-transition"]);

    renderer.add_pass(500, Box::new(ComputeCullPass::new(vec![0x0723_0203])));
    assert_eq!(renderer.pass_names(), vec!["clear", "compute-cull", "ui", "present-transition"]);

    backend.clear_calls();
    assert_eq!(renderer.render_frame(&SceneChanges::default()), FrameOutcome::Presented { image_index: 0 });
    assert_eq!(labels(&backend.calls()), vec!["frame-A", "clear", "compute-cull", "ui", "present-transition"]);

    // 最后一个 barrier 将 swapchain image 转换到 present layout
    let last_layout = backend.calls().iter().rev().find_map(|call| match call {
        HeadlessCall::PipelineBarrier { images, .. } if !images.is_empty() => Some(images[0].new_layout),
        _ => None,
    });
    assert_eq!(last_layout, Some(vk::ImageLayout::PRESENT_SRC_KHR));

    teardown(backend, renderer);
}

#[test]
#[should_panic(expected = "render pass order 0 is already used by `clear`")]
fn test_duplicate_pass_order_panics() {
    let (_backend, mut renderer) = setup();
    renderer.add_pass(
        0,
        Box::new(TracePass {
            name: "dup",
            trace: Rc::default(),
        }),
    );
}

#[test]
fn test_pass_lifecycle() {
    let (backend, mut renderer) = setup();
    let trace = Rc::new(RefCell::new(Vec::new()));
    for (order, name) in [(200, "second"), (100, "first")] {
        renderer.add_pass(
            order,
            Box::new(TracePass {
                name,
                trace: trace.clone(),
            }),
        );
    }

    renderer.render_frame(&SceneChanges::default());
    renderer.resize(vk::Extent2D { width: 800, height: 600 });
    renderer.render_frame(&SceneChanges::default());
    renderer.destroy();
    assert_eq!(backend.live_object_count(), 0);

    assert_eq!(
        *trace.borrow(),
        vec![
            "init:second",
            "init:first",
            "process:first:0",
            "process:second:0",
            "resize:first:800x600",
            "resize:second:800x600",
            "process:first:1",
            "process:second:1",
            "destroy:second",
            "destroy:first",
        ]
    );
}

#[test]
fn test_resize_follows_surface_extent() {
    let (backend, mut renderer) = setup();
    let trace = Rc::new(RefCell::new(Vec::new()));
    renderer.add_pass(
        100,
        Box::new(TracePass {
            name: "trace",
            trace: trace.clone(),
        }),
    );

    backend.set_surface_extent(Some(vk::Extent2D { width: 800, height: 600 }));
    renderer.resize(vk::Extent2D { width: 801, height: 600 });

    assert_eq!(renderer.frame_extent(), vk::Extent2D { width: 800, height: 600 });
    assert_eq!(trace.borrow().last().map(String::as_str), Some("resize:trace:800x600"));
    assert!(matches!(renderer.render_frame(&SceneChanges::default()), FrameOutcome::Presented { .. }));
    teardown(backend, renderer);
}

#[test]
fn test_frame_labels_cycle_over_slots() {
    let (backend, mut renderer) = setup();
    let submitted_lists = |backend: &HeadlessBackend| {
        backend
            .calls()
            .iter()
            .filter_map(|call| match call {
                HeadlessCall::Submit { command_buffers, .. } => Some(command_buffers[0]),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    let slot_cmd = |renderer: &Renderer, index: usize| {
        renderer.commands().get_command_list(renderer.frame_slot(index).command_list()).vk_command_buffer()
    };

    backend.clear_calls();
    for _ in 0..4 {
        renderer.render_frame(&SceneChanges::default());
    }
    assert_eq!(
        submitted_lists(&backend),
        vec![slot_cmd(&renderer, 0), slot_cmd(&renderer, 1), slot_cmd(&renderer, 2), slot_cmd(&renderer, 0)]
    );
    assert_eq!(renderer.frame_counter().frame_id(), 4);
    assert_eq!(renderer.frame_counter().frame_label(), FrameLabel::B);

    teardown(backend, renderer);
}

#[test]
fn test_slot_is_reused_only_after_fence_wait() {
    let (backend, mut renderer) = setup();
    backend.set_auto_complete(false);

    // 三个 slot 的 fence 初始为 signal 状态
    for _ in 0..3 {
        renderer.render_frame(&SceneChanges::default());
    }
    backend.complete_submissions();
    backend.clear_calls();
    renderer.render_frame(&SceneChanges {
        camera: Some(CameraData::default()),
        ..Default::default()
    });

    let slot = renderer.frame_slot(0);
    let fence = renderer.commands().vk_fence(slot.fence());
    let cmd = renderer.commands().get_command_list(slot.command_list()).vk_command_buffer();
    let upload = renderer.resources().get_buffer(slot.upload().buffer()).vk_buffer();

    let calls = backend.calls();
    let position = |pred: &dyn Fn(&HeadlessCall) -> bool| calls.iter().position(pred).unwrap();
    let wait = position(&|call| {
        matches!(call, HeadlessCall::WaitFence { fence: f, result } if *f == fence && *result == vk::Result::SUCCESS)
    });
    let reset = position(&|call| matches!(call, HeadlessCall::ResetCommandBuffer { cmd: c } if *c == cmd));
    let write = position(&|call| matches!(call, HeadlessCall::WriteMapped { buffer, .. } if *buffer == upload));
    let reset_fence = position(&|call| matches!(call, HeadlessCall::ResetFence { fence: f } if *f == fence));
    assert!(wait < reset_fence);
    assert!(wait < reset);
    assert!(wait < write);

    teardown(backend, renderer);
}

#[test]
#[should_panic(expected = "wait fence `frame-A` failed")]
fn test_unfinished_slot_is_never_rerecorded() {
    let (backend, mut renderer) = setup();
    backend.set_auto_complete(false);
    for _ in 0..4 {
        renderer.render_frame(&SceneChanges::default());
    }
}

#[test]
fn test_out_of_date_acquire_skips_frame() {
    let (backend, mut renderer) = setup();
    backend.set_next_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    backend.clear_calls();

    assert_eq!(renderer.render_frame(&SceneChanges::default()), FrameOutcome::Skipped);
    assert!(renderer.need_resize());
    assert_eq!(renderer.frame_counter().frame_id(), 0);
    assert!(!backend.calls().iter().any(|call| matches!(call, HeadlessCall::Submit { .. })));
    // fence 没有被 reset，下一次仍然可以直接等待
    let fence = renderer.commands().vk_fence(renderer.frame_slot(0).fence());
    assert!(backend.fence_signaled(fence));

    let old_images = renderer.swapchain().images().to_vec();
    renderer.resize(vk::Extent2D { width: 1024, height: 768 });
    assert!(!renderer.need_resize());
    assert_eq!(renderer.frame_extent(), vk::Extent2D { width: 1024, height: 768 });
    assert!(old_images.iter().all(|image| !renderer.resources().is_image_valid(*image)));

    assert!(matches!(renderer.render_frame(&SceneChanges::default()), FrameOutcome::Presented { .. }));
    teardown(backend, renderer);
}

#[test]
fn test_suboptimal_renders_and_requests_resize() {
    let (backend, mut renderer) = setup();
    backend.set_next_acquire_result(vk::Result::SUBOPTIMAL_KHR);
    assert_eq!(renderer.render_frame(&SceneChanges::default()), FrameOutcome::Presented { image_index: 0 });
    assert!(renderer.need_resize());

    renderer.resize(vk::Extent2D { width: 640, height: 480 });
    backend.set_next_present_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
    renderer.render_frame(&SceneChanges::default());
    assert!(renderer.need_resize());

    // 空的 extent 被忽略
    renderer.resize(vk::Extent2D { width: 0, height: 480 });
    assert!(renderer.need_resize());
    teardown(backend, renderer);
}

#[test]
fn test_timings_are_read_back_one_round_later() {
    let (backend, mut renderer) = setup();
    renderer.add_pass(500, Box::new(ComputeCullPass::new(vec![0x0723_0203])));

    let changes = SceneChanges {
        draw_commands: vec![(0, DrawCommand::default())],
        ..Default::default()
    };
    for _ in 0..3 {
        renderer.render_frame(&changes);
        assert!(renderer.last_timings().is_none());
    }

    renderer.render_frame(&SceneChanges::default());
    let timings = renderer.last_timings().unwrap();
    assert_eq!(timings.frame_id, 0);
    assert_eq!(timings.frame_label, FrameLabel::A);
    // headless 的 timestamp 每次写入增加 1000 tick，period 为 1ns
    assert_eq!(timings.frame_gpu_ns, Some(9000.0));
    assert_eq!(
        timings.passes.iter().map(|pass| pass.name.as_str()).collect::<Vec<_>>(),
        vec!["clear", "compute-cull", "ui", "present-transition"]
    );
    assert!(timings.passes.iter().all(|pass| pass.gpu_ns == Some(1000.0)));

    let cull = &timings.passes[1];
    assert_eq!(cull.statistics.map(|stats| stats.compute_shader_invocations), Some(1));
    assert!(timings.passes[0].statistics.is_none());

    backend.set_queries_ready(false);
    renderer.render_frame(&SceneChanges::default());
    let timings = renderer.last_timings().unwrap();
    assert_eq!(timings.frame_id, 1);
    assert_eq!(timings.frame_gpu_ns, None);
    assert!(timings.passes.iter().all(|pass| pass.gpu_ns.is_none() && pass.statistics.is_none()));

    teardown(backend, renderer);
}

#[test]
fn test_ui_callback_runs_once_per_frame() {
    let (backend, mut renderer) = setup();
    let frames = Rc::new(Cell::new(0));
    {
        let frames = frames.clone();
        renderer.set_ui_callback(move |ctx| {
            frames.set(frames.get() + 1);
            ctx.recorder.clear_color_image(
                ctx.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                [1.0, 0.0, 1.0, 1.0],
            );
        });
    }

    backend.clear_calls();
    renderer.render_frame(&SceneChanges::default());
    renderer.render_frame(&SceneChanges::default());
    assert_eq!(frames.get(), 2);
    let clears = backend.calls().iter().filter(|call| matches!(call, HeadlessCall::ClearColorImage { .. })).count();
    assert_eq!(clears, 4);

    renderer.clear_ui_callback();
    renderer.render_frame(&SceneChanges::default());
    assert_eq!(frames.get(), 2);

    teardown(backend, renderer);
}

#[test]
fn test_scene_upload_is_batched() {
    let (backend, mut renderer) = setup();
    let transform = TransformData::new(glam::Mat4::from_translation(glam::vec3(1.0, 2.0, 3.0)));
    let changes = SceneChanges {
        camera: Some(CameraData::look_at(glam::Vec3::new(0.0, 0.0, 5.0), glam::Vec3::ZERO, 1.0, 4.0 / 3.0)),
        transforms: vec![(0, transform), (1, transform), (2, transform), (5, transform)],
        materials: vec![(3, MaterialData::default())],
        draw_commands: (0..3)
            .map(|i| {
                (i, DrawCommand {
                    index_count: 36,
                    instance_count: 1,
                    ..Default::default()
                })
            })
            .collect(),
    };

    backend.clear_calls();
    renderer.render_frame(&changes);
    assert_eq!(renderer.scene().draw_count(), 3);

    let calls = backend.calls();
    let copies = calls
        .iter()
        .filter_map(|call| match call {
            HeadlessCall::CopyBuffer { dst, regions, .. } => Some((*dst, regions.clone())),
            _ => None,
        })
        .collect::<Vec<_>>();
    let vk_buffer = |handle| renderer.resources().get_buffer(handle).vk_buffer();
    let scene = renderer.scene();
    assert_eq!(
        copies.iter().map(|(dst, regions)| (*dst, regions.len())).collect::<Vec<_>>(),
        vec![
            (vk_buffer(scene.camera()), 1),
            (vk_buffer(scene.transforms()), 2),
            (vk_buffer(scene.materials()), 1),
            (vk_buffer(scene.draw_commands()), 1),
        ]
    );
    let transform_regions = &copies[1].1;
    assert_eq!(transform_regions[0].dst_offset, 0);
    assert_eq!(transform_regions[0].size, 3 * size_of::<TransformData>() as u64);
    assert_eq!(transform_regions[1].dst_offset, 5 * size_of::<TransformData>() as u64);
    assert_eq!(copies[2].1[0].dst_offset, 3 * size_of::<MaterialData>() as u64);

    // 上传的数据位于 upload buffer 中对应的 offset
    let upload = vk_buffer(renderer.frame_slot(0).upload().buffer());
    let uploaded = backend.read_mapped(upload, transform_regions[1].src_offset as usize, size_of::<TransformData>());
    assert_eq!(uploaded, bytemuck::bytes_of(&transform));

    // 拷贝之前和之后各有一个包含 4 个 buffer 的 barrier
    let buffer_barriers = calls
        .iter()
        .filter_map(|call| match call {
            HeadlessCall::PipelineBarrier { buffers, .. } if !buffers.is_empty() => Some(buffers.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(buffer_barriers.len(), 2);
    assert!(buffer_barriers.iter().all(|barriers| barriers.len() == 4));
    assert_eq!(buffer_barriers[0][0].dst_access, vk::AccessFlags2::TRANSFER_WRITE);
    assert_eq!(buffer_barriers[1][0].src_access, vk::AccessFlags2::TRANSFER_WRITE);
    assert!(buffer_barriers[1][0].dst_access.contains(vk::AccessFlags2::SHADER_READ));

    let first_copy = calls.iter().position(|call| matches!(call, HeadlessCall::CopyBuffer { .. })).unwrap();
    let flush = calls
        .iter()
        .position(|call| matches!(call, HeadlessCall::FlushMapped { buffer, .. } if *buffer == upload))
        .unwrap();
    assert!(flush < first_copy);

    teardown(backend, renderer);
}

#[test]
#[should_panic(expected = "scene transform index 16 out of capacity 16")]
fn test_scene_index_out_of_capacity_panics() {
    let (_backend, mut renderer) = setup();
    renderer.render_frame(&SceneChanges {
        transforms: vec![(16, TransformData::default())],
        ..Default::default()
    });
}

#[test]
fn test_objects_are_named() {
    let (backend, renderer) = setup();
    let fence = renderer.commands().vk_fence(renderer.frame_slot(1).fence());
    assert_eq!(backend.debug_name(fence.as_raw()).as_deref(), Some("frame-B"));
    let upload = renderer.resources().get_buffer(renderer.frame_slot(2).upload().buffer()).vk_buffer();
    assert_eq!(backend.debug_name(upload.as_raw()).as_deref(), Some("frame-C-upload"));
    teardown(backend, renderer);
}
