//! 编译和执行的整体测试，执行部分跑在 `HeadlessDevice` 上

use std::sync::Arc;

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::access::GfxAccess;
use weave_gfx::device::GfxDevice;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::buffer::{GfxBufferCreateInfo, GfxMemoryUsage};
use weave_gfx::resources::image::{GfxClearValue, GfxImage, GfxImageCreateInfo, GfxSwapchainImage};
use weave_render_interface::config::RenderContextConfig;
use weave_render_interface::context::RenderContext;
use weave_render_interface::headless::{GfxCommand, HeadlessDevice, HeadlessObjectKind};

use super::*;

fn context_with(device: HeadlessDevice) -> (Arc<HeadlessDevice>, RenderContext) {
    let device = Arc::new(device);
    let ctx = RenderContext::new(device.clone(), RenderContextConfig::default());
    (device, ctx)
}

fn context() -> (Arc<HeadlessDevice>, RenderContext) {
    context_with(HeadlessDevice::new())
}

fn rgba8(size: u32) -> RgImageAttachment {
    RgImageAttachment::new().extent_2d(size, size).format(vk::Format::R8G8B8A8_UNORM)
}

fn external_image(device: &HeadlessDevice, usage: vk::ImageUsageFlags) -> GfxImage {
    let info = GfxImageCreateInfo::new_image_2d_info(
        vk::Extent2D {
            width: 64,
            height: 64,
        },
        vk::Format::R8G8B8A8_UNORM,
        usage,
    );
    device.create_image(&info, "external").unwrap()
}

/// 命令的种类，便于比较顺序
fn kinds(commands: &[GfxCommand]) -> Vec<&'static str> {
    commands
        .iter()
        .map(|command| match command {
            GfxCommand::PipelineBarrier { .. } => "barrier",
            GfxCommand::BeginRendering(_) => "begin_rendering",
            GfxCommand::EndRendering => "end_rendering",
            GfxCommand::SetViewport(_) => "viewport",
            GfxCommand::SetScissor(_) => "scissor",
            GfxCommand::Draw { .. } => "draw",
            GfxCommand::Dispatch(_) => "dispatch",
            GfxCommand::ClearImage { .. } => "clear",
            GfxCommand::BeginLabel(_) => "label",
            GfxCommand::EndLabel => "end_label",
            _ => "other",
        })
        .collect()
}

fn compile(graph: RenderGraph) -> RgCompiledGraph {
    graph.compile(RgCompileOptions::default()).unwrap()
}

#[test]
fn read_after_read_records_no_barrier() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(64))
        .add_pass(RgPassDesc::new("write").image("a", GfxAccess::STORAGE_WRITE_COMPUTE))
        .add_pass(RgPassDesc::new("read0").image("a", GfxAccess::SAMPLED_FRAGMENT))
        .add_pass(RgPassDesc::new("read1").image("a", GfxAccess::SAMPLED_FRAGMENT));

    let compiled = compile(graph);
    assert!(compiled.pass_barriers(1).has_barriers());
    assert!(!compiled.pass_barriers(2).has_barriers());
}

#[test]
fn write_after_read_is_execution_only() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(64))
        .add_pass(RgPassDesc::new("write").image("a", GfxAccess::STORAGE_WRITE_COMPUTE))
        .add_pass(RgPassDesc::new("read").image("a", GfxAccess::SAMPLED_FRAGMENT))
        .add_pass(RgPassDesc::new("overwrite").image("a", GfxAccess::TRANSFER_WRITE));

    let compiled = compile(graph);
    let war = compiled.pass_barriers(2).find_image(0).unwrap();
    assert_eq!(war.src_state.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
    assert_eq!(war.to_gfx_barrier(vk::Image::null()).src_access, vk::AccessFlags2::NONE);
    assert_eq!(war.dst_state.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
}

fn cross_domain_graph() -> RenderGraph {
    let mut graph = RenderGraph::new("cross");
    graph
        .attach_transient_buffer("particles", RgBufferAttachment::new().size(4096))
        .add_pass(
            RgPassDesc::new("simulate")
                .on(QueueDomain::Compute)
                .buffer("particles", GfxAccess::STORAGE_WRITE_COMPUTE)
                .execute(|ctx| {
                    ctx.dispatch(glam::UVec3::new(16, 1, 1));
                }),
        )
        .add_pass(RgPassDesc::new("draw").buffer("particles", GfxAccess::VERTEX_ATTRIBUTE_READ));
    graph
}

#[test]
fn cross_domain_use_releases_in_earlier_batch() {
    let (device, ctx) = context();
    let compiled = compile(cross_domain_graph());

    let batches = compiled.submit_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].domain, QueueDomain::Compute);
    assert_eq!(batches[1].domain, QueueDomain::Graphics);
    assert_eq!(batches[1].waits, vec![0]);

    let release = compiled.pass_releases(0).find_buffer(0).unwrap();
    assert_eq!(release.transfer.map(|t| t.role), Some(RgTransferRole::Release));
    let acquire = compiled.pass_barriers(1).find_buffer(0).unwrap();
    assert_eq!(acquire.transfer.map(|t| t.role), Some(RgTransferRole::Acquire));

    let execution = compiled.execute(&ctx).unwrap();
    let submissions = device.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[1].waits, vec![execution.tickets[0]]);

    let transfers = |commands: &[GfxCommand]| -> Vec<(u32, u32)> {
        commands
            .iter()
            .filter_map(|command| match command {
                GfxCommand::PipelineBarrier { buffers, .. } => Some(buffers.clone()),
                _ => None,
            })
            .flatten()
            .filter(|b| b.src_queue_family != vk::QUEUE_FAMILY_IGNORED)
            .map(|b| (b.src_queue_family, b.dst_queue_family))
            .collect()
    };
    // compute 为 family 1，graphics 为 family 0
    assert_eq!(transfers(&submissions[0].commands), vec![(1, 0)]);
    assert_eq!(transfers(&submissions[1].commands), vec![(1, 0)]);
}

#[test]
fn same_family_transfer_becomes_plain_barrier() {
    let (device, ctx) = context_with(HeadlessDevice::with_queue_families([0, 0, 0]));
    compile(cross_domain_graph()).execute(&ctx).unwrap();

    let submissions = device.submissions();
    let buffer_barriers = |commands: &[GfxCommand]| -> Vec<weave_gfx::commands::barrier::GfxBufferBarrier> {
        commands
            .iter()
            .filter_map(|command| match command {
                GfxCommand::PipelineBarrier { buffers, .. } => Some(buffers.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    };

    // compute 上只剩第一次写入之前的 barrier
    assert_eq!(buffer_barriers(&submissions[0].commands).len(), 1);
    let acquire = buffer_barriers(&submissions[1].commands);
    assert_eq!(acquire.len(), 1);
    assert_eq!(acquire[0].src_queue_family, vk::QUEUE_FAMILY_IGNORED);
    assert_eq!(acquire[0].src_stage, vk::PipelineStageFlags2::ALL_COMMANDS);
    assert_eq!(acquire[0].dst_access, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);
}

#[test]
fn transient_read_before_write_fails_to_compile() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(64))
        .add_pass(RgPassDesc::new("read").image("a", GfxAccess::SAMPLED_FRAGMENT));
    let err = graph.compile(RgCompileOptions::default()).err().unwrap();
    assert!(matches!(err, RgCompileError::UnresolvedName { .. }));
}

#[test]
fn same_shape_as_fills_extent() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("hdr", RgImageAttachment::new().extent_2d(128, 96).format(vk::Format::R16G16B16A16_SFLOAT))
        .attach_image("bloom", RgImageAttachment::new())
        .inference_rule("bloom", RgInferenceRule::same_shape_as("hdr"))
        .add_pass(RgPassDesc::new("lighting").image("hdr", GfxAccess::STORAGE_WRITE_COMPUTE))
        .add_pass(
            RgPassDesc::new("bloom")
                .image("hdr", GfxAccess::SAMPLED_COMPUTE)
                .image("bloom", GfxAccess::STORAGE_WRITE_COMPUTE),
        );

    let compiled = compile(graph);
    let bloom = compiled.get_bound_attachment("bloom").unwrap();
    let info = bloom.image().unwrap();
    assert_eq!((info.extent.width, info.extent.height), (128, 96));
    assert_eq!(info.format, vk::Format::R16G16B16A16_SFLOAT);
    assert_eq!(compiled.get_bound_attachments().len(), 2);

    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("bloom", RgImageAttachment::new())
        .inference_rule("bloom", RgInferenceRule::same_shape_as("missing"))
        .add_pass(RgPassDesc::new("bloom").image("bloom", GfxAccess::STORAGE_WRITE_COMPUTE));
    let err = graph.compile(RgCompileOptions::default()).err().unwrap();
    assert!(matches!(err, RgCompileError::UnresolvedName { .. }));
}

#[test]
fn attachment_passes_share_a_scope_until_sampled() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("color", rgba8(256))
        .attach_image("post", rgba8(256))
        .add_pass(RgPassDesc::new("opaque").image("color", GfxAccess::COLOR_WRITE))
        .add_pass(RgPassDesc::new("transparent").image("color", GfxAccess::COLOR_RW))
        .add_pass(
            RgPassDesc::new("tonemap")
                .image("color", GfxAccess::SAMPLED_FRAGMENT)
                .image("post", GfxAccess::COLOR_WRITE),
        )
        .add_pass(RgPassDesc::new("ui").image("post", GfxAccess::COLOR_RW));

    let compiled = compile(graph);
    let scopes = compiled.render_scopes();
    // tonemap 带有采样访问，ui 不能并入它的 scope
    let ranges: Vec<_> = scopes.iter().map(|s| (s.first, s.last)).collect();
    assert_eq!(ranges, vec![(0, 1), (2, 2), (3, 3)]);
    assert_eq!(scopes[0].colors[0].load_op, vk::AttachmentLoadOp::DONT_CARE);
    // color 之后还要被采样
    assert_eq!(scopes[0].colors[0].store_op, vk::AttachmentStoreOp::STORE);
    assert_eq!(scopes[1].colors[0].store_op, vk::AttachmentStoreOp::STORE);
    assert_eq!(scopes[2].colors[0].load_op, vk::AttachmentLoadOp::LOAD);
    assert_eq!(scopes[2].colors[0].store_op, vk::AttachmentStoreOp::DONT_CARE);
    assert!(!compiled.pass_barriers(1).has_barriers());

    // color 写入之后采样：COLOR_ATTACHMENT_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL
    let color = compiled.resolve_name("color").unwrap();
    let transition = compiled.pass_barriers(2).find_image(color).unwrap();
    assert_eq!(transition.src_state.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    assert_eq!(transition.dst_state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(transition.src_state.stage, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
    assert_eq!(transition.dst_state.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
}

#[test]
fn barriers_never_land_inside_a_rendering_scope() {
    let (device, ctx) = context();
    let usage = vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER;
    let buffer = device.create_buffer(&GfxBufferCreateInfo::new(1024, usage, GfxMemoryUsage::GpuOnly), "b").unwrap();

    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("c", rgba8(64))
        .attach_buffer("b", buffer)
        .add_pass(
            RgPassDesc::new("p1")
                .image("c", GfxAccess::COLOR_WRITE)
                .buffer("b", GfxAccess::VERTEX_ATTRIBUTE_READ),
        )
        .add_pass(RgPassDesc::new("p2").image("c", GfxAccess::COLOR_RW))
        .add_pass(
            RgPassDesc::new("p3")
                .on(QueueDomain::Compute)
                .buffer("b", GfxAccess::STORAGE_WRITE_COMPUTE),
        );

    let compiled = compile(graph);
    // p1 的 release 只能录制在 scope 之外
    assert!(compiled.pass_releases(0).has_barriers());
    let ranges: Vec<_> = compiled.render_scopes().iter().map(|s| (s.first, s.last)).collect();
    assert_eq!(ranges, vec![(0, 0), (1, 1)]);

    compiled.execute(&ctx).unwrap();
    let p1 = GfxCommand::BeginLabel("p1".to_string());
    let graphics = device.submissions().into_iter().find(|s| s.commands.contains(&p1)).unwrap();
    assert_eq!(kinds(&graphics.commands).iter().filter(|&&k| k == "begin_rendering").count(), 2);
    let mut inside = false;
    for command in &graphics.commands {
        match command {
            GfxCommand::BeginRendering(_) => inside = true,
            GfxCommand::EndRendering => inside = false,
            GfxCommand::PipelineBarrier { .. } => assert!(!inside, "barrier recorded inside a rendering scope"),
            _ => {}
        }
    }
}

#[test]
fn disjoint_transients_share_memory() {
    let (device, ctx) = context();
    let out = external_image(&device, vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED);

    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(64))
        .attach_image("b", rgba8(64))
        .attach_external_image("out", out, GfxAccess::SAMPLED_FRAGMENT)
        .add_pass(RgPassDesc::new("fill_a").image("a", GfxAccess::TRANSFER_WRITE))
        .add_pass(
            RgPassDesc::new("copy_a")
                .image("a", GfxAccess::TRANSFER_READ)
                .image("out", GfxAccess::TRANSFER_WRITE),
        )
        .add_pass(RgPassDesc::new("fill_b").image("b", GfxAccess::TRANSFER_WRITE))
        .add_pass(
            RgPassDesc::new("copy_b")
                .image("b", GfxAccess::TRANSFER_READ)
                .image("out", GfxAccess::TRANSFER_WRITE),
        );

    let compiled = compile(graph);
    assert_eq!(compiled.alias_slot("a"), compiled.alias_slot("b"));
    assert_eq!(compiled.alias_slot("out"), None);
    assert_eq!(compiled.alias_slot_count(), 1);

    compiled.execute(&ctx).unwrap();
    // 外部 image 加上一个 slot
    assert_eq!(device.construction_count(HeadlessObjectKind::Image), 2);
}

fn producer() -> RenderGraph {
    let mut graph = RenderGraph::new("upload");
    graph.attach_image("out", rgba8(32)).add_pass(
        RgPassDesc::new("upload_write")
            .image("out", GfxAccess::TRANSFER_WRITE)
            .execute(|ctx| {
                ctx.clear_image("out", GfxClearValue::BLACK);
            }),
    );
    graph
}

#[test]
fn shared_fragment_runs_once() {
    let (device, ctx) = context();
    let shared = RgSharedFragment::new(producer());

    let mut root = RenderGraph::new("root");
    root.attach_in("x", RgFuture::shared(&shared, "out"))
        .attach_in("y", RgFuture::shared(&shared, "out"))
        .attach_image("target", rgba8(32))
        .add_pass(
            RgPassDesc::new("consume_x")
                .image("x", GfxAccess::SAMPLED_FRAGMENT)
                .image("target", GfxAccess::COLOR_WRITE),
        )
        .add_pass(
            RgPassDesc::new("consume_y")
                .image("y", GfxAccess::SAMPLED_FRAGMENT)
                .image("target", GfxAccess::COLOR_RW),
        );

    let compiled = compile(root);
    assert_eq!(
        compiled.execution_names(),
        vec![Name::new("upload_write"), Name::new("consume_x"), Name::new("consume_y")]
    );
    let execution = compiled.execute(&ctx).unwrap();
    drop(compiled);

    // 共享片段的输出单独分配
    assert_eq!(execution.dedicated.len(), 1);
    assert!(shared.is_submitted());
    let value = shared.output("out").unwrap();
    assert_eq!(value.last_access, GfxAccess::SAMPLED_FRAGMENT);
    assert_eq!(value.resource, execution.dedicated[0]);

    // 之后的图直接使用结果，不再录制上传
    device.clear_submissions();
    let mut later = RenderGraph::new("later");
    later
        .attach_in("tex", RgFuture::shared(&shared, "out"))
        .attach_image("target", rgba8(32))
        .add_pass(
            RgPassDesc::new("consume")
                .image("tex", GfxAccess::SAMPLED_FRAGMENT)
                .image("target", GfxAccess::COLOR_WRITE),
        );
    let compiled = compile(later);
    assert_eq!(compiled.execution_names(), vec![Name::new("consume")]);
    compiled.execute(&ctx).unwrap();
    let labels: Vec<_> = device
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            GfxCommand::BeginLabel(label) => Some(label),
            _ => None,
        })
        .collect();
    assert!(labels.iter().all(|label| label != "upload_write"));
}

fn frame_graph(swapchain: GfxSwapchainImage) -> RenderGraph {
    let mut graph = RenderGraph::new("frame");
    graph
        .attach_swapchain("swapchain", swapchain)
        .attach_and_clear_image(
            "depth",
            RgImageAttachment::new().format(vk::Format::D32_SFLOAT),
            GfxClearValue::DEPTH_ONE,
        )
        .add_pass(
            RgPassDesc::new("forward")
                .image("swapchain", GfxAccess::COLOR_WRITE)
                .image("depth", GfxAccess::DEPTH_STENCIL_RW)
                .execute(|ctx| {
                    ctx.set_viewport_full(0).set_scissor_full(0).draw(3, 1, 0, 0);
                }),
        );
    graph
}

#[test]
fn frame_records_barriers_scopes_and_labels_in_order() {
    let (device, mut ctx) = context();
    let swapchain = GfxSwapchainImage {
        image: external_image(&device, vk::ImageUsageFlags::COLOR_ATTACHMENT),
        image_index: 0,
    };

    let compiled = frame_graph(swapchain).compile(RgCompileOptions::default().dump_plan(true)).unwrap();
    compiled.execute(&ctx).unwrap();

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(
        kinds(&submissions[0].commands),
        vec![
            "label",
            "barrier",
            "begin_rendering",
            "label",
            "viewport",
            "scissor",
            "draw",
            "end_label",
            "end_rendering",
            "end_label"
        ]
    );
    assert_eq!(submissions[0].commands[3], GfxCommand::BeginLabel("forward".to_string()));

    let GfxCommand::BeginRendering(info) = &submissions[0].commands[2] else {
        panic!("expected begin_rendering");
    };
    assert_eq!(info.extent, swapchain.image.extent_2d());
    assert_eq!(info.color_attachments[0].image, swapchain.image.handle());
    assert_eq!(info.color_attachments[0].load_op, vk::AttachmentLoadOp::DONT_CARE);
    assert_eq!(info.color_attachments[0].store_op, vk::AttachmentStoreOp::STORE);
    let depth = info.depth_attachment.unwrap();
    assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
    assert_eq!(depth.clear_value, Some(GfxClearValue::DEPTH_ONE));
    assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);

    // 图结束时 swapchain 转换到 present
    assert_eq!(kinds(&submissions[1].commands), vec!["label", "barrier", "end_label"]);
    let GfxCommand::PipelineBarrier { images, .. } = &submissions[1].commands[1] else {
        panic!("expected barrier");
    };
    assert_eq!(images[0].new_layout, vk::ImageLayout::PRESENT_SRC_KHR);

    // 回到同一个 frame slot 之后，相同的图复用缓存的 transient
    let images_before = device.construction_count(HeadlessObjectKind::Image);
    for _ in 0..ctx.config().frames_in_flight {
        ctx.begin_frame().unwrap();
    }
    frame_graph(swapchain).compile(RgCompileOptions::default()).unwrap().execute(&ctx).unwrap();
    assert_eq!(device.construction_count(HeadlessObjectKind::Image), images_before);
}

#[test]
fn graphs_in_one_frame_do_not_share_transients() {
    let (device, ctx) = context();
    let swapchain = GfxSwapchainImage {
        image: external_image(&device, vk::ImageUsageFlags::COLOR_ATTACHMENT),
        image_index: 0,
    };
    compile(frame_graph(swapchain)).execute(&ctx).unwrap();
    compile(frame_graph(swapchain)).execute(&ctx).unwrap();
    // swapchain 和两份 depth
    assert_eq!(device.construction_count(HeadlessObjectKind::Image), 3);
}

#[test]
fn final_version_reads_can_form_a_cycle() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(16))
        .attach_image("b", rgba8(16))
        .add_pass(
            RgPassDesc::new("pa")
                .image("b+", GfxAccess::SAMPLED_FRAGMENT)
                .image("a", GfxAccess::STORAGE_WRITE_FRAGMENT),
        )
        .add_pass(
            RgPassDesc::new("pb")
                .image("a+", GfxAccess::SAMPLED_FRAGMENT)
                .image("b", GfxAccess::STORAGE_WRITE_FRAGMENT),
        );

    let err = graph.compile(RgCompileOptions::default()).err().unwrap();
    let RgCompileError::CycleDetected { passes } = err else {
        panic!("expected a cycle, got {:?}", err);
    };
    assert!(passes.contains(&Name::new("pa")));
    assert!(passes.contains(&Name::new("pb")));
}

#[test]
fn independent_passes_keep_declaration_order() {
    let build = || {
        let mut graph = RenderGraph::new("g");
        for name in ["shadow", "gbuffer", "ao"] {
            graph
                .attach_image(name, rgba8(32))
                .add_pass(RgPassDesc::new(name).image(name, GfxAccess::STORAGE_WRITE_COMPUTE));
        }
        graph
    };
    let expected = vec![Name::new("shadow"), Name::new("gbuffer"), Name::new("ao")];
    let (first, second) = (compile(build()), compile(build()));
    assert_eq!(first.execution_names(), expected);
    assert_eq!(second.execution_names(), expected);
    assert_eq!(first.get_use_chains(), second.get_use_chains());
}

#[test]
fn identical_graphs_compile_to_identical_use_chains() {
    let build = || {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("color", rgba8(64))
            .attach_image("blur", rgba8(64))
            .add_pass(RgPassDesc::new("draw").image("color", GfxAccess::COLOR_WRITE))
            .add_pass(
                RgPassDesc::new("blur")
                    .on(QueueDomain::Compute)
                    .image("color", GfxAccess::SAMPLED_COMPUTE)
                    .image("blur", GfxAccess::STORAGE_WRITE_COMPUTE),
            )
            .add_pass(
                RgPassDesc::new("composite")
                    .image("blur", GfxAccess::SAMPLED_FRAGMENT)
                    .image("color", GfxAccess::COLOR_RW),
            );
        graph
    };
    let (first, second) = (compile(build()), compile(build()));
    assert_eq!(first.execution_names(), second.execution_names());
    assert_eq!(first.get_use_chains(), second.get_use_chains());

    let color: Vec<_> = first.get_use_chain("color").unwrap().iter().map(|u| u.pass_name).collect();
    assert_eq!(color, vec![Name::new("draw"), Name::new("blur"), Name::new("composite")]);
}

#[test]
fn writes_then_read_keep_declaration_order() {
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(16))
        .add_pass(RgPassDesc::new("w1").image("a", GfxAccess::TRANSFER_WRITE))
        .add_pass(RgPassDesc::new("w2").image("a", GfxAccess::STORAGE_WRITE_COMPUTE))
        .add_pass(RgPassDesc::new("r").image("a", GfxAccess::SAMPLED_FRAGMENT));
    let expected = vec![Name::new("w1"), Name::new("w2"), Name::new("r")];
    assert_eq!(compile(graph).execution_names(), expected);

    // 读取最终版本的 pass 即使先声明，也排在所有写入之后
    let mut graph = RenderGraph::new("g");
    graph
        .attach_image("a", rgba8(16))
        .add_pass(RgPassDesc::new("r").image("a+", GfxAccess::SAMPLED_FRAGMENT))
        .add_pass(RgPassDesc::new("w1").image("a", GfxAccess::TRANSFER_WRITE))
        .add_pass(RgPassDesc::new("w2").image("a", GfxAccess::STORAGE_WRITE_COMPUTE));
    let compiled = compile(graph);
    assert_eq!(compiled.execution_names(), expected);
    let chain: Vec<_> = compiled.get_use_chain("a").unwrap().iter().map(|u| u.pass_name).collect();
    assert_eq!(chain, expected);
}

#[test]
fn future_output_resolves_to_final_version() {
    let mut fragment = RenderGraph::new("fragment");
    fragment
        .attach_image("X", rgba8(32))
        .add_pass(RgPassDesc::new("pass1").image("X", GfxAccess::TRANSFER_WRITE))
        .add_pass(
            RgPassDesc::new("pass2")
                .on(QueueDomain::Compute)
                .image("X", GfxAccess::STORAGE_READ_COMPUTE)
                .image("X+", GfxAccess::STORAGE_WRITE_COMPUTE),
        );

    let mut parent = RenderGraph::new("parent");
    parent
        .attach_in("Y", RgFuture::new(fragment, "X+"))
        .attach_image("target", rgba8(32))
        .add_pass(
            RgPassDesc::new("consume")
                .image("Y", GfxAccess::SAMPLED_FRAGMENT)
                .image("target", GfxAccess::COLOR_WRITE),
        );

    let compiled = compile(parent);
    assert_eq!(
        compiled.execution_names(),
        vec![Name::new("pass1"), Name::new("pass2"), Name::new("consume")]
    );
    let chain = compiled.get_use_chain("Y").unwrap();
    let passes: Vec<_> = chain.iter().map(|u| u.pass_name).collect();
    assert_eq!(passes, vec![Name::new("pass1"), Name::new("pass2"), Name::new("consume")]);
    assert_eq!(chain[1].access, GfxAccess::STORAGE_READ_COMPUTE | GfxAccess::STORAGE_WRITE_COMPUTE);
    assert_eq!(chain[2].access, GfxAccess::SAMPLED_FRAGMENT);
}

#[test]
fn wait_for_futures_returns_final_states() {
    let (device, ctx) = context();
    let values = wait_for_futures(&ctx, vec![RgFuture::new(producer(), "out")]).unwrap();

    assert_eq!(values.len(), 1);
    let value = values[0];
    assert_eq!(value.last_access, GfxAccess::TRANSFER_WRITE);
    assert!(value.resource.image().is_some());
    let ticket = value.ticket.unwrap();
    assert!(device.is_complete(ticket).unwrap());
}

#[test]
fn pass_errors_and_failed_construction_surface_from_execute() {
    let (device, ctx) = context();

    let mut graph = RenderGraph::new("g");
    graph.attach_image("a", rgba8(16)).add_pass(
        RgPassDesc::new("bad")
            .image("a", GfxAccess::TRANSFER_WRITE)
            .execute(|ctx| {
                ctx.clear_image("undeclared", GfxClearValue::BLACK);
            }),
    );
    let err = compile(graph).execute(&ctx).err().unwrap();
    assert!(matches!(err, RgError::Compile(RgCompileError::UnresolvedName { .. })));
    assert!(!err.is_fatal());

    device.fail_next(HeadlessObjectKind::Image, "out of device memory");
    let compiled = compile(producer());
    assert!(matches!(compiled.execute(&ctx), Err(RgError::CacheConstruction(_))));
    // 下一次执行重新构造
    assert!(compiled.execute(&ctx).is_ok());
}

#[test]
fn failed_recording_submits_nothing() {
    let (device, ctx) = context();

    let mut graph = RenderGraph::new("g");
    graph
        .attach_transient_buffer("particles", RgBufferAttachment::new().size(4096))
        .add_pass(
            RgPassDesc::new("sim")
                .on(QueueDomain::Compute)
                .buffer("particles", GfxAccess::STORAGE_WRITE_COMPUTE),
        )
        .add_pass(
            RgPassDesc::new("bad")
                .buffer("particles", GfxAccess::VERTEX_ATTRIBUTE_READ)
                .execute(|ctx| {
                    ctx.clear_image("undeclared", GfxClearValue::BLACK);
                }),
        );
    let compiled = compile(graph);
    assert_eq!(compiled.submit_batches().len(), 2);

    let err = compiled.execute(&ctx).err().unwrap();
    assert!(matches!(err, RgError::Compile(RgCompileError::UnresolvedName { .. })));
    // compute batch 的 release 没有对应的 acquire，不能单独提交
    assert!(device.submissions().is_empty());
    assert_eq!(device.unsubmitted_count(), 0);
}
