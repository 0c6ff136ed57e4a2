//! 附件参数推导
//!
//! transient 资源只需要给出部分参数，剩下的通过推导规则从其他资源补全：
//!
//! - 显式规则：`same_shape_as` / `same_format_as` / ... 以及自定义闭包
//! - 隐式规则：同一个 pass 的所有附件具有相同的 extent 和 samples
//!
//! 规则反复应用直到不再变化，之后补全默认值。仍然缺少 extent 或 format 的资源编译失败。
//! usage 由 use chain 决定，不参与推导。

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::resources::buffer::GfxBufferCreateInfo;
use weave_gfx::resources::image::{GfxImageCreateInfo, is_depth_format};

use super::attachment::{RgBufferAttachment, RgImageAttachment, RgInferenceRule};
use super::error::RgCompileError;
use super::graph::FragmentId;
use super::merge::RgScopedName;
use super::resolve::{RgNameTable, RgResolvedGraph};
use super::resource::{RgAttachment, RgPhysicalResource, RgResourceKind};
use super::use_chain::{RgUse, compute_buffer_usage, compute_usage};

/// 推导闭包中查询其他资源当前已知参数的入口
///
/// 名字在规则所在的片段中解析。
pub struct RgInferenceContext<'a> {
    fragment: FragmentId,
    names: &'a RgNameTable,
    images: &'a [Option<RgImageAttachment>],
    buffers: &'a [Option<RgBufferAttachment>],
}
impl RgInferenceContext<'_> {
    pub fn image(&self, name: impl Into<Name>) -> Option<&RgImageAttachment> {
        let resource = self.names.resolve(RgScopedName::new(self.fragment, name.into())).ok()?;
        self.images.get(resource)?.as_ref()
    }

    pub fn buffer(&self, name: impl Into<Name>) -> Option<&RgBufferAttachment> {
        let resource = self.names.resolve(RgScopedName::new(self.fragment, name.into())).ok()?;
        self.buffers.get(resource)?.as_ref()
    }
}

/// 推导完成之后资源的创建参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgResourceDesc {
    Image(GfxImageCreateInfo),
    Buffer(GfxBufferCreateInfo),
}
impl RgResourceDesc {
    #[inline]
    pub fn image(&self) -> Option<&GfxImageCreateInfo> {
        match self {
            Self::Image(info) => Some(info),
            Self::Buffer(_) => None,
        }
    }

    #[inline]
    pub fn buffer(&self) -> Option<&GfxBufferCreateInfo> {
        match self {
            Self::Buffer(info) => Some(info),
            Self::Image(_) => None,
        }
    }

    /// 除了 usage 之外完全相同
    pub fn matches_except_usage(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Image(a), Self::Image(b)) => {
                GfxImageCreateInfo {
                    usage: b.usage,
                    ..*a
                } == *b
            }
            (Self::Buffer(a), Self::Buffer(b)) => {
                GfxBufferCreateInfo {
                    usage: b.usage,
                    ..*a
                } == *b
            }
            _ => false,
        }
    }

    /// 合并另一个描述的 usage
    pub fn union_usage(&mut self, other: &Self) {
        match (self, other) {
            (Self::Image(a), Self::Image(b)) => a.usage |= b.usage,
            (Self::Buffer(a), Self::Buffer(b)) => a.usage |= b.usage,
            _ => {}
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        match self {
            Self::Image(info) => info.aspect(),
            Self::Buffer(_) => vk::ImageAspectFlags::empty(),
        }
    }
}

/// 一条已经解析出源资源的规则
struct RgBoundRule<'a> {
    target: usize,
    source: Option<usize>,
    fragment: FragmentId,
    rule: &'a RgInferenceRule,
}

fn initial_shapes(resolved: &RgResolvedGraph) -> (Vec<Option<RgImageAttachment>>, Vec<Option<RgBufferAttachment>>) {
    let mut images = vec![None; resolved.resources.len()];
    let mut buffers = vec![None; resolved.resources.len()];
    for (index, resource) in resolved.resources.iter().enumerate() {
        match &resource.binding.attachment {
            RgAttachment::TransientImage(attachment) => images[index] = Some(*attachment),
            RgAttachment::TransientBuffer(attachment) => buffers[index] = Some(*attachment),
            RgAttachment::ExternalImage { image, .. } => images[index] = Some(RgImageAttachment::from_image(image)),
            RgAttachment::Swapchain(swapchain) => images[index] = Some(RgImageAttachment::from_image(&swapchain.image)),
            RgAttachment::ExternalBuffer { buffer, .. } => {
                buffers[index] = Some(RgBufferAttachment::new().size(buffer.size()).memory(buffer.info().memory))
            }
            RgAttachment::Materialized(value) => match value.resource {
                RgPhysicalResource::Image(image) => images[index] = Some(RgImageAttachment::from_image(&image)),
                RgPhysicalResource::Buffer(buffer) => {
                    buffers[index] = Some(RgBufferAttachment::new().size(buffer.size()).memory(buffer.info().memory))
                }
            },
        }
    }
    (images, buffers)
}

fn bind_rules(resolved: &RgResolvedGraph) -> Result<Vec<RgBoundRule<'_>>, RgCompileError> {
    let mut bound = Vec::with_capacity(resolved.rules.len());
    for (target, fragment, rule) in &resolved.rules {
        let target_resource = &resolved.resources[*target];
        let source = match rule.source() {
            Some(source) => Some(resolved.names.resolve(RgScopedName::new(*fragment, source)).map_err(|_| {
                let reason = format!("referenced by the inference rule of {}", target_resource.name);
                RgCompileError::unresolved(source, reason)
            })?),
            None => None,
        };

        let expected = match rule {
            RgInferenceRule::SameSizeAs(_) | RgInferenceRule::Buffer(_) => RgResourceKind::Buffer,
            _ => RgResourceKind::Image,
        };
        let kinds_match = target_resource.kind() == expected
            && source.is_none_or(|source| resolved.resources[source].kind() == expected);
        if !kinds_match {
            return Err(RgCompileError::conflicting(
                target_resource.name,
                format!("inference rule {:?} needs {:?} resources", rule, expected),
            ));
        }

        bound.push(RgBoundRule {
            target: *target,
            source,
            fragment: *fragment,
            rule,
        });
    }
    Ok(bound)
}

fn fill<T: Copy + PartialEq>(target: &mut Option<T>, source: Option<T>) -> bool {
    if target.is_none() && source.is_some() {
        *target = source;
        return true;
    }
    false
}

/// 应用一条规则，返回是否有变化
fn apply_rule(
    rule: &RgBoundRule<'_>,
    names: &RgNameTable,
    images: &mut [Option<RgImageAttachment>],
    buffers: &mut [Option<RgBufferAttachment>],
) -> bool {
    let source_image = rule.source.and_then(|source| images[source]);
    let source_buffer = rule.source.and_then(|source| buffers[source]);

    match rule.rule {
        RgInferenceRule::Image(f) => {
            let Some(before) = images[rule.target] else {
                return false;
            };
            let mut after = before;
            let ctx = RgInferenceContext {
                fragment: rule.fragment,
                names,
                images,
                buffers,
            };
            f(&ctx, &mut after);
            images[rule.target] = Some(after);
            after != before
        }
        RgInferenceRule::Buffer(f) => {
            let Some(before) = buffers[rule.target] else {
                return false;
            };
            let mut after = before;
            let ctx = RgInferenceContext {
                fragment: rule.fragment,
                names,
                images,
                buffers,
            };
            f(&ctx, &mut after);
            buffers[rule.target] = Some(after);
            after != before
        }
        RgInferenceRule::SameSizeAs(_) => match (buffers[rule.target].as_mut(), source_buffer) {
            (Some(target), Some(source)) => fill(&mut target.size, source.size),
            _ => false,
        },
        _ => {
            let (Some(target), Some(source)) = (images[rule.target].as_mut(), source_image) else {
                return false;
            };
            match rule.rule {
                RgInferenceRule::SameShapeAs(_) => {
                    fill(&mut target.extent, source.extent)
                        | fill(&mut target.mip_levels, source.mip_levels)
                        | fill(&mut target.array_layers, source.array_layers)
                }
                RgInferenceRule::SameExtentAs(_) => fill(&mut target.extent, source.extent),
                RgInferenceRule::Same2dExtentAs(_) => fill(
                    &mut target.extent,
                    source.extent.map(|extent| vk::Extent3D {
                        depth: 1,
                        ..extent
                    }),
                ),
                RgInferenceRule::SameFormatAs(_) => fill(&mut target.format, source.format),
                RgInferenceRule::SimilarTo(_) => {
                    let changed = fill(&mut target.extent, source.extent)
                        | fill(&mut target.format, source.format)
                        | fill(&mut target.samples, source.samples)
                        | fill(&mut target.mip_levels, source.mip_levels)
                        | fill(&mut target.array_layers, source.array_layers);
                    if changed {
                        target.image_type = source.image_type;
                        target.view_type = source.view_type;
                    }
                    changed
                }
                _ => false,
            }
        }
    }
}

/// 同一个 pass 的附件具有相同的 extent 和 samples
fn apply_attachment_rule(
    resolved: &RgResolvedGraph,
    transient: &[bool],
    images: &mut [Option<RgImageAttachment>],
) -> bool {
    let mut changed = false;
    for pass in &resolved.passes {
        let attachments: Vec<usize> = pass
            .uses
            .iter()
            .filter(|u| u.access.is_attachment() && resolved.resources[u.resource].kind() == RgResourceKind::Image)
            .map(|u| u.resource)
            .collect();
        if attachments.len() < 2 {
            continue;
        }

        let extent = attachments.iter().find_map(|&r| images[r].and_then(|a| a.extent));
        let samples = attachments.iter().find_map(|&r| images[r].and_then(|a| a.samples));
        for &r in &attachments {
            if !transient[r] {
                continue;
            }
            if let Some(target) = images[r].as_mut() {
                changed |= fill(&mut target.extent, extent);
                changed |= fill(&mut target.samples, samples);
            }
        }
    }
    changed
}

/// 推导所有资源的创建参数
///
/// 没有任何使用的 transient 资源不需要分配，结果为 `None`。
pub(crate) fn infer(
    resolved: &RgResolvedGraph,
    chains: &[Vec<RgUse>],
) -> Result<Vec<Option<RgResourceDesc>>, RgCompileError> {
    let _span = weave_crate_tools::profile_span!("RenderGraph::infer");

    let (mut images, mut buffers) = initial_shapes(resolved);
    let transient: Vec<bool> = resolved.resources.iter().map(|r| r.binding.attachment.is_transient()).collect();
    let rules = bind_rules(resolved)?;

    // 自定义闭包可能永远在修改参数，限制轮数
    let max_rounds = 8 + resolved.resources.len() * 2;
    for round in 0..max_rounds {
        let mut changed = false;
        for rule in &rules {
            if transient[rule.target] {
                changed |= apply_rule(rule, &resolved.names, &mut images, &mut buffers);
            }
        }
        changed |= apply_attachment_rule(resolved, &transient, &mut images);
        if !changed {
            log::trace!("inference converged after {} rounds", round + 1);
            break;
        }
    }

    let mut descs = Vec::with_capacity(resolved.resources.len());
    for (index, resource) in resolved.resources.iter().enumerate() {
        let chain = &chains[index];
        let release_access = resource.release.map(|r| r.access).unwrap_or_default();

        let desc = match &resource.binding.attachment {
            RgAttachment::TransientImage(_) | RgAttachment::TransientBuffer(_) if chain.is_empty() => None,
            RgAttachment::TransientImage(_) => {
                let mut attachment = images[index].unwrap_or_default();
                attachment.fill_defaults();
                let missing = attachment.missing();
                if !missing.is_empty() {
                    return Err(RgCompileError::UnresolvedShape {
                        name: resource.name,
                        missing,
                    });
                }

                let usage = compute_usage(chain) | release_access.image_usage();
                check_image_usage(resource.name, &attachment, usage)?;
                attachment.to_create_info(usage).map(RgResourceDesc::Image)
            }
            RgAttachment::TransientBuffer(_) => {
                let attachment = buffers[index].unwrap_or_default();
                let usage = compute_buffer_usage(chain) | release_access.buffer_usage();
                match attachment.to_create_info(usage) {
                    Some(info) => Some(RgResourceDesc::Buffer(info)),
                    None => {
                        return Err(RgCompileError::UnresolvedShape {
                            name: resource.name,
                            missing: vec!["size"],
                        });
                    }
                }
            }
            RgAttachment::ExternalImage { image, .. } => Some(RgResourceDesc::Image(*image.info())),
            RgAttachment::Swapchain(swapchain) => Some(RgResourceDesc::Image(*swapchain.image.info())),
            RgAttachment::ExternalBuffer { buffer, .. } => Some(RgResourceDesc::Buffer(*buffer.info())),
            RgAttachment::Materialized(value) => match value.resource {
                RgPhysicalResource::Image(image) => Some(RgResourceDesc::Image(*image.info())),
                RgPhysicalResource::Buffer(buffer) => Some(RgResourceDesc::Buffer(*buffer.info())),
            },
        };
        descs.push(desc);
    }
    Ok(descs)
}

fn check_image_usage(
    name: Name,
    attachment: &RgImageAttachment,
    usage: vk::ImageUsageFlags,
) -> Result<(), RgCompileError> {
    let color = usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT);
    let depth = usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
    if color && depth {
        return Err(RgCompileError::conflicting(name, "used as both color and depth attachment"));
    }
    let depth_format = attachment.format.is_some_and(is_depth_format);
    if color && depth_format {
        return Err(RgCompileError::conflicting(name, "depth format used as color attachment"));
    }
    if depth && !depth_format {
        return Err(RgCompileError::conflicting(name, "color format used as depth attachment"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use weave_gfx::access::GfxAccess;

    use super::*;
    use crate::render_graph::future::CompilationId;
    use crate::render_graph::graph::RenderGraph;
    use crate::render_graph::merge::merge;
    use crate::render_graph::pass::RgPassDesc;
    use crate::render_graph::resolve::resolve;
    use crate::render_graph::use_chain::build_use_chains;

    fn infer_graph(graph: RenderGraph) -> Result<(RgResolvedGraph, Vec<Option<RgResourceDesc>>), RgCompileError> {
        let merged = merge(graph, CompilationId::next())?;
        let resolved = resolve(&merged, &[])?;
        let order: Vec<usize> = (0..resolved.passes.len()).collect();
        let chains = build_use_chains(&resolved.passes, &order, resolved.resources.len());
        let descs = infer(&resolved, &chains)?;
        Ok((resolved, descs))
    }

    fn image_info(descs: &[Option<RgResourceDesc>], index: usize) -> GfxImageCreateInfo {
        *descs[index].as_ref().and_then(|d| d.image()).unwrap()
    }

    #[test]
    fn same_shape_as_fills_extent() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("hdr", RgImageAttachment::new().extent_2d(1280, 720).format(vk::Format::R16G16B16A16_SFLOAT))
            .attach_image("bloom", RgImageAttachment::new().format(vk::Format::R16G16B16A16_SFLOAT))
            .inference_rule("bloom", RgInferenceRule::same_shape_as("hdr"))
            .add_pass(RgPassDesc::new("hdr").image("hdr", GfxAccess::COLOR_WRITE))
            .add_pass(
                RgPassDesc::new("bloom")
                    .on(weave_gfx::queue::QueueDomain::Graphics)
                    .image("hdr", GfxAccess::SAMPLED_FRAGMENT)
                    .image("bloom", GfxAccess::STORAGE_WRITE_FRAGMENT),
            );

        let (_, descs) = infer_graph(graph).unwrap();
        let bloom = image_info(&descs, 1);
        assert_eq!(bloom.extent, vk::Extent3D { width: 1280, height: 720, depth: 1 });
        assert_eq!(bloom.usage, vk::ImageUsageFlags::STORAGE);
        let hdr = image_info(&descs, 0);
        assert_eq!(hdr.usage, vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED);
    }

    #[test]
    fn missing_rule_source_is_unresolved() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("bloom", RgImageAttachment::new().format(vk::Format::R8G8B8A8_UNORM))
            .inference_rule("bloom", RgInferenceRule::same_shape_as("nowhere"))
            .add_pass(RgPassDesc::new("p").image("bloom", GfxAccess::STORAGE_WRITE_COMPUTE));
        match infer_graph(graph) {
            Err(RgCompileError::UnresolvedName { name, .. }) => assert_eq!(name, Name::new("nowhere")),
            other => panic!("unexpected {:?}", other.map(|(_, d)| d)),
        }
    }

    #[test]
    fn attachments_of_one_pass_share_extent() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("color", RgImageAttachment::new().extent_2d(640, 480).format(vk::Format::R8G8B8A8_UNORM))
            .attach_image("depth", RgImageAttachment::new().format(vk::Format::D32_SFLOAT))
            .add_pass(
                RgPassDesc::new("forward")
                    .image("color", GfxAccess::COLOR_WRITE)
                    .image("depth", GfxAccess::DEPTH_STENCIL_RW),
            );
        let (_, descs) = infer_graph(graph).unwrap();
        let depth = image_info(&descs, 1);
        assert_eq!(depth.extent.width, 640);
        assert_eq!(depth.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(depth.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
    }

    #[test]
    fn closure_rule_and_chained_inference() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("full", RgImageAttachment::new().extent_2d(512, 512).format(vk::Format::R8G8B8A8_UNORM))
            .attach_image("half", RgImageAttachment::new())
            .attach_image("half_copy", RgImageAttachment::new())
            // 规则的声明顺序与依赖顺序相反，需要多轮推导
            .inference_rule("half_copy", RgInferenceRule::similar_to("half"))
            .inference_rule(
                "half",
                RgInferenceRule::image(|ctx, target| {
                    if let Some(full) = ctx.image("full") {
                        target.extent = full.extent.map(|e| vk::Extent3D {
                            width: e.width / 2,
                            height: e.height / 2,
                            depth: 1,
                        });
                        target.format = full.format;
                    }
                }),
            )
            .add_pass(RgPassDesc::new("a").image("full", GfxAccess::TRANSFER_WRITE))
            .add_pass(RgPassDesc::new("b").image("half", GfxAccess::TRANSFER_WRITE))
            .add_pass(RgPassDesc::new("c").image("half_copy", GfxAccess::TRANSFER_WRITE));

        let (_, descs) = infer_graph(graph).unwrap();
        assert_eq!(image_info(&descs, 2).extent.width, 256);
        assert_eq!(image_info(&descs, 2).format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn shape_errors() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("a", RgImageAttachment::new().format(vk::Format::R8G8B8A8_UNORM))
            .add_pass(RgPassDesc::new("p").image("a", GfxAccess::STORAGE_WRITE_COMPUTE));
        assert_eq!(
            infer_graph(graph).err(),
            Some(RgCompileError::UnresolvedShape {
                name: Name::new("a"),
                missing: vec!["extent"],
            })
        );

        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("a", RgImageAttachment::new().extent_2d(4, 4).format(vk::Format::D32_SFLOAT))
            .add_pass(RgPassDesc::new("p").image("a", GfxAccess::DEPTH_STENCIL_WRITE))
            .add_pass(RgPassDesc::new("q").image("a", GfxAccess::COLOR_WRITE));
        assert!(matches!(infer_graph(graph), Err(RgCompileError::ConflictingUsage { .. })));
    }

    #[test]
    fn unused_transient_is_skipped() {
        let mut graph = RenderGraph::new("g");
        graph.attach_image("unused", RgImageAttachment::new());
        let (_, descs) = infer_graph(graph).unwrap();
        assert_eq!(descs, vec![None]);
    }

    #[test]
    fn matches_except_usage() {
        let a = RgResourceDesc::Image(GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D { width: 8, height: 8 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        ));
        let mut b = RgResourceDesc::Image(GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D { width: 8, height: 8 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::STORAGE,
        ));
        assert!(a.matches_except_usage(&b));
        b.union_usage(&a);
        assert_eq!(b.image().unwrap().usage, vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED);
    }
}
