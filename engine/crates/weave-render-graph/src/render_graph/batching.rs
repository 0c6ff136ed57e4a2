//! dynamic rendering scope 的合批
//!
//! 执行顺序上相邻、在同一个 domain、使用完全相同附件、并且只有附件访问的 pass 放进同一个 rendering scope。
//! 后一个 pass 之前只能有同一附件、同一 layout 的 barrier（光栅化顺序已经保证了它们的顺序），
//! 这些 barrier 在合并后被丢弃；其他任何 barrier 都会打断合批。
//!
//! scope 内部不能录制 barrier，所以前一个 pass 带有 post barrier 时 scope 在它之后结束。

use ash::vk;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::image::GfxClearValue;

use super::barrier::RgPassBarriers;
use super::error::RgCompileError;
use super::inference::RgResourceDesc;
use super::resolve::{RgResolvedGraph, RgResolvedUse};
use super::resource::{RgAttachment, RgResourceKind};
use super::use_chain::RgUse;

/// scope 中的一个附件
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgScopeAttachment {
    pub resource: usize,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear: Option<GfxClearValue>,
}

/// 一个 rendering scope，覆盖执行顺序中 `[first, last]` 的 pass
#[derive(Clone, Debug, PartialEq)]
pub struct RgRenderScope {
    pub first: usize,
    pub last: usize,
    pub domain: QueueDomain,
    pub extent: vk::Extent2D,
    pub layer_count: u32,
    pub samples: vk::SampleCountFlags,
    pub colors: Vec<RgScopeAttachment>,
    pub depth: Option<RgScopeAttachment>,
}
impl RgScopeAttachment {
    #[inline]
    fn same_target(&self, other: &Self) -> bool {
        self.resource == other.resource && self.layout == other.layout
    }
}
impl RgRenderScope {
    #[inline]
    pub fn contains(&self, pos: usize) -> bool {
        (self.first..=self.last).contains(&pos)
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn attachments(&self) -> impl Iterator<Item = &RgScopeAttachment> {
        self.colors.iter().chain(self.depth.iter())
    }

    fn can_join(&self, next: &RgRenderScope) -> bool {
        self.last + 1 == next.first
            && self.domain == next.domain
            && self.extent == next.extent
            && self.layer_count == next.layer_count
            && self.samples == next.samples
            && self.colors.len() == next.colors.len()
            && self.colors.iter().zip(&next.colors).all(|(a, b)| a.same_target(b))
            && match (&self.depth, &next.depth) {
                (Some(a), Some(b)) => a.same_target(b),
                (None, None) => true,
                _ => false,
            }
            && next.attachments().all(|a| a.clear.is_none())
    }

    /// 合并之后 `barriers` 可以丢弃
    fn barriers_are_local(&self, barriers: &RgPassBarriers) -> bool {
        barriers.buffer_barriers.is_empty()
            && barriers.image_barriers.iter().all(|b| {
                b.transfer.is_none()
                    && b.src_state.layout == b.dst_state.layout
                    && self.attachments().any(|a| a.resource == b.resource)
            })
    }
}

/// pass 的每个访问都是图像附件
fn is_attachment_only(resolved: &RgResolvedGraph, pass_index: usize) -> bool {
    resolved.passes[pass_index]
        .uses
        .iter()
        .all(|u| u.access.is_attachment_only() && resolved.resources[u.resource].kind() == RgResourceKind::Image)
}

/// 单个 pass 的 scope，pass 没有附件时为 `None`
fn pass_scope(
    resolved: &RgResolvedGraph,
    pass_index: usize,
    pos: usize,
    chains: &[Vec<RgUse>],
    descs: &[Option<RgResourceDesc>],
) -> Result<Option<RgRenderScope>, RgCompileError> {
    let pass = &resolved.passes[pass_index];
    let attachments: Vec<&RgResolvedUse> = pass
        .uses
        .iter()
        .filter(|u| u.access.is_attachment() && resolved.resources[u.resource].kind() == RgResourceKind::Image)
        .collect();
    if attachments.is_empty() {
        return Ok(None);
    }

    let mut shape: Option<(vk::Extent3D, u32, vk::SampleCountFlags)> = None;
    let mut colors = Vec::new();
    let mut depth = None;
    for u in attachments {
        let resource = &resolved.resources[u.resource];
        let Some(info) = descs[u.resource].as_ref().and_then(|d| d.image()) else {
            continue;
        };
        let this_shape = (info.extent, info.array_layers, info.samples);
        match shape {
            None => shape = Some(this_shape),
            Some(existing) if existing != this_shape => {
                return Err(RgCompileError::conflicting(
                    resource.name,
                    format!("attachments of pass \"{}\" differ in extent, layers or samples", pass.name),
                ));
            }
            Some(_) => {}
        }

        let attachment = RgScopeAttachment {
            resource: u.resource,
            layout: u.access.image_layout(),
            load_op: load_op(resolved, chains, u, pos),
            store_op: vk::AttachmentStoreOp::STORE,
            clear: u.clear,
        };
        if u.access.is_depth_stencil() {
            if depth.replace(attachment).is_some() {
                return Err(RgCompileError::conflicting(
                    resource.name,
                    format!("pass \"{}\" has more than one depth attachment", pass.name),
                ));
            }
        } else {
            colors.push(attachment);
        }
    }

    let Some((extent, layer_count, samples)) = shape else {
        return Ok(None);
    };
    Ok(Some(RgRenderScope {
        first: pos,
        last: pos,
        domain: pass.domain,
        extent: vk::Extent2D {
            width: extent.width,
            height: extent.height,
        },
        layer_count,
        samples,
        colors,
        depth,
    }))
}

fn load_op(resolved: &RgResolvedGraph, chains: &[Vec<RgUse>], u: &RgResolvedUse, pos: usize) -> vk::AttachmentLoadOp {
    if u.clear.is_some() {
        return vk::AttachmentLoadOp::CLEAR;
    }
    let attachment = &resolved.resources[u.resource].binding.attachment;
    let written_before = chains[u.resource].iter().any(|prev| prev.pass < pos);
    let has_contents = attachment.has_contents() && !matches!(attachment, RgAttachment::Swapchain(_));
    if written_before || has_contents {
        vk::AttachmentLoadOp::LOAD
    } else {
        vk::AttachmentLoadOp::DONT_CARE
    }
}

/// scope 之后不再需要内容的 transient 附件不必写回
fn finish_store_ops(resolved: &RgResolvedGraph, chains: &[Vec<RgUse>], scope: &mut RgRenderScope) {
    let last = scope.last;
    let store_op = |resource: usize| {
        let r = &resolved.resources[resource];
        let used_later = chains[resource].iter().any(|u| u.pass > last);
        if r.binding.attachment.is_transient() && !r.exported && r.release.is_none() && !used_later {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        }
    };
    for attachment in scope.colors.iter_mut().chain(scope.depth.iter_mut()) {
        attachment.store_op = store_op(attachment.resource);
    }
}

/// 划分 rendering scope，被合并的 pass 之前的 barrier 会被清空
pub(crate) fn build_render_scopes(
    resolved: &RgResolvedGraph,
    order: &[usize],
    chains: &[Vec<RgUse>],
    descs: &[Option<RgResourceDesc>],
    pre: &mut [RgPassBarriers],
    post: &[RgPassBarriers],
) -> Result<Vec<RgRenderScope>, RgCompileError> {
    let _span = weave_crate_tools::profile_span!("RenderGraph::build_render_scopes");

    let mut scopes: Vec<RgRenderScope> = Vec::new();
    // 当前 scope 中的 pass 都只有附件访问
    let mut open = false;
    for (pos, &pass_index) in order.iter().enumerate() {
        let Some(scope) = pass_scope(resolved, pass_index, pos, chains, descs)? else {
            continue;
        };
        let attachment_only = is_attachment_only(resolved, pass_index);

        if let Some(current) = scopes.last_mut() {
            if open
                && attachment_only
                && current.can_join(&scope)
                && !post[current.last].has_barriers()
                && current.barriers_are_local(&pre[pos])
            {
                log::trace!(
                    "pass {} joins rendering scope starting at {}",
                    resolved.passes[pass_index].name,
                    current.first
                );
                pre[pos] = RgPassBarriers::new();
                current.last = pos;
                continue;
            }
        }
        open = attachment_only;
        scopes.push(scope);
    }

    for scope in &mut scopes {
        finish_store_ops(resolved, chains, scope);
    }
    Ok(scopes)
}
