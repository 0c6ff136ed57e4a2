//! Barrier 自动计算
//!
//! 沿着每个资源的 use chain 跟踪访问状态，在相邻的两次访问之间生成 image / buffer barrier。
//! 跨 queue domain 的访问生成一对 release / acquire barrier，并记录需要等待的 semaphore。

use ash::vk;
use weave_gfx::access::GfxAccess;
use weave_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use weave_gfx::queue::QueueDomain;
use weave_gfx::state::{GfxBufferState, GfxImageState};

use super::inference::RgResourceDesc;
use super::resolve::RgResolvedGraph;
use super::resource::{RgAttachment, RgResourceKind};
use super::use_chain::RgUse;

/// ownership transfer 中的哪一半
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgTransferRole {
    /// 在源 domain 上录制
    Release,
    /// 在目标 domain 上录制
    Acquire,
}

/// queue family ownership transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgQueueTransfer {
    pub src: QueueDomain,
    pub dst: QueueDomain,
    pub role: RgTransferRole,
}

/// 图像 Barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgImageBarrierDesc {
    /// 资源下标（RenderGraph 内部）
    pub resource: usize,
    pub src_state: GfxImageState,
    pub dst_state: GfxImageState,
    /// 图像 aspect（COLOR / DEPTH / STENCIL）
    pub aspect: vk::ImageAspectFlags,
    pub transfer: Option<RgQueueTransfer>,
}
impl RgImageBarrierDesc {
    pub fn new(resource: usize, src_state: GfxImageState, dst_state: GfxImageState) -> Self {
        Self {
            resource,
            src_state,
            dst_state,
            aspect: vk::ImageAspectFlags::COLOR,
            transfer: None,
        }
    }

    #[inline]
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    #[inline]
    pub fn with_transfer(mut self, transfer: RgQueueTransfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// 检查是否需要 barrier
    ///
    /// 同 layout 的只读到只读可以跳过。
    pub fn needs_barrier(&self) -> bool {
        if self.transfer.is_some() {
            return true;
        }

        // Layout 不同一定需要 barrier
        if self.src_state.layout != self.dst_state.layout {
            return true;
        }

        self.src_state.is_write() || self.dst_state.is_write()
    }

    /// 转换为 GfxImageBarrier，queue family 由执行阶段填写
    pub fn to_gfx_barrier(&self, image: vk::Image) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(image)
            .layout_transfer(self.src_state.layout, self.dst_state.layout)
            .src_mask(self.src_state.stage, self.src_state.src_access())
            .dst_mask(self.dst_state.stage, self.dst_state.access)
            .image_aspect_flag(self.aspect)
    }
}

/// 缓冲区 Barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgBufferBarrierDesc {
    pub resource: usize,
    pub src_state: GfxBufferState,
    pub dst_state: GfxBufferState,
    /// 缓冲区偏移
    pub offset: vk::DeviceSize,
    /// 缓冲区大小（WHOLE_SIZE 表示整个缓冲区）
    pub size: vk::DeviceSize,
    pub transfer: Option<RgQueueTransfer>,
}
impl RgBufferBarrierDesc {
    pub fn new(resource: usize, src_state: GfxBufferState, dst_state: GfxBufferState) -> Self {
        Self {
            resource,
            src_state,
            dst_state,
            offset: 0,
            size: vk::WHOLE_SIZE,
            transfer: None,
        }
    }

    #[inline]
    pub fn with_transfer(mut self, transfer: RgQueueTransfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    pub fn needs_barrier(&self) -> bool {
        self.transfer.is_some() || self.src_state.is_write() || self.dst_state.is_write()
    }

    pub fn to_gfx_barrier(&self, buffer: vk::Buffer) -> GfxBufferBarrier {
        GfxBufferBarrier::new()
            .buffer(buffer, self.offset, self.size)
            .src_mask(self.src_state.stage, self.src_state.src_access())
            .dst_mask(self.dst_state.stage, self.dst_state.access)
    }
}

/// 某个位置需要录制的 Barrier 集合
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgPassBarriers {
    pub image_barriers: Vec<RgImageBarrierDesc>,
    pub buffer_barriers: Vec<RgBufferBarrierDesc>,
}
impl RgPassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image_barrier(&mut self, barrier: RgImageBarrierDesc) {
        if barrier.needs_barrier() {
            self.image_barriers.push(barrier);
        }
    }

    pub fn add_buffer_barrier(&mut self, barrier: RgBufferBarrierDesc) {
        if barrier.needs_barrier() {
            self.buffer_barriers.push(barrier);
        }
    }

    pub fn has_barriers(&self) -> bool {
        !self.image_barriers.is_empty() || !self.buffer_barriers.is_empty()
    }

    pub fn image_barrier_count(&self) -> usize {
        self.image_barriers.len()
    }

    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barriers.len()
    }

    pub fn find_image(&self, resource: usize) -> Option<&RgImageBarrierDesc> {
        self.image_barriers.iter().find(|b| b.resource == resource)
    }

    pub fn find_buffer(&self, resource: usize) -> Option<&RgBufferBarrierDesc> {
        self.buffer_barriers.iter().find(|b| b.resource == resource)
    }
}

/// barrier 录制的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum RgBarrierSite {
    /// 所有 pass 之前，在给定 domain 上
    Prologue(QueueDomain),
    /// 执行顺序中的某个 pass：作为 consumer 时在 pass 之前，作为 producer 时在 pass 之后
    Pass(usize),
    /// 所有 pass 之后，在给定 domain 上
    Epilogue(QueueDomain),
}

/// 跨 domain 的依赖，consumer 所在的提交需要等待 producer 所在的提交
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RgCrossWait {
    pub producer: RgBarrierSite,
    pub producer_domain: QueueDomain,
    pub consumer: RgBarrierSite,
}

#[derive(Clone, Debug)]
pub(crate) struct RgBarrierPlan {
    /// 执行顺序中每个 pass 之前
    pub pre: Vec<RgPassBarriers>,
    /// 执行顺序中每个 pass 之后，只有 release
    pub post: Vec<RgPassBarriers>,
    pub prologue: [RgPassBarriers; 3],
    pub epilogue: [RgPassBarriers; 3],
    pub waits: Vec<RgCrossWait>,
    /// 图结束时每个资源的访问和所在 domain，没有被访问过的资源为 `None`
    pub final_states: Vec<Option<(GfxAccess, QueueDomain)>>,
}
impl RgBarrierPlan {
    fn new(pass_count: usize, resource_count: usize) -> Self {
        Self {
            pre: vec![RgPassBarriers::new(); pass_count],
            post: vec![RgPassBarriers::new(); pass_count],
            prologue: Default::default(),
            epilogue: Default::default(),
            waits: Vec::new(),
            final_states: vec![None; resource_count],
        }
    }

    fn barriers_before(&mut self, site: RgBarrierSite) -> &mut RgPassBarriers {
        match site {
            RgBarrierSite::Prologue(domain) => &mut self.prologue[domain.index()],
            RgBarrierSite::Pass(pos) => &mut self.pre[pos],
            RgBarrierSite::Epilogue(domain) => &mut self.epilogue[domain.index()],
        }
    }

    fn barriers_after(&mut self, site: RgBarrierSite) -> &mut RgPassBarriers {
        match site {
            RgBarrierSite::Prologue(domain) => &mut self.prologue[domain.index()],
            RgBarrierSite::Pass(pos) => &mut self.post[pos],
            RgBarrierSite::Epilogue(domain) => &mut self.epilogue[domain.index()],
        }
    }
}

/// 单个资源的状态跟踪
#[derive(Clone, Debug)]
pub(crate) struct RgStateTracker {
    resource: usize,
    /// buffer 为 `None`
    aspect: Option<vk::ImageAspectFlags>,
    layout: vk::ImageLayout,
    /// 最后一次写入（或进入图之前的写入）
    last_write: Option<GfxImageState>,
    /// 上次写入之后所有读取的 stage
    reader_stage: vk::PipelineStageFlags2,
    /// 上次写入之后已经可见的 stage / access
    visible_stage: vk::PipelineStageFlags2,
    visible_access: vk::AccessFlags2,
    contents: bool,
    owner: QueueDomain,
    last_pos: Option<usize>,
    last_access: GfxAccess,
}
impl RgStateTracker {
    /// `initial` 为空时资源没有内容
    pub fn new(
        resource: usize,
        aspect: Option<vk::ImageAspectFlags>,
        initial: GfxAccess,
        domain: QueueDomain,
        contents: bool,
    ) -> Self {
        let mut tracker = Self {
            resource,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
            last_write: None,
            reader_stage: vk::PipelineStageFlags2::NONE,
            visible_stage: vk::PipelineStageFlags2::NONE,
            visible_access: vk::AccessFlags2::NONE,
            contents,
            owner: domain,
            last_pos: None,
            last_access: initial,
        };
        if !initial.is_empty() {
            let state = tracker.state_of(initial);
            tracker.layout = state.layout;
            if initial.is_write() {
                tracker.last_write = Some(state);
            } else {
                tracker.reader_stage = state.stage;
            }
        }
        tracker
    }

    /// 复用了前一个 transient 资源的内存，需要等待它的最后一次访问
    pub fn after_alias(mut self, predecessor: GfxImageState) -> Self {
        self.last_write = Some(GfxImageState::new(predecessor.stage, predecessor.access, vk::ImageLayout::UNDEFINED));
        self
    }

    fn state_of(&self, access: GfxAccess) -> GfxImageState {
        let mut state = access.image_state();
        if self.aspect.is_none() {
            state.layout = vk::ImageLayout::UNDEFINED;
        }
        state
    }

    fn src_state(&self, is_write: bool, layout_change: bool, old_layout: vk::ImageLayout) -> GfxImageState {
        let write = self.last_write.unwrap_or(GfxImageState::UNDEFINED);
        let has_readers = self.reader_stage != vk::PipelineStageFlags2::NONE;
        let (stage, access) = if is_write && has_readers {
            // 读后写只需要执行依赖
            (self.reader_stage, vk::AccessFlags2::NONE)
        } else if layout_change && has_readers {
            (write.stage | self.reader_stage, write.access)
        } else {
            (write.stage, write.access)
        };
        GfxImageState::new(stage, access, old_layout)
    }

    fn push(
        &self,
        barriers: &mut RgPassBarriers,
        src: GfxImageState,
        dst: GfxImageState,
        transfer: Option<RgQueueTransfer>,
    ) {
        match self.aspect {
            Some(aspect) => {
                let mut desc = RgImageBarrierDesc::new(self.resource, src, dst).with_aspect(aspect);
                desc.transfer = transfer;
                barriers.add_image_barrier(desc);
            }
            None => {
                let mut desc = RgBufferBarrierDesc::new(
                    self.resource,
                    GfxBufferState::from_image_state(src),
                    GfxBufferState::from_image_state(dst),
                );
                desc.transfer = transfer;
                barriers.add_buffer_barrier(desc);
            }
        }
    }

    fn push_always(&self, barriers: &mut RgPassBarriers, src: GfxImageState, dst: GfxImageState) {
        match self.aspect {
            Some(aspect) => {
                barriers.image_barriers.push(RgImageBarrierDesc::new(self.resource, src, dst).with_aspect(aspect))
            }
            None => barriers.buffer_barriers.push(RgBufferBarrierDesc::new(
                self.resource,
                GfxBufferState::from_image_state(src),
                GfxBufferState::from_image_state(dst),
            )),
        }
    }

    fn producer_site(&self) -> RgBarrierSite {
        match self.last_pos {
            Some(pos) => RgBarrierSite::Pass(pos),
            None => RgBarrierSite::Prologue(self.owner),
        }
    }

    /// 把资源从当前 domain 交给 `consumer` 所在的 domain
    fn transfer_to(
        &self,
        plan: &mut RgBarrierPlan,
        consumer: RgBarrierSite,
        domain: QueueDomain,
        src: GfxImageState,
        dst: GfxImageState,
    ) {
        let producer = self.producer_site();
        let release = RgQueueTransfer {
            src: self.owner,
            dst: domain,
            role: RgTransferRole::Release,
        };
        let acquire = RgQueueTransfer {
            role: RgTransferRole::Acquire,
            ..release
        };
        let none = |layout| GfxImageState::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, layout);

        self.push(plan.barriers_after(producer), src, none(dst.layout), Some(release));
        self.push(plan.barriers_before(consumer), none(src.layout), dst, Some(acquire));
        plan.waits.push(RgCrossWait {
            producer,
            producer_domain: self.owner,
            consumer,
        });
        log::trace!("resource {} moves from {} to {} before {:?}", self.resource, self.owner, domain, consumer);
    }

    pub fn visit(&mut self, u: &RgUse, plan: &mut RgBarrierPlan) {
        let dst = self.state_of(u.access);
        let discard = u.clear.is_some() || !self.contents;
        let old_layout = if discard { vk::ImageLayout::UNDEFINED } else { self.layout };
        let layout_change = self.aspect.is_some() && old_layout != dst.layout;
        let consumer = RgBarrierSite::Pass(u.pass);

        if u.domain != self.owner {
            let src = self.src_state(u.is_write(), layout_change, old_layout);
            if discard {
                let src = GfxImageState::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, old_layout);
                self.push(plan.barriers_before(consumer), src, dst, None);
                if self.last_pos.is_some() {
                    plan.waits.push(RgCrossWait {
                        producer: self.producer_site(),
                        producer_domain: self.owner,
                        consumer,
                    });
                }
            } else {
                self.transfer_to(plan, consumer, u.domain, src, dst);
            }

            // acquire 之后只有 dst 的 stage / access 可见
            self.last_write = Some(if u.is_write() {
                dst
            } else {
                GfxImageState::new(dst.stage, vk::AccessFlags2::NONE, dst.layout)
            });
            self.reader_stage = if u.is_write() { vk::PipelineStageFlags2::NONE } else { dst.stage };
            self.visible_stage = dst.stage;
            self.visible_access = dst.access;
        } else if u.is_write() {
            let src = self.src_state(true, layout_change, old_layout);
            self.push(plan.barriers_before(consumer), src, dst, None);

            self.last_write = Some(dst);
            self.reader_stage = vk::PipelineStageFlags2::NONE;
            self.visible_stage = vk::PipelineStageFlags2::NONE;
            self.visible_access = vk::AccessFlags2::NONE;
        } else {
            let visible = self.last_write.is_none()
                || (self.visible_stage.contains(dst.stage) && self.visible_access.contains(dst.access));
            if layout_change || !visible {
                let src = self.src_state(false, layout_change, old_layout);
                // 上一次写入的内容对这个 stage 还不可见，即使都是读取也要录制
                self.push_always(plan.barriers_before(consumer), src, dst);

                if layout_change {
                    self.visible_stage = dst.stage;
                    self.visible_access = dst.access;
                } else {
                    self.visible_stage |= dst.stage;
                    self.visible_access |= dst.access;
                }
            }
            self.reader_stage |= dst.stage;
        }

        self.layout = dst.layout;
        self.contents = true;
        self.owner = u.domain;
        self.last_pos = Some(u.pass);
        self.last_access = u.access;
    }

    /// 图结束时转换到 `target`
    pub fn finish(
        mut self,
        target: Option<(GfxAccess, QueueDomain)>,
        plan: &mut RgBarrierPlan,
    ) -> Option<(GfxAccess, QueueDomain)> {
        let Some((access, domain)) = target else {
            return self.last_pos.map(|_| (self.last_access, self.owner));
        };

        let dst = self.state_of(access);
        let old_layout = if self.contents { self.layout } else { vk::ImageLayout::UNDEFINED };
        let layout_change = self.aspect.is_some() && old_layout != dst.layout;
        let src = self.src_state(dst.is_write(), layout_change, old_layout);
        let consumer = RgBarrierSite::Epilogue(domain);

        if domain != self.owner && self.contents {
            self.transfer_to(plan, consumer, domain, src, dst);
        } else {
            self.push(plan.barriers_before(consumer), src, dst, None);
            if domain != self.owner && self.last_pos.is_some() {
                plan.waits.push(RgCrossWait {
                    producer: self.producer_site(),
                    producer_domain: self.owner,
                    consumer,
                });
            }
        }
        self.owner = domain;
        Some((access, domain))
    }
}

/// 计算所有位置需要的 barrier
///
/// - `descs`: 推导出的资源描述，用于 image aspect
/// - `predecessors`: 与前一个资源共享内存时，前一个资源最后一次访问的状态
pub(crate) fn compute_barriers(
    resolved: &RgResolvedGraph,
    chains: &[Vec<RgUse>],
    descs: &[Option<RgResourceDesc>],
    predecessors: &[Option<GfxImageState>],
    pass_count: usize,
) -> RgBarrierPlan {
    let _span = weave_crate_tools::profile_span!("RenderGraph::compute_barriers");

    let mut plan = RgBarrierPlan::new(pass_count, resolved.resources.len());

    for (index, resource) in resolved.resources.iter().enumerate() {
        let chain = &chains[index];
        let Some(desc) = descs[index].as_ref() else {
            continue;
        };
        let aspect = match resource.kind() {
            RgResourceKind::Image => Some(desc.aspect()),
            RgResourceKind::Buffer => None,
        };

        let (initial, initial_domain) = resource.binding.attachment.initial_access();
        let domain = if resource.binding.attachment.has_contents() {
            initial_domain
        } else {
            chain.first().map(|u| u.domain).unwrap_or(initial_domain)
        };
        let contents = resource.binding.attachment.has_contents()
            && !matches!(resource.binding.attachment, RgAttachment::Swapchain(_));
        let mut tracker = RgStateTracker::new(index, aspect, initial, domain, contents);
        if let Some(predecessor) = predecessors.get(index).copied().flatten() {
            tracker = tracker.after_alias(predecessor);
        }

        for u in chain {
            tracker.visit(u, &mut plan);
        }

        let target = match (&resource.release, &resource.binding.attachment) {
            (Some(release), _) => Some((release.access, release.domain)),
            (None, RgAttachment::Swapchain(_)) if !chain.is_empty() => {
                Some((GfxAccess::PRESENT, QueueDomain::Graphics))
            }
            _ => None,
        };
        plan.final_states[index] = tracker.finish(target, &mut plan);
    }

    plan
}

#[cfg(test)]
mod tests {
    use weave_crate_tools::name::Name;

    use super::*;

    #[test]
    fn test_image_barrier_layout_change() {
        let barrier = RgImageBarrierDesc::new(0, GfxImageState::UNDEFINED, GfxImageState::COLOR_ATTACHMENT_WRITE);
        assert!(barrier.needs_barrier());
    }

    #[test]
    fn test_image_barrier_read_to_read() {
        let barrier = RgImageBarrierDesc::new(
            0,
            GfxAccess::SAMPLED_FRAGMENT.image_state(),
            GfxAccess::SAMPLED_COMPUTE.image_state(),
        );
        // 同 layout 的只读到只读可以跳过
        assert!(!barrier.needs_barrier());
    }

    #[test]
    fn test_image_barrier_write_to_read() {
        let barrier = RgImageBarrierDesc::new(
            0,
            GfxAccess::STORAGE_WRITE_COMPUTE.image_state(),
            GfxImageState::SHADER_READ_FRAGMENT,
        );
        assert!(barrier.needs_barrier());
        let gfx = barrier.to_gfx_barrier(vk::Image::null());
        assert_eq!(gfx.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(gfx.src_access, vk::AccessFlags2::SHADER_STORAGE_WRITE);
    }

    fn use_at(pass: usize, access: GfxAccess, domain: QueueDomain) -> RgUse {
        RgUse {
            pass,
            pass_name: Name::new("p"),
            access,
            domain,
            clear: None,
        }
    }

    #[test]
    fn tracker_skips_repeated_reads_and_orders_war() {
        let mut plan = RgBarrierPlan::new(4, 1);
        let mut tracker =
            RgStateTracker::new(0, Some(vk::ImageAspectFlags::COLOR), GfxAccess::empty(), QueueDomain::Graphics, false);
        tracker.visit(&use_at(0, GfxAccess::COLOR_WRITE, QueueDomain::Graphics), &mut plan);
        tracker.visit(&use_at(1, GfxAccess::SAMPLED_FRAGMENT, QueueDomain::Graphics), &mut plan);
        tracker.visit(&use_at(2, GfxAccess::SAMPLED_FRAGMENT, QueueDomain::Graphics), &mut plan);
        tracker.visit(&use_at(3, GfxAccess::COLOR_WRITE, QueueDomain::Graphics), &mut plan);

        let first = plan.pre[0].find_image(0).unwrap();
        assert_eq!(first.src_state.layout, vk::ImageLayout::UNDEFINED);
        assert!(plan.pre[1].find_image(0).is_some());
        assert!(!plan.pre[2].has_barriers());

        let war = plan.pre[3].find_image(0).unwrap();
        assert_eq!(war.src_state.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(war.to_gfx_barrier(vk::Image::null()).src_access, vk::AccessFlags2::NONE);
        assert_eq!(war.dst_state.layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn tracker_transfers_ownership_between_domains() {
        let mut plan = RgBarrierPlan::new(2, 1);
        let mut tracker = RgStateTracker::new(0, None, GfxAccess::empty(), QueueDomain::Compute, false);
        tracker.visit(&use_at(0, GfxAccess::STORAGE_WRITE_COMPUTE, QueueDomain::Compute), &mut plan);
        tracker.visit(&use_at(1, GfxAccess::VERTEX_ATTRIBUTE_READ, QueueDomain::Graphics), &mut plan);

        let release = plan.post[0].find_buffer(0).unwrap();
        assert_eq!(release.transfer.map(|t| t.role), Some(RgTransferRole::Release));
        let acquire = plan.pre[1].find_buffer(0).unwrap();
        assert_eq!(
            acquire.transfer,
            Some(RgQueueTransfer {
                src: QueueDomain::Compute,
                dst: QueueDomain::Graphics,
                role: RgTransferRole::Acquire,
            })
        );
        assert_eq!(
            plan.waits,
            vec![RgCrossWait {
                producer: RgBarrierSite::Pass(0),
                producer_domain: QueueDomain::Compute,
                consumer: RgBarrierSite::Pass(1),
            }]
        );

        let last = tracker.finish(None, &mut plan);
        assert_eq!(last, Some((GfxAccess::VERTEX_ATTRIBUTE_READ, QueueDomain::Graphics)));
    }
}
