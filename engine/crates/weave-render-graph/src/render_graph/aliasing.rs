//! transient 资源的内存复用
//!
//! 生命周期不重叠、创建参数相同（usage 除外）的 transient 资源共享同一个 alias slot，
//! 执行时同一个 slot 只获取一次物理资源。后一个资源的第一次访问需要等待前一个资源的最后一次访问。

use weave_gfx::queue::QueueDomain;
use weave_gfx::state::GfxImageState;

use super::inference::RgResourceDesc;
use super::resolve::RgResolvedGraph;
use super::use_chain::RgUse;

#[derive(Clone, Debug, Default)]
pub(crate) struct RgAliasPlan {
    /// 每个资源所在的 slot，非 transient 或导出的资源为 `None`
    pub slots: Vec<Option<u32>>,
    /// 共享内存时前一个资源最后一次访问的状态
    pub predecessors: Vec<Option<GfxImageState>>,
    pub slot_count: u32,
}
impl RgAliasPlan {
    /// 与 `resource` 共享 slot 的资源
    pub fn slot_members(&self, slot: u32) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().enumerate().filter(move |(_, s)| **s == Some(slot)).map(|(index, _)| index)
    }
}

struct RgSlot {
    domain: QueueDomain,
    desc: RgResourceDesc,
    /// 最后一个成员的最后一次访问（执行顺序）
    last_pos: usize,
    last_state: GfxImageState,
    members: Vec<usize>,
    shareable: bool,
}

/// 资源生命周期内只在一个 domain 上访问
fn single_domain(chain: &[RgUse]) -> Option<QueueDomain> {
    let first = chain.first()?.domain;
    chain.iter().all(|u| u.domain == first).then_some(first)
}

/// 分配 alias slot，同一 slot 的成员 usage 取并集
pub(crate) fn assign_alias_slots(
    resolved: &RgResolvedGraph,
    chains: &[Vec<RgUse>],
    descs: &mut [Option<RgResourceDesc>],
) -> RgAliasPlan {
    let _span = weave_crate_tools::profile_span!("RenderGraph::assign_alias_slots");

    let resource_count = resolved.resources.len();
    let mut plan = RgAliasPlan {
        slots: vec![None; resource_count],
        predecessors: vec![None; resource_count],
        slot_count: 0,
    };

    // (first_pos, resource, domain)
    let mut candidates: Vec<(usize, usize, Option<QueueDomain>)> = Vec::new();
    for (index, resource) in resolved.resources.iter().enumerate() {
        if !resource.binding.attachment.is_transient() || resource.exported || descs[index].is_none() {
            continue;
        }
        let chain = &chains[index];
        let Some(first) = chain.first() else {
            continue;
        };
        let domain = if resource.release.is_none() { single_domain(chain) } else { None };
        candidates.push((first.pass, index, domain));
    }
    candidates.sort();

    let mut slots: Vec<RgSlot> = Vec::new();
    for (first_pos, index, domain) in candidates {
        let Some(desc) = descs[index] else {
            continue;
        };
        let chain = &chains[index];
        let (last_pos, last_state) = match chain.last() {
            Some(last) => (last.pass, last.image_state()),
            None => continue,
        };

        let reusable = domain.and_then(|domain| {
            slots.iter().position(|slot| {
                slot.shareable
                    && slot.domain == domain
                    && slot.last_pos < first_pos
                    && slot.desc.matches_except_usage(&desc)
            })
        });

        match reusable {
            Some(slot_index) => {
                let slot = &mut slots[slot_index];
                plan.predecessors[index] = Some(slot.last_state);
                log::trace!(
                    "{} reuses alias slot {} after {}",
                    resolved.resources[index].name,
                    slot_index,
                    slot.members.last().map(|m| resolved.resources[*m].name.as_str()).unwrap_or("?")
                );
                slot.desc.union_usage(&desc);
                slot.last_pos = last_pos;
                slot.last_state = last_state;
                slot.members.push(index);
            }
            None => slots.push(RgSlot {
                domain: domain.unwrap_or_default(),
                desc,
                last_pos,
                last_state,
                members: vec![index],
                shareable: domain.is_some(),
            }),
        }
    }

    for (slot_index, slot) in slots.iter().enumerate() {
        for &member in &slot.members {
            plan.slots[member] = Some(slot_index as u32);
            descs[member] = Some(slot.desc);
        }
    }
    plan.slot_count = slots.len() as u32;
    log::debug!(
        "{} transient resources placed into {} alias slots",
        slots.iter().map(|s| s.members.len()).sum::<usize>(),
        plan.slot_count
    );
    plan
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use weave_gfx::access::GfxAccess;

    use super::*;
    use crate::render_graph::attachment::RgImageAttachment;
    use crate::render_graph::future::CompilationId;
    use crate::render_graph::graph::RenderGraph;
    use crate::render_graph::inference::infer;
    use crate::render_graph::merge::merge;
    use crate::render_graph::pass::RgPassDesc;
    use crate::render_graph::resolve::resolve;
    use crate::render_graph::use_chain::build_use_chains;

    fn plan_for(graph: RenderGraph) -> (RgAliasPlan, Vec<Option<RgResourceDesc>>) {
        let merged = merge(graph, CompilationId::next()).unwrap();
        let resolved = resolve(&merged, &[]).unwrap();
        let order: Vec<usize> = (0..resolved.passes.len()).collect();
        let chains = build_use_chains(&resolved.passes, &order, resolved.resources.len());
        let mut descs = infer(&resolved, &chains).unwrap();
        let plan = assign_alias_slots(&resolved, &chains, &mut descs);
        (plan, descs)
    }

    fn image(width: u32) -> RgImageAttachment {
        RgImageAttachment::new().extent_2d(width, width).format(vk::Format::R8G8B8A8_UNORM)
    }

    #[test]
    fn disjoint_lifetimes_share_a_slot() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("a", image(64))
            .attach_image("b", image(64))
            .attach_image("out", image(64))
            .add_pass(RgPassDesc::new("write_a").image("a", GfxAccess::STORAGE_WRITE_COMPUTE))
            .add_pass(
                RgPassDesc::new("read_a")
                    .image("a", GfxAccess::SAMPLED_FRAGMENT)
                    .image("out", GfxAccess::COLOR_WRITE),
            )
            .add_pass(RgPassDesc::new("write_b").image("b", GfxAccess::TRANSFER_WRITE))
            .add_pass(
                RgPassDesc::new("read_b")
                    .image("b", GfxAccess::SAMPLED_FRAGMENT)
                    .image("out", GfxAccess::COLOR_RW),
            );

        let (plan, descs) = plan_for(graph);
        assert_eq!(plan.slots[0], plan.slots[1]);
        assert_ne!(plan.slots[0], plan.slots[2]);
        assert_eq!(plan.slot_count, 2);
        assert_eq!(plan.slot_members(plan.slots[0].unwrap()).collect::<Vec<_>>(), vec![0, 1]);

        // 后一个资源等待前一个资源的最后一次访问
        let predecessor = plan.predecessors[1].unwrap();
        assert_eq!(predecessor.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER);

        let usage = descs[0].unwrap().image().unwrap().usage;
        assert_eq!(usage, descs[1].unwrap().image().unwrap().usage);
        assert!(usage.contains(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn different_shapes_and_overlaps_do_not_share() {
        let mut graph = RenderGraph::new("g");
        graph
            .attach_image("a", image(64))
            .attach_image("b", image(32))
            .attach_image("c", image(64))
            .add_pass(RgPassDesc::new("a").image("a", GfxAccess::TRANSFER_WRITE))
            .add_pass(RgPassDesc::new("b").image("b", GfxAccess::TRANSFER_WRITE))
            .add_pass(
                RgPassDesc::new("c")
                    .image("c", GfxAccess::TRANSFER_WRITE)
                    .image("a", GfxAccess::TRANSFER_READ),
            );

        let (plan, _) = plan_for(graph);
        assert_eq!(plan.slot_count, 3);
        assert!(plan.predecessors.iter().all(Option::is_none));
    }
}
