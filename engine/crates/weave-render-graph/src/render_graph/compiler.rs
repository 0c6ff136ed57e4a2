//! 编译：从声明到可执行的计划
//!
//! 编译是纯计算，不会调用设备。流程：
//!
//! 1. `merge` 合并片段
//! 2. `resolve` 名字解析
//! 3. 依赖分析和稳定的拓扑排序
//! 4. use chain
//! 5. 附件参数推导
//! 6. transient 资源内存复用
//! 7. barrier 和 queue ownership transfer
//! 8. rendering scope 合批
//! 9. 划分 submit batch
//!
//! 任何一步失败都不会留下部分结果，被占用的 shared fragment 会被释放。

use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use indexmap::IndexMap;
use itertools::Itertools;
use weave_crate_tools::name::Name;
use weave_gfx::queue::QueueDomain;

use super::aliasing::{RgAliasPlan, assign_alias_slots};
use super::barrier::{RgBarrierPlan, RgBarrierSite, RgPassBarriers, compute_barriers};
use super::batching::{RgRenderScope, build_render_scopes};
use super::dependency::RgDependencyGraph;
use super::error::RgCompileError;
use super::future::{CompilationId, RgSharedFragment};
use super::graph::RenderGraph;
use super::inference::{RgResourceDesc, infer};
use super::merge::{RgMergedGraph, RgScopedName, merge};
use super::resolve::{RgResolvedGraph, resolve};
use super::use_chain::{RgUse, build_use_chains};

/// 编译选项
#[derive(Clone, Debug, Default)]
pub struct RgCompileOptions {
    /// 编译完成后以 `log::info!` 打印执行计划
    pub dump_plan: bool,
    /// 执行之后仍然需要存活的资源（根片段中的名字），不参与内存复用
    pub exports: Vec<Name>,
}
impl RgCompileOptions {
    #[inline]
    pub fn dump_plan(mut self, dump_plan: bool) -> Self {
        self.dump_plan = dump_plan;
        self
    }

    pub fn exports(mut self, names: impl IntoIterator<Item = Name>) -> Self {
        self.exports.extend(names.into_iter().map(|name| name.base()));
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgBatchKind {
    /// 所有 pass 之前：把初始状态从其他 domain 上 release
    Prologue,
    /// 执行顺序中连续的、在同一个 domain 上的 pass
    Passes,
    /// 所有 pass 之后：release 和 swapchain 的最终转换
    Epilogue,
}

/// 一次 queue submit
#[derive(Clone, Debug)]
pub struct RgSubmitBatch {
    pub domain: QueueDomain,
    pub kind: RgBatchKind,
    /// 执行顺序中的位置，prologue / epilogue 为空
    pub passes: Range<usize>,
    /// prologue / epilogue 的 barrier，pass 的 barrier 见 `RgCompiledGraph::pass_barriers`
    pub barriers: RgPassBarriers,
    /// 需要等待的 batch（下标总是小于自己）
    pub waits: Vec<usize>,
}

/// 编译结果
///
/// 可以多次执行；没有执行就被丢弃时，合并进来的 shared fragment 会被释放。
pub struct RgCompiledGraph {
    pub(crate) name: Name,
    pub(crate) compilation: CompilationId,
    pub(crate) shared: Vec<Arc<RgSharedFragment>>,

    pub(crate) resolved: RgResolvedGraph,
    pub(crate) dependency: RgDependencyGraph,
    /// 执行顺序，值为声明顺序下标
    pub(crate) order: Vec<usize>,
    /// 每个资源的 use chain，`RgUse::pass` 是执行顺序中的位置
    pub(crate) chains: Vec<Vec<RgUse>>,
    pub(crate) descs: Vec<Option<RgResourceDesc>>,
    pub(crate) alias: RgAliasPlan,
    pub(crate) barriers: RgBarrierPlan,
    pub(crate) scopes: Vec<RgRenderScope>,
    pub(crate) batches: Vec<RgSubmitBatch>,
}

impl RenderGraph {
    /// 编译图，任何错误都会使整个编译失败
    pub fn compile(self, options: RgCompileOptions) -> Result<RgCompiledGraph, RgCompileError> {
        let _span = weave_crate_tools::profile_span!("RenderGraph::compile");

        let merged = merge(self, CompilationId::next())?;
        match compile_merged(&merged, &options) {
            Ok(compiled) => {
                log::debug!(
                    "compiled {}: {} passes, {} resources, {} scopes, {} batches, {} alias slots",
                    compiled.name,
                    compiled.order.len(),
                    compiled.resolved.resources.len(),
                    compiled.scopes.len(),
                    compiled.batches.len(),
                    compiled.alias.slot_count
                );
                if options.dump_plan {
                    compiled.print_execution_plan();
                }
                Ok(compiled)
            }
            Err(e) => {
                merged.release_shared();
                log::debug!("compilation failed: {}", e);
                Err(e)
            }
        }
    }
}

fn compile_merged(merged: &RgMergedGraph, options: &RgCompileOptions) -> Result<RgCompiledGraph, RgCompileError> {
    let resolved = resolve(merged, &options.exports)?;
    let pass_count = resolved.passes.len();
    let resource_count = resolved.resources.len();

    let reads = resolved
        .passes
        .iter()
        .map(|p| p.uses.iter().filter_map(|u| u.source.map(|source| (u.resource, source))).collect_vec())
        .collect_vec();
    let writes = resolved
        .passes
        .iter()
        .map(|p| p.uses.iter().filter(|u| u.access.is_write()).map(|u| u.resource).collect_vec())
        .collect_vec();
    let dependency = RgDependencyGraph::analyze(pass_count, resource_count, &reads, &writes);

    let order = dependency.topological_sort().map_err(|remaining| RgCompileError::CycleDetected {
        passes: remaining.iter().map(|&i| resolved.passes[i].name).collect(),
    })?;

    let chains = build_use_chains(&resolved.passes, &order, resource_count);
    let mut descs = infer(&resolved, &chains)?;
    let alias = assign_alias_slots(&resolved, &chains, &mut descs);
    let mut barriers = compute_barriers(&resolved, &chains, &descs, &alias.predecessors, pass_count);
    let scopes = build_render_scopes(&resolved, &order, &chains, &descs, &mut barriers.pre, &barriers.post)?;
    let batches = build_submit_batches(&resolved, &order, &dependency, &barriers);

    Ok(RgCompiledGraph {
        name: merged.fragment_names.get(&merged.root).copied().unwrap_or_else(|| Name::new("render_graph")),
        compilation: merged.compilation,
        shared: merged.shared.clone(),
        resolved,
        dependency,
        order,
        chains,
        descs,
        alias,
        barriers,
        scopes,
        batches,
    })
}

/// 划分 submit batch 并计算 batch 之间的等待
fn build_submit_batches(
    resolved: &RgResolvedGraph,
    order: &[usize],
    dependency: &RgDependencyGraph,
    plan: &RgBarrierPlan,
) -> Vec<RgSubmitBatch> {
    let consumer_sites: Vec<RgBarrierSite> = plan.waits.iter().map(|w| w.consumer).collect();
    let empty_batch = |domain, kind, passes, barriers| RgSubmitBatch {
        domain,
        kind,
        passes,
        barriers,
        waits: Vec::new(),
    };

    let mut batches = Vec::new();
    let mut prologue_of = [None; 3];
    for domain in QueueDomain::ALL {
        let barriers = &plan.prologue[domain.index()];
        if barriers.has_barriers() {
            prologue_of[domain.index()] = Some(batches.len());
            batches.push(empty_batch(domain, RgBatchKind::Prologue, 0..0, barriers.clone()));
        }
    }

    let mut batch_of_pos = vec![0; order.len()];
    for (domain, run) in &order.iter().enumerate().group_by(|&(_, pass)| resolved.passes[*pass].domain) {
        let positions: Vec<usize> = run.map(|(pos, _)| pos).collect();
        let (Some(&first), Some(&last)) = (positions.first(), positions.last()) else {
            continue;
        };
        for &pos in &positions {
            batch_of_pos[pos] = batches.len();
        }
        batches.push(empty_batch(domain, RgBatchKind::Passes, first..last + 1, RgPassBarriers::new()));
    }

    let mut epilogue_of = [None; 3];
    for domain in QueueDomain::ALL {
        let barriers = &plan.epilogue[domain.index()];
        let awaited = consumer_sites.contains(&RgBarrierSite::Epilogue(domain));
        if barriers.has_barriers() || awaited {
            epilogue_of[domain.index()] = Some(batches.len());
            batches.push(empty_batch(domain, RgBatchKind::Epilogue, 0..0, barriers.clone()));
        }
    }

    let batch_of = |site: RgBarrierSite| match site {
        RgBarrierSite::Prologue(domain) => prologue_of[domain.index()],
        RgBarrierSite::Pass(pos) => batch_of_pos.get(pos).copied(),
        RgBarrierSite::Epilogue(domain) => epilogue_of[domain.index()],
    };

    let mut edges: Vec<(usize, usize)> = Vec::new();
    for wait in &plan.waits {
        if let (Some(producer), Some(consumer)) = (batch_of(wait.producer), batch_of(wait.consumer)) {
            edges.push((producer, consumer));
        }
    }
    let position_of: Vec<usize> = {
        let mut position_of = vec![0; order.len()];
        for (pos, &pass) in order.iter().enumerate() {
            position_of[pass] = pos;
        }
        position_of
    };
    for edge in dependency.edges() {
        let producer = batch_of_pos[position_of[edge.producer]];
        let consumer = batch_of_pos[position_of[edge.consumer]];
        edges.push((producer, consumer));
    }

    for (producer, consumer) in edges {
        if producer >= consumer || batches[producer].domain == batches[consumer].domain {
            continue;
        }
        if !batches[consumer].waits.contains(&producer) {
            batches[consumer].waits.push(producer);
        }
    }
    for batch in &mut batches {
        batch.waits.sort_unstable();
    }
    batches
}

// getters
impl RgCompiledGraph {
    #[inline]
    pub fn name(&self) -> Name {
        self.name
    }

    /// 执行顺序，值为 pass 的声明顺序下标
    #[inline]
    pub fn execution_order(&self) -> &[usize] {
        &self.order
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.order.len()
    }

    /// 按声明顺序下标取 pass 名字
    #[inline]
    pub fn pass_name(&self, index: usize) -> Name {
        self.resolved.passes[index].name
    }

    /// 按执行顺序排列的 pass 名字
    pub fn execution_names(&self) -> Vec<Name> {
        self.order.iter().map(|&i| self.resolved.passes[i].name).collect()
    }

    #[inline]
    pub fn dependency_graph(&self) -> &RgDependencyGraph {
        &self.dependency
    }

    /// 根片段中的名字对应的资源下标
    pub fn resolve_name(&self, name: impl Into<Name>) -> Option<usize> {
        self.resolved.names.resolve(RgScopedName::new(self.resolved.root, name.into())).ok()
    }

    #[inline]
    pub fn resource_name(&self, resource: usize) -> Name {
        self.resolved.resources[resource].name
    }

    /// 所有资源的 use chain，以资源的显示名字为 key
    pub fn get_use_chains(&self) -> IndexMap<Name, &[RgUse]> {
        self.resolved
            .resources
            .iter()
            .zip(&self.chains)
            .map(|(resource, chain)| (resource.name, chain.as_slice()))
            .collect()
    }

    pub fn get_use_chain(&self, name: impl Into<Name>) -> Option<&[RgUse]> {
        self.resolve_name(name).map(|resource| self.chains[resource].as_slice())
    }

    /// 所有被使用的资源最终的创建参数（usage 已经包含整条 use chain）
    pub fn get_bound_attachments(&self) -> IndexMap<Name, RgResourceDesc> {
        self.resolved
            .resources
            .iter()
            .zip(&self.descs)
            .filter_map(|(resource, desc)| desc.map(|desc| (resource.name, desc)))
            .collect()
    }

    pub fn get_bound_attachment(&self, name: impl Into<Name>) -> Option<RgResourceDesc> {
        self.resolve_name(name).and_then(|resource| self.descs[resource])
    }

    #[inline]
    pub fn render_scopes(&self) -> &[RgRenderScope] {
        &self.scopes
    }

    #[inline]
    pub fn submit_batches(&self) -> &[RgSubmitBatch] {
        &self.batches
    }

    /// 执行顺序第 `pos` 个 pass 之前的 barrier
    #[inline]
    pub fn pass_barriers(&self, pos: usize) -> &RgPassBarriers {
        &self.barriers.pre[pos]
    }

    /// 执行顺序第 `pos` 个 pass 之后的 release
    #[inline]
    pub fn pass_releases(&self, pos: usize) -> &RgPassBarriers {
        &self.barriers.post[pos]
    }

    /// 资源所在的 alias slot，非 transient 或导出的资源为 `None`
    pub fn alias_slot(&self, name: impl Into<Name>) -> Option<u32> {
        self.resolve_name(name).and_then(|resource| self.alias.slots[resource])
    }

    #[inline]
    pub fn alias_slot_count(&self) -> u32 {
        self.alias.slot_count
    }
}
impl Drop for RgCompiledGraph {
    fn drop(&mut self) {
        // 已经提交的片段不受影响
        for fragment in &self.shared {
            fragment.release_merge(self.compilation);
        }
    }
}

// 调试方法
impl RgCompiledGraph {
    /// 打印执行计划
    ///
    /// 输出每个 submit batch、每个 pass 的访问和 barrier，以及 rendering scope 的附件。
    pub fn print_execution_plan(&self) {
        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Graph: {}  |  Passes: {}  |  Batches: {}  |  Alias slots: {}",
            self.name,
            self.order.len(),
            self.batches.len(),
            self.alias.slot_count
        );
        log::info!("║ Execution Order: [{}]", self.execution_names().iter().join(" → "));
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (batch_index, batch) in self.batches.iter().enumerate() {
            log::info!("");
            log::info!(
                "━━ Batch {} [{:?} on {}] waits on {:?}",
                batch_index,
                batch.kind,
                batch.domain,
                batch.waits
            );
            if batch.kind != RgBatchKind::Passes {
                self.print_barriers(&batch.barriers);
                continue;
            }

            for pos in batch.passes.clone() {
                let pass = &self.resolved.passes[self.order[pos]];
                log::info!("┌─────────────────────────────────────────────────────────────────┐");
                log::info!("│ [{}/{}] Pass: \"{}\"", pos + 1, self.order.len(), pass.name);
                if let Some(scope) = self.scopes.iter().find(|s| s.first == pos) {
                    log::info!(
                        "│ Begin rendering: {}x{} ({} passes)",
                        scope.extent.width,
                        scope.extent.height,
                        scope.pass_count()
                    );
                    for attachment in scope.attachments() {
                        log::info!(
                            "│     \"{}\" {:?} load {:?} store {:?}",
                            self.resolved.resources[attachment.resource].name,
                            attachment.layout,
                            attachment.load_op,
                            attachment.store_op
                        );
                    }
                }
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                for u in &pass.uses {
                    let kind = if u.access.is_write() { "Write" } else { "Read " };
                    log::info!(
                        "│   {} \"{}\" {:?}",
                        kind,
                        self.resolved.resources[u.resource].name,
                        u.access
                    );
                }

                log::info!("├─────────────────────────────────────────────────────────────────┤");
                self.print_barriers(&self.barriers.pre[pos]);
                if self.barriers.post[pos].has_barriers() {
                    log::info!("│ Releases after pass:");
                    self.print_barriers(&self.barriers.post[pos]);
                }
                log::info!("└─────────────────────────────────────────────────────────────────┘");
            }
        }

        if self.alias.slot_count > 0 {
            log::info!("");
            log::info!("━━ Alias slots");
            for slot in 0..self.alias.slot_count {
                let members = self.alias.slot_members(slot).map(|r| self.resolved.resources[r].name).join(", ");
                log::info!("   slot {}: {}", slot, members);
            }
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }

    fn print_barriers(&self, barriers: &RgPassBarriers) {
        if !barriers.has_barriers() {
            log::info!("│ No barriers required");
            return;
        }
        log::info!(
            "│ Barriers: {} image, {} buffer",
            barriers.image_barrier_count(),
            barriers.buffer_barrier_count()
        );

        for barrier in &barriers.image_barriers {
            let name = self.resolved.resources[barrier.resource].name;
            let layout_change = if barrier.src_state.layout != barrier.dst_state.layout {
                format!("{:?} → {:?}", barrier.src_state.layout, barrier.dst_state.layout)
            } else {
                format!("{:?} (no layout change)", barrier.src_state.layout)
            };
            log::info!("│   🔒 Image \"{}\":", name);
            log::info!("│       Layout: {}", layout_change);
            log::info!(
                "│       Stage:  {} → {}",
                format_pipeline_stage(barrier.src_state.stage),
                format_pipeline_stage(barrier.dst_state.stage)
            );
            log::info!(
                "│       Access: {} → {}",
                format_access_flags(barrier.src_state.access),
                format_access_flags(barrier.dst_state.access)
            );
            if let Some(transfer) = barrier.transfer {
                log::info!("│       Queue:  {:?} {} → {}", transfer.role, transfer.src, transfer.dst);
            }
        }

        for barrier in &barriers.buffer_barriers {
            let name = self.resolved.resources[barrier.resource].name;
            log::info!("│   🔒 Buffer \"{}\":", name);
            log::info!(
                "│       Stage:  {} → {}",
                format_pipeline_stage(barrier.src_state.stage),
                format_pipeline_stage(barrier.dst_state.stage)
            );
            log::info!(
                "│       Access: {} → {}",
                format_access_flags(barrier.src_state.access),
                format_access_flags(barrier.dst_state.access)
            );
            if let Some(transfer) = barrier.transfer {
                log::info!("│       Queue:  {:?} {} → {}", transfer.role, transfer.src, transfer.dst);
            }
        }
    }
}

/// 格式化 PipelineStageFlags2 为可读字符串
fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    const NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
        (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
        (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
        (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
        (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
        (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
        (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
        (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
        (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
        (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
        (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
        (vk::PipelineStageFlags2::HOST, "HOST"),
        (vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, "RAY_TRACING_SHADER"),
        (vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR, "ACCEL_STRUCT_BUILD"),
        (vk::PipelineStageFlags2::ALL_GRAPHICS, "ALL_GRAPHICS"),
        (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
    ];
    if stage == vk::PipelineStageFlags2::NONE {
        return "NONE".to_string();
    }
    let stages = NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if stages.is_empty() { format!("{:?}", stage) } else { stages.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
fn format_access_flags(access: vk::AccessFlags2) -> String {
    const NAMES: &[(vk::AccessFlags2, &str)] = &[
        (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
        (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
        (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
        (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
        (vk::AccessFlags2::INPUT_ATTACHMENT_READ, "INPUT_ATTACH_READ"),
        (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
        (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
        (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
        (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
        (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
        (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
        (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
        (vk::AccessFlags2::HOST_READ, "HOST_READ"),
        (vk::AccessFlags2::HOST_WRITE, "HOST_WRITE"),
        (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
        (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
        (vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR, "ACCEL_STRUCT_READ"),
        (vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR, "ACCEL_STRUCT_WRITE"),
    ];
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }
    let flags = NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if flags.is_empty() { format!("{:?}", access) } else { flags.join(" | ") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_access_names() {
        assert_eq!(
            format_pipeline_stage(vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER),
            "FRAGMENT_SHADER | COMPUTE_SHADER"
        );
        assert_eq!(format_pipeline_stage(vk::PipelineStageFlags2::NONE), "NONE");
        assert_eq!(format_access_flags(vk::AccessFlags2::NONE), "NONE");
        assert_eq!(format_access_flags(vk::AccessFlags2::TRANSFER_WRITE), "TRANSFER_WRITE");
    }

    #[test]
    fn exports_drop_the_suffix() {
        let options = RgCompileOptions::default().exports([Name::new("color+")]).dump_plan(true);
        assert_eq!(options.exports, vec![Name::new("color")]);
        assert!(options.dump_plan);
    }
}
