//! 执行编译结果
//!
//! 1. 为每个资源找到物理对象：transient 资源按 alias slot 从缓存获取，导出的资源单独创建
//! 2. 按 submit batch 录制：barrier、rendering scope、pass 的 debug label 和回调
//! 3. 所有 batch 都录制成功之后按顺序提交，batch 之间的等待转换为 ticket
//!
//! 执行器不做校验，所有检查都在编译阶段完成。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use weave_gfx::commands::encoder::{GfxCommandEncoder, GfxCommandList, LabelColor};
use weave_gfx::commands::rendering_info::{GfxRenderingAttachment, GfxRenderingInfo};
use weave_gfx::commands::submit_info::GfxSubmitTicket;
use weave_gfx::queue::QueueDomain;
use weave_render_interface::context::{GfxDeferredDestroy, RenderContext};

use super::barrier::{RgPassBarriers, RgQueueTransfer, RgTransferRole};
use super::batching::{RgRenderScope, RgScopeAttachment};
use super::compiler::{RgBatchKind, RgCompiledGraph, RgSubmitBatch};
use super::error::RgError;
use super::inference::RgResourceDesc;
use super::pass_context::RgPassContext;
use super::resource::{RgAttachment, RgFutureValue, RgPhysicalResource};

/// 一次执行的结果
#[derive(Clone, Debug, Default)]
pub struct RgExecution {
    /// 按提交顺序
    pub tickets: Vec<GfxSubmitTicket>,
    /// 为导出资源单独创建的对象，调用者不再需要时交给 `RenderContext::defer_destroy`
    pub dedicated: Vec<RgPhysicalResource>,
    /// 根片段中每个名字的最终状态
    outputs: HashMap<Name, RgFutureValue>,
}
impl RgExecution {
    pub fn output(&self, name: impl Into<Name>) -> Option<RgFutureValue> {
        self.outputs.get(&name.into().base()).copied()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &RgFutureValue> {
        self.outputs.values()
    }
}

/// 两个 domain 映射到同一个 queue family 时只警告一次
static SAME_FAMILY_WARNED: AtomicBool = AtomicBool::new(false);

impl RgCompiledGraph {
    /// 录制并提交整张图
    pub fn execute(&self, ctx: &RenderContext) -> Result<RgExecution, RgError> {
        let _span = weave_crate_tools::profile_span!("RgCompiledGraph::execute");
        if ctx.config().dump_plan {
            self.print_execution_plan();
        }

        let mut dedicated = Vec::new();
        let physical = match self.acquire_physical(ctx, &mut dedicated) {
            Ok(physical) => physical,
            Err(e) => {
                retire(ctx, &dedicated);
                return Err(e);
            }
        };

        let rendering: Vec<GfxRenderingInfo> =
            self.scopes.iter().map(|scope| rendering_info(scope, &physical)).collect();

        // 全部录制成功之后才提交
        let device = ctx.device();
        let mut recorded: Vec<GfxCommandList> = Vec::with_capacity(self.batches.len());
        for (index, batch) in self.batches.iter().enumerate() {
            match self.record_batch(ctx, index, batch, &physical, &rendering) {
                Ok(list) => recorded.push(list),
                Err(e) => {
                    log::error!("render graph {} failed in batch {}: {}", self.name, index, e);
                    recorded.into_iter().for_each(|list| device.discard(list));
                    retire(ctx, &dedicated);
                    return Err(e);
                }
            }
        }

        let mut tickets: Vec<GfxSubmitTicket> = Vec::with_capacity(recorded.len());
        let mut lists = recorded.into_iter();
        for batch in &self.batches {
            let Some(list) = lists.next() else {
                break;
            };
            let waits: Vec<GfxSubmitTicket> = batch.waits.iter().filter_map(|&w| tickets.get(w).copied()).collect();
            match device.submit(list, &waits) {
                Ok(ticket) => {
                    ctx.record_submission(ticket);
                    tickets.push(ticket);
                }
                Err(e) => {
                    log::error!("render graph {} failed to submit batch {}: {}", self.name, tickets.len(), e);
                    lists.for_each(|list| device.discard(list));
                    retire(ctx, &dedicated);
                    return Err(e.into());
                }
            }
        }

        let outputs = self.collect_outputs(&physical, &tickets);
        self.publish_shared(&physical, &tickets);

        log::debug!("executed {} in {} submissions", self.name, tickets.len());
        Ok(RgExecution {
            tickets,
            dedicated,
            outputs,
        })
    }

    /// 每个资源的物理对象，没有被使用的 transient 资源为 `None`
    fn acquire_physical(
        &self,
        ctx: &RenderContext,
        dedicated: &mut Vec<RgPhysicalResource>,
    ) -> Result<Vec<Option<RgPhysicalResource>>, RgError> {
        let mut slots: HashMap<u32, RgPhysicalResource> = HashMap::new();
        let mut physical = Vec::with_capacity(self.resolved.resources.len());

        for (index, resource) in self.resolved.resources.iter().enumerate() {
            let object = match &resource.binding.attachment {
                RgAttachment::ExternalImage { image, .. } => Some(RgPhysicalResource::Image(*image)),
                RgAttachment::ExternalBuffer { buffer, .. } => Some(RgPhysicalResource::Buffer(*buffer)),
                RgAttachment::Swapchain(swapchain) => Some(RgPhysicalResource::Image(swapchain.image)),
                RgAttachment::Materialized(value) => Some(value.resource),
                RgAttachment::TransientImage(_) | RgAttachment::TransientBuffer(_) => {
                    let Some(desc) = self.descs[index] else {
                        physical.push(None);
                        continue;
                    };
                    let name = resource.name.as_str();
                    match self.alias.slots[index] {
                        Some(slot) => {
                            if let Some(existing) = slots.get(&slot) {
                                Some(*existing)
                            } else {
                                let object = match desc {
                                    RgResourceDesc::Image(info) => {
                                        RgPhysicalResource::Image(ctx.acquire_transient_image(&info, slot, name)?)
                                    }
                                    RgResourceDesc::Buffer(info) => {
                                        RgPhysicalResource::Buffer(ctx.acquire_transient_buffer(&info, slot, name)?)
                                    }
                                };
                                slots.insert(slot, object);
                                Some(object)
                            }
                        }
                        None => {
                            let object = match desc {
                                RgResourceDesc::Image(info) => {
                                    RgPhysicalResource::Image(ctx.create_dedicated_image(&info, name)?)
                                }
                                RgResourceDesc::Buffer(info) => {
                                    RgPhysicalResource::Buffer(ctx.create_dedicated_buffer(&info, name)?)
                                }
                            };
                            dedicated.push(object);
                            Some(object)
                        }
                    }
                }
            };
            physical.push(object);
        }
        Ok(physical)
    }

    fn record_batch(
        &self,
        ctx: &RenderContext,
        index: usize,
        batch: &RgSubmitBatch,
        physical: &[Option<RgPhysicalResource>],
        rendering: &[GfxRenderingInfo],
    ) -> Result<GfxCommandList, RgError> {
        let device = ctx.device();
        let label = match batch.kind {
            RgBatchKind::Prologue => format!("{}:{}:prologue", self.name, batch.domain),
            RgBatchKind::Passes => format!("{}:{}#{}", self.name, batch.domain, index),
            RgBatchKind::Epilogue => format!("{}:{}:epilogue", self.name, batch.domain),
        };
        let mut encoder = device.begin_encoder(batch.domain, &label)?;

        let result = match batch.kind {
            RgBatchKind::Prologue | RgBatchKind::Epilogue => {
                self.record_barriers(ctx, encoder.as_mut(), &batch.barriers, physical);
                Ok(())
            }
            RgBatchKind::Passes => batch
                .passes
                .clone()
                .try_for_each(|pos| self.record_pass(ctx, encoder.as_mut(), pos, physical, rendering)),
        };

        // 出错时 rendering scope 已经关闭，可以正常结束录制
        let list = encoder.finish()?;
        if let Err(e) = result {
            device.discard(list);
            return Err(e);
        }
        Ok(list)
    }

    fn record_pass(
        &self,
        ctx: &RenderContext,
        encoder: &mut dyn GfxCommandEncoder,
        pos: usize,
        physical: &[Option<RgPhysicalResource>],
        rendering: &[GfxRenderingInfo],
    ) -> Result<(), RgError> {
        let pass = &self.resolved.passes[self.order[pos]];
        self.record_barriers(ctx, encoder, &self.barriers.pre[pos], physical);

        let scope = self.scopes.iter().position(|scope| scope.contains(pos));
        if let Some(scope) = scope {
            if self.scopes[scope].first == pos {
                encoder.begin_rendering(&rendering[scope]);
            }
        }

        encoder.begin_label(pass.name.as_str(), LabelColor::COLOR_PASS);
        let result = {
            let mut pass_ctx =
                RgPassContext::new(ctx, &mut *encoder, pass.name, &pass.uses, physical, scope.map(|s| &rendering[s]));
            pass.executor.execute(&mut pass_ctx);
            pass_ctx.finish()
        };
        encoder.end_label();

        if let Some(scope) = scope {
            if self.scopes[scope].last == pos {
                encoder.end_rendering();
            }
        }
        result?;

        self.record_barriers(ctx, encoder, &self.barriers.post[pos], physical);
        Ok(())
    }

    /// 录制一组 barrier
    ///
    /// 源和目标 domain 映射到同一个 queue family 时，release 被丢弃，acquire 退化为普通 barrier。
    fn record_barriers(
        &self,
        ctx: &RenderContext,
        encoder: &mut dyn GfxCommandEncoder,
        barriers: &RgPassBarriers,
        physical: &[Option<RgPhysicalResource>],
    ) {
        if !barriers.has_barriers() {
            return;
        }
        let device = ctx.device();
        let families = |transfer: &RgQueueTransfer| {
            (device.queue_family_index(transfer.src), device.queue_family_index(transfer.dst))
        };

        let mut image_barriers: Vec<GfxImageBarrier> = Vec::with_capacity(barriers.image_barriers.len());
        for desc in &barriers.image_barriers {
            let Some(image) = physical[desc.resource].and_then(|r| r.image()) else {
                continue;
            };
            let mut barrier = desc.to_gfx_barrier(image.handle());
            if let Some(transfer) = desc.transfer {
                let (src, dst) = families(&transfer);
                if src == dst {
                    match transfer.role {
                        RgTransferRole::Release => continue,
                        RgTransferRole::Acquire => {
                            warn_same_family(&transfer);
                            barrier =
                                barrier.src_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::MEMORY_WRITE);
                        }
                    }
                } else {
                    barrier = barrier.queue_family_transfer(src, dst);
                }
            }
            image_barriers.push(barrier);
        }

        let mut buffer_barriers: Vec<GfxBufferBarrier> = Vec::with_capacity(barriers.buffer_barriers.len());
        for desc in &barriers.buffer_barriers {
            let Some(buffer) = physical[desc.resource].and_then(|r| r.buffer()) else {
                continue;
            };
            let mut barrier = desc.to_gfx_barrier(buffer.vk_buffer());
            if let Some(transfer) = desc.transfer {
                let (src, dst) = families(&transfer);
                if src == dst {
                    match transfer.role {
                        RgTransferRole::Release => continue,
                        RgTransferRole::Acquire => {
                            warn_same_family(&transfer);
                            barrier =
                                barrier.src_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::MEMORY_WRITE);
                        }
                    }
                } else {
                    barrier = barrier.queue_family_transfer(src, dst);
                }
            }
            buffer_barriers.push(barrier);
        }

        if !image_barriers.is_empty() || !buffer_barriers.is_empty() {
            encoder.pipeline_barrier(&image_barriers, &buffer_barriers);
        }
    }

    /// 资源最后一次访问所在的提交
    fn final_ticket(
        &self,
        resource: usize,
        domain: QueueDomain,
        tickets: &[GfxSubmitTicket],
    ) -> Option<GfxSubmitTicket> {
        let epilogue = self.batches.iter().position(|b| {
            b.kind == RgBatchKind::Epilogue
                && b.domain == domain
                && (b.barriers.find_image(resource).is_some() || b.barriers.find_buffer(resource).is_some())
        });
        let batch = match epilogue {
            Some(batch) => batch,
            None => {
                let last = self.chains[resource].last()?;
                self.batches.iter().position(|b| b.kind == RgBatchKind::Passes && b.passes.contains(&last.pass))?
            }
        };
        tickets.get(batch).copied()
    }

    fn future_value(
        &self,
        name: Name,
        resource: usize,
        physical: &[Option<RgPhysicalResource>],
        tickets: &[GfxSubmitTicket],
    ) -> Option<RgFutureValue> {
        let object = physical[resource]?;
        let (last_access, domain) = self.barriers.final_states[resource]
            .unwrap_or_else(|| self.resolved.resources[resource].binding.attachment.initial_access());
        Some(RgFutureValue {
            name,
            resource: object,
            last_access,
            domain,
            ticket: self.final_ticket(resource, domain, tickets),
        })
    }

    fn collect_outputs(
        &self,
        physical: &[Option<RgPhysicalResource>],
        tickets: &[GfxSubmitTicket],
    ) -> HashMap<Name, RgFutureValue> {
        self.resolved
            .names
            .names_in(self.resolved.root)
            .into_iter()
            .filter_map(|(name, resource)| Some((name, self.future_value(name, resource, physical, tickets)?)))
            .collect()
    }

    /// 记录合并进来的 shared fragment 的输出，之后的图直接使用
    fn publish_shared(&self, physical: &[Option<RgPhysicalResource>], tickets: &[GfxSubmitTicket]) {
        for fragment in &self.shared {
            let outputs: HashMap<Name, RgFutureValue> = self
                .resolved
                .names
                .names_in(fragment.id())
                .into_iter()
                .filter_map(|(name, resource)| Some((name, self.future_value(name, resource, physical, tickets)?)))
                .collect();
            fragment.mark_submitted(outputs);
        }
    }
}

fn warn_same_family(transfer: &RgQueueTransfer) {
    if !SAME_FAMILY_WARNED.swap(true, Ordering::Relaxed) {
        log::warn!(
            "{} and {} share a queue family, ownership transfers become plain barriers",
            transfer.src,
            transfer.dst
        );
    }
}

fn scope_attachment(
    attachment: &RgScopeAttachment,
    physical: &[Option<RgPhysicalResource>],
) -> Option<GfxRenderingAttachment> {
    let image = physical[attachment.resource]?.image()?;
    Some(GfxRenderingAttachment {
        image: image.handle(),
        view: image.view(),
        format: image.format(),
        layout: attachment.layout,
        load_op: attachment.load_op,
        store_op: attachment.store_op,
        clear_value: attachment.clear,
    })
}

fn rendering_info(scope: &RgRenderScope, physical: &[Option<RgPhysicalResource>]) -> GfxRenderingInfo {
    GfxRenderingInfo {
        extent: scope.extent,
        layer_count: scope.layer_count,
        samples: scope.samples,
        color_attachments: scope.colors.iter().filter_map(|a| scope_attachment(a, physical)).collect(),
        depth_attachment: scope.depth.as_ref().and_then(|a| scope_attachment(a, physical)),
    }
}

/// 执行失败时单独创建的对象不会交给调用者
fn retire(ctx: &RenderContext, dedicated: &[RgPhysicalResource]) {
    for object in dedicated {
        ctx.defer_destroy(match object {
            RgPhysicalResource::Image(image) => GfxDeferredDestroy::Image(*image),
            RgPhysicalResource::Buffer(buffer) => GfxDeferredDestroy::Buffer(*buffer),
        });
    }
}

