//! 不依赖 GPU 的设备实现
//!
//! 句柄由递增计数伪造；录制的命令被保存成 [`GfxCommand`] 列表，按提交顺序记录，
//! 用于在测试里检查 barrier、render scope 和 debug label 的顺序。
//! 提交后立即视为完成。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;

use weave_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use weave_gfx::commands::encoder::{GfxCommandEncoder, GfxCommandList, GfxShaderBindingTable};
use weave_gfx::commands::rendering_info::GfxRenderingInfo;
use weave_gfx::commands::submit_info::GfxSubmitTicket;
use weave_gfx::device::GfxDevice;
use weave_gfx::error::{GfxError, GfxResult};
use weave_gfx::pipelines::descriptor::{GfxDescriptorSet, GfxDescriptorSetCreateInfo, GfxDescriptorSetLayoutCreateInfo};
use weave_gfx::pipelines::pipeline::{
    GfxComputePipelineCreateInfo, GfxGraphicsPipelineCreateInfo, GfxPipelineLayoutCreateInfo,
};
use weave_gfx::pipelines::shader::GfxShaderModuleCreateInfo;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};
use weave_gfx::resources::image::{GfxClearValue, GfxImage, GfxImageCreateInfo};
use weave_gfx::sampler::GfxSamplerCreateInfo;

/// headless 设备创建的对象种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadlessObjectKind {
    Image,
    Buffer,
    Sampler,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    GraphicsPipeline,
    ComputePipeline,
    DescriptorSet,
    Submit,
}

/// 录制下来的一条命令
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    PipelineBarrier {
        images: Vec<GfxImageBarrier>,
        buffers: Vec<GfxBufferBarrier>,
    },
    BeginRendering(GfxRenderingInfo),
    EndRendering,
    /// 每个 viewport 保存为 `[x, y, width, height]`
    SetViewport(Vec<[f32; 4]>),
    SetScissor(Vec<vk::Rect2D>),
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch(glam::UVec3),
    TraceRays(glam::UVec3),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
    },
    ClearImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        value: GfxClearValue,
    },
    FillBuffer {
        buffer: vk::Buffer,
        data: u32,
    },
    BuildAccelerationStructures(usize),
    BeginLabel(String),
    EndLabel,
}

/// 一次提交
#[derive(Clone, Debug)]
pub struct HeadlessSubmission {
    pub domain: QueueDomain,
    pub debug_name: String,
    pub ticket: GfxSubmitTicket,
    pub waits: Vec<GfxSubmitTicket>,
    pub commands: Vec<GfxCommand>,
}

#[derive(Default)]
struct HeadlessState {
    next_handle: AtomicU64,
    timelines: Mutex<[u64; 3]>,
    /// 已经 finish、还没有提交的命令
    recorded: Mutex<HashMap<vk::CommandBuffer, (String, Vec<GfxCommand>)>>,
    submissions: Mutex<Vec<HeadlessSubmission>>,
    constructions: Mutex<HashMap<HeadlessObjectKind, usize>>,
    destructions: Mutex<HashMap<HeadlessObjectKind, usize>>,
    pending_failures: Mutex<Vec<(HeadlessObjectKind, GfxError)>>,
}
impl HeadlessState {
    #[inline]
    fn next_raw(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// 记录一切、不做任何事的 `GfxDevice`
pub struct HeadlessDevice {
    state: Arc<HeadlessState>,
    queue_families: [u32; 3],
}
impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessDevice {
    /// 三个 domain 分别使用不同的 queue family
    pub fn new() -> Self {
        Self::with_queue_families([0, 1, 2])
    }

    /// 按 `QueueDomain::index` 的顺序指定 queue family
    pub fn with_queue_families(queue_families: [u32; 3]) -> Self {
        Self {
            state: Arc::new(HeadlessState::default()),
            queue_families,
        }
    }
}
// failure injection
impl HeadlessDevice {
    /// 下一次创建 `kind` 类型的对象时返回 `GfxError::Injected`
    pub fn fail_next(&self, kind: HeadlessObjectKind, reason: &'static str) {
        self.fail_next_with(kind, GfxError::Injected(reason));
    }

    pub fn fail_next_with(&self, kind: HeadlessObjectKind, error: GfxError) {
        self.state.pending_failures.lock().push((kind, error));
    }

    fn check_failure(&self, kind: HeadlessObjectKind) -> GfxResult<()> {
        let mut pending = self.state.pending_failures.lock();
        match pending.iter().position(|(k, _)| *k == kind) {
            Some(index) => Err(pending.remove(index).1),
            None => Ok(()),
        }
    }

    fn construct<T>(&self, kind: HeadlessObjectKind, build: impl FnOnce(u64) -> T) -> GfxResult<T> {
        self.check_failure(kind)?;
        *self.state.constructions.lock().entry(kind).or_default() += 1;
        Ok(build(self.state.next_raw()))
    }

    fn destruct(&self, kind: HeadlessObjectKind) {
        *self.state.destructions.lock().entry(kind).or_default() += 1;
    }
}
// getters
impl HeadlessDevice {
    /// 创建过的 `kind` 类型对象数量
    pub fn construction_count(&self, kind: HeadlessObjectKind) -> usize {
        self.state.constructions.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn destruction_count(&self, kind: HeadlessObjectKind) -> usize {
        self.state.destructions.lock().get(&kind).copied().unwrap_or(0)
    }

    /// 还没有被销毁的 `kind` 类型对象数量
    pub fn live_count(&self, kind: HeadlessObjectKind) -> usize {
        self.construction_count(kind).saturating_sub(self.destruction_count(kind))
    }

    pub fn submissions(&self) -> Vec<HeadlessSubmission> {
        self.state.submissions.lock().clone()
    }

    /// 所有提交中的命令，按提交顺序拼接
    pub fn commands(&self) -> Vec<GfxCommand> {
        self.state.submissions.lock().iter().flat_map(|s| s.commands.iter().cloned()).collect()
    }

    pub fn clear_submissions(&self) {
        self.state.submissions.lock().clear();
    }

    /// 已经 finish 但既没有提交也没有丢弃的 command list
    pub fn unsubmitted_count(&self) -> usize {
        self.state.recorded.lock().len()
    }
}
impl GfxDevice for HeadlessDevice {
    #[inline]
    fn queue_family_index(&self, domain: QueueDomain) -> u32 {
        self.queue_families[domain.index()]
    }

    fn create_image(&self, info: &GfxImageCreateInfo, _debug_name: &str) -> GfxResult<GfxImage> {
        let handle = self.construct(HeadlessObjectKind::Image, vk::Image::from_raw)?;
        let view = vk::ImageView::from_raw(self.state.next_raw());
        Ok(GfxImage::new(handle, view, *info))
    }

    fn destroy_image(&self, _image: GfxImage) {
        self.destruct(HeadlessObjectKind::Image);
    }

    fn create_buffer(&self, info: &GfxBufferCreateInfo, _debug_name: &str) -> GfxResult<GfxBuffer> {
        let raw = self.construct(HeadlessObjectKind::Buffer, |raw| raw)?;
        let device_addr = info.has_device_address().then_some(raw << 16);
        Ok(GfxBuffer::new(vk::Buffer::from_raw(raw), *info, device_addr))
    }

    fn destroy_buffer(&self, _buffer: GfxBuffer) {
        self.destruct(HeadlessObjectKind::Buffer);
    }

    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        if !buffer.info().memory.is_host_visible() {
            return Err(GfxError::Unsupported("write to a buffer that is not host visible".to_string()));
        }
        if offset + data.len() as vk::DeviceSize > buffer.size() {
            return Err(GfxError::Vk(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        Ok(())
    }

    fn create_sampler(&self, _info: &GfxSamplerCreateInfo) -> GfxResult<vk::Sampler> {
        self.construct(HeadlessObjectKind::Sampler, vk::Sampler::from_raw)
    }

    fn destroy_sampler(&self, _sampler: vk::Sampler) {
        self.destruct(HeadlessObjectKind::Sampler);
    }

    fn create_shader_module(&self, _info: &GfxShaderModuleCreateInfo) -> GfxResult<vk::ShaderModule> {
        self.construct(HeadlessObjectKind::ShaderModule, vk::ShaderModule::from_raw)
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.destruct(HeadlessObjectKind::ShaderModule);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &GfxDescriptorSetLayoutCreateInfo,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        self.construct(HeadlessObjectKind::DescriptorSetLayout, vk::DescriptorSetLayout::from_raw)
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.destruct(HeadlessObjectKind::DescriptorSetLayout);
    }

    fn create_pipeline_layout(&self, _info: &GfxPipelineLayoutCreateInfo) -> GfxResult<vk::PipelineLayout> {
        self.construct(HeadlessObjectKind::PipelineLayout, vk::PipelineLayout::from_raw)
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.destruct(HeadlessObjectKind::PipelineLayout);
    }

    fn create_graphics_pipeline(&self, _info: &GfxGraphicsPipelineCreateInfo<'_>) -> GfxResult<vk::Pipeline> {
        self.construct(HeadlessObjectKind::GraphicsPipeline, vk::Pipeline::from_raw)
    }

    fn create_compute_pipeline(&self, _info: &GfxComputePipelineCreateInfo) -> GfxResult<vk::Pipeline> {
        self.construct(HeadlessObjectKind::ComputePipeline, vk::Pipeline::from_raw)
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        // graphics 和 compute 共用同一个销毁入口
        self.destruct(HeadlessObjectKind::GraphicsPipeline);
    }

    fn create_descriptor_set(&self, _info: &GfxDescriptorSetCreateInfo) -> GfxResult<GfxDescriptorSet> {
        self.construct(HeadlessObjectKind::DescriptorSet, |raw| GfxDescriptorSet {
            set: vk::DescriptorSet::from_raw(raw),
            pool: vk::DescriptorPool::from_raw(raw),
        })
    }

    fn destroy_descriptor_set(&self, _set: GfxDescriptorSet) {
        self.destruct(HeadlessObjectKind::DescriptorSet);
    }

    fn begin_encoder(&self, domain: QueueDomain, debug_name: &str) -> GfxResult<Box<dyn GfxCommandEncoder>> {
        Ok(Box::new(HeadlessEncoder {
            state: self.state.clone(),
            domain,
            debug_name: debug_name.to_string(),
            commands: vec![GfxCommand::BeginLabel(debug_name.to_string())],
        }))
    }

    fn submit(&self, list: GfxCommandList, waits: &[GfxSubmitTicket]) -> GfxResult<GfxSubmitTicket> {
        self.check_failure(HeadlessObjectKind::Submit)?;
        let (debug_name, commands) = self
            .state
            .recorded
            .lock()
            .remove(&list.handle)
            .ok_or(GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;

        let ticket = {
            let mut timelines = self.state.timelines.lock();
            timelines[list.domain.index()] += 1;
            GfxSubmitTicket::new(list.domain, timelines[list.domain.index()])
        };
        self.state.submissions.lock().push(HeadlessSubmission {
            domain: list.domain,
            debug_name,
            ticket,
            waits: waits.to_vec(),
            commands,
        });
        Ok(ticket)
    }

    fn discard(&self, list: GfxCommandList) {
        self.state.recorded.lock().remove(&list.handle);
    }

    fn wait(&self, tickets: &[GfxSubmitTicket]) -> GfxResult<()> {
        let timelines = self.state.timelines.lock();
        match tickets.iter().find(|t| t.value > timelines[t.domain.index()]) {
            Some(ticket) => {
                Err(GfxError::Unsupported(format!("wait on a ticket that was never submitted: {:?}", ticket)))
            }
            None => Ok(()),
        }
    }

    fn is_complete(&self, ticket: GfxSubmitTicket) -> GfxResult<bool> {
        Ok(ticket.value <= self.state.timelines.lock()[ticket.domain.index()])
    }
}

/// 把命令保存到列表中的 encoder
struct HeadlessEncoder {
    state: Arc<HeadlessState>,
    domain: QueueDomain,
    debug_name: String,
    commands: Vec<GfxCommand>,
}
impl GfxCommandEncoder for HeadlessEncoder {
    fn domain(&self) -> QueueDomain {
        self.domain
    }

    fn pipeline_barrier(&mut self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }
        self.commands.push(GfxCommand::PipelineBarrier {
            images: image_barriers.to_vec(),
            buffers: buffer_barriers.to_vec(),
        });
    }

    fn begin_rendering(&mut self, info: &GfxRenderingInfo) {
        self.commands.push(GfxCommand::BeginRendering(info.clone()));
    }

    fn end_rendering(&mut self) {
        self.commands.push(GfxCommand::EndRendering);
    }

    fn set_viewport(&mut self, _first_viewport: u32, viewports: &[vk::Viewport]) {
        self.commands.push(GfxCommand::SetViewport(
            viewports.iter().map(|v| [v.x, v.y, v.width, v.height]).collect(),
        ));
    }

    fn set_scissor(&mut self, _first_scissor: u32, scissors: &[vk::Rect2D]) {
        self.commands.push(GfxCommand::SetScissor(scissors.to_vec()));
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.commands.push(GfxCommand::BindPipeline { bind_point, pipeline });
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], _offsets: &[vk::DeviceSize]) {
        self.commands.push(GfxCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, _offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.commands.push(GfxCommand::BindIndexBuffer { buffer, index_type });
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.commands.push(GfxCommand::BindDescriptorSets {
            bind_point,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn push_constants(&mut self, _layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        self.commands.push(GfxCommand::PushConstants {
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.commands.push(GfxCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.commands.push(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn dispatch(&mut self, group_count: glam::UVec3) {
        self.commands.push(GfxCommand::Dispatch(group_count));
    }

    fn trace_rays(&mut self, _sbt: &GfxShaderBindingTable, extent: glam::UVec3) {
        self.commands.push(GfxCommand::TraceRays(extent));
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, _regions: &[vk::BufferCopy]) {
        self.commands.push(GfxCommand::CopyBuffer { src, dst });
    }

    fn blit_image(
        &mut self,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _regions: &[vk::ImageBlit],
        _filter: vk::Filter,
    ) {
        self.commands.push(GfxCommand::BlitImage { src, dst });
    }

    fn clear_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &GfxClearValue,
        _range: vk::ImageSubresourceRange,
    ) {
        self.commands.push(GfxCommand::ClearImage {
            image,
            layout,
            value: *value,
        });
    }

    fn fill_buffer(&mut self, buffer: vk::Buffer, _offset: vk::DeviceSize, _size: vk::DeviceSize, data: u32) {
        self.commands.push(GfxCommand::FillBuffer { buffer, data });
    }

    fn build_acceleration_structures(
        &mut self,
        infos: &[vk::AccelerationStructureBuildGeometryInfoKHR<'_>],
        _ranges: &[&[vk::AccelerationStructureBuildRangeInfoKHR]],
    ) {
        self.commands.push(GfxCommand::BuildAccelerationStructures(infos.len()));
    }

    fn begin_label(&mut self, label_name: &str, _label_color: glam::Vec4) {
        self.commands.push(GfxCommand::BeginLabel(label_name.to_string()));
    }

    fn end_label(&mut self) {
        self.commands.push(GfxCommand::EndLabel);
    }

    fn finish(mut self: Box<Self>) -> GfxResult<GfxCommandList> {
        self.end_label();
        let handle = vk::CommandBuffer::from_raw(self.state.next_raw());
        let commands = std::mem::take(&mut self.commands);
        self.state.recorded.lock().insert(handle, (std::mem::take(&mut self.debug_name), commands));
        Ok(GfxCommandList {
            domain: self.domain,
            handle,
            pool: vk::CommandPool::null(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submissions_capture_commands_in_order() {
        let device = HeadlessDevice::new();
        let mut encoder = device.begin_encoder(QueueDomain::Compute, "batch").unwrap();
        encoder.dispatch(glam::UVec3::new(8, 8, 1));
        let list = encoder.finish().unwrap();
        let ticket = device.submit(list, &[]).unwrap();

        assert_eq!(ticket, GfxSubmitTicket::new(QueueDomain::Compute, 1));
        assert!(device.is_complete(ticket).unwrap());
        assert_eq!(
            device.commands(),
            vec![
                GfxCommand::BeginLabel("batch".to_string()),
                GfxCommand::Dispatch(glam::UVec3::new(8, 8, 1)),
                GfxCommand::EndLabel,
            ]
        );
    }

    #[test]
    fn injected_failure_fires_once() {
        let device = HeadlessDevice::new();
        let info = GfxImageCreateInfo::new_image_2d_info(
            vk::Extent2D { width: 4, height: 4 },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        device.fail_next(HeadlessObjectKind::Image, "no memory");

        assert_eq!(device.create_image(&info, "a"), Err(GfxError::Injected("no memory")));
        let image = device.create_image(&info, "a").unwrap();
        assert_eq!(device.construction_count(HeadlessObjectKind::Image), 1);
        device.destroy_image(image);
        assert_eq!(device.live_count(HeadlessObjectKind::Image), 0);
    }

    #[test]
    fn handles_are_unique() {
        let device = HeadlessDevice::new();
        let a = device.create_sampler(&GfxSamplerCreateInfo::default()).unwrap();
        let b = device.create_sampler(&GfxSamplerCreateInfo::default()).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, vk::Sampler::null());
    }
}
