use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::ash_backend::AshDeviceFns;
use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use crate::commands::encoder::{GfxCommandEncoder, GfxCommandList, GfxShaderBindingTable};
use crate::commands::rendering_info::GfxRenderingInfo;
use crate::error::GfxResult;
use crate::queue::QueueDomain;
use crate::resources::image::{GfxClearValue, format_aspect};

/// 命令缓冲封装
///
/// 每个 encoder 独占一个 command pool，提交完成后 pool 由 `AshDevice` 回收复用。
pub struct AshCommandEncoder {
    fns: Arc<AshDeviceFns>,
    domain: QueueDomain,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}
// new & init
impl AshCommandEncoder {
    pub(crate) fn new(
        fns: Arc<AshDeviceFns>,
        domain: QueueDomain,
        pool: vk::CommandPool,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { fns.device.allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or(crate::error::GfxError::Vk(vk::Result::ERROR_UNKNOWN))?;
        unsafe {
            fns.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        let mut encoder = Self {
            fns,
            domain,
            pool,
            cmd,
        };
        if let Ok(name) = CString::new(debug_name) {
            let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(cmd).object_name(&name);
            if let Err(e) = unsafe { encoder.fns.debug_utils.set_debug_utils_object_name(&name_info) } {
                log::warn!("failed to name command buffer {}: {:?}", debug_name, e);
            }
        }
        encoder.begin_label(debug_name, crate::commands::encoder::LabelColor::COLOR_BATCH);
        Ok(encoder)
    }
}
impl GfxCommandEncoder for AshCommandEncoder {
    #[inline]
    fn domain(&self) -> QueueDomain {
        self.domain
    }

    fn pipeline_barrier(&mut self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }
        let image_barriers = image_barriers.iter().map(|b| b.to_vk()).collect_vec();
        let buffer_barriers = buffer_barriers.iter().map(|b| b.to_vk()).collect_vec();
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe {
            self.fns.device.cmd_pipeline_barrier2(self.cmd, &dependency_info);
        }
    }

    fn begin_rendering(&mut self, info: &GfxRenderingInfo) {
        let colors = info.color_attachments.iter().map(|attach| attach.to_vk()).collect_vec();
        let depth = info.depth_attachment.map(|attach| attach.to_vk());
        let has_stencil = info
            .depth_attachment
            .map(|attach| format_aspect(attach.format).contains(vk::ImageAspectFlags::STENCIL))
            .unwrap_or(false);

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(info.render_area())
            .layer_count(info.layer_count.max(1))
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
            if has_stencil {
                rendering_info = rendering_info.stencil_attachment(depth);
            }
        }
        unsafe {
            self.fns.dynamic_rendering.cmd_begin_rendering(self.cmd, &rendering_info);
        }
    }

    fn end_rendering(&mut self) {
        unsafe {
            self.fns.dynamic_rendering.cmd_end_rendering(self.cmd);
        }
    }

    fn set_viewport(&mut self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            self.fns.device.cmd_set_viewport(self.cmd, first_viewport, viewports);
        }
    }

    fn set_scissor(&mut self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            self.fns.device.cmd_set_scissor(self.cmd, first_scissor, scissors);
        }
    }

    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.fns.device.cmd_bind_pipeline(self.cmd, bind_point, pipeline);
        }
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.fns.device.cmd_bind_vertex_buffers(self.cmd, first_binding, buffers, offsets);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.fns.device.cmd_bind_index_buffer(self.cmd, buffer, offset, index_type);
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.fns.device.cmd_bind_descriptor_sets(self.cmd, bind_point, layout, first_set, sets, &[]);
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.fns.device.cmd_push_constants(self.cmd, layout, stages, offset, data);
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.fns.device.cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.fns.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn dispatch(&mut self, group_count: glam::UVec3) {
        unsafe {
            self.fns.device.cmd_dispatch(self.cmd, group_count.x, group_count.y, group_count.z);
        }
    }

    fn trace_rays(&mut self, sbt: &GfxShaderBindingTable, extent: glam::UVec3) {
        unsafe {
            self.fns.ray_tracing_pipeline.cmd_trace_rays(
                self.cmd,
                &sbt.raygen.to_vk(),
                &sbt.miss.to_vk(),
                &sbt.hit.to_vk(),
                &sbt.callable.to_vk(),
                extent.x,
                extent.y,
                extent.z,
            );
        }
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.fns.device.cmd_copy_buffer(self.cmd, src, dst, regions);
        }
    }

    fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.fns.device.cmd_blit_image(self.cmd, src, src_layout, dst, dst_layout, regions, filter);
        }
    }

    fn clear_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &GfxClearValue,
        range: vk::ImageSubresourceRange,
    ) {
        let ranges = std::slice::from_ref(&range);
        unsafe {
            match *value {
                GfxClearValue::DepthStencil { depth, stencil } => self.fns.device.cmd_clear_depth_stencil_image(
                    self.cmd,
                    image,
                    layout,
                    &vk::ClearDepthStencilValue { depth, stencil },
                    ranges,
                ),
                GfxClearValue::Color(float32) => self.fns.device.cmd_clear_color_image(
                    self.cmd,
                    image,
                    layout,
                    &vk::ClearColorValue { float32 },
                    ranges,
                ),
                GfxClearValue::ColorUint(uint32) => self.fns.device.cmd_clear_color_image(
                    self.cmd,
                    image,
                    layout,
                    &vk::ClearColorValue { uint32 },
                    ranges,
                ),
            }
        }
    }

    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        unsafe {
            self.fns.device.cmd_fill_buffer(self.cmd, buffer, offset, size, data);
        }
    }

    fn build_acceleration_structures(
        &mut self,
        infos: &[vk::AccelerationStructureBuildGeometryInfoKHR<'_>],
        ranges: &[&[vk::AccelerationStructureBuildRangeInfoKHR]],
    ) {
        unsafe {
            self.fns.acceleration_structure.cmd_build_acceleration_structures(self.cmd, infos, ranges);
        }
    }

    fn begin_label(&mut self, label_name: &str, label_color: glam::Vec4) {
        let name = CString::new(label_name.replace('\0', "")).unwrap_or_default();
        unsafe {
            self.fns.debug_utils.cmd_begin_debug_utils_label(
                self.cmd,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    fn end_label(&mut self) {
        unsafe {
            self.fns.debug_utils.cmd_end_debug_utils_label(self.cmd);
        }
    }

    fn finish(mut self: Box<Self>) -> GfxResult<GfxCommandList> {
        self.end_label();
        unsafe { self.fns.device.end_command_buffer(self.cmd)? };
        Ok(GfxCommandList {
            domain: self.domain,
            handle: self.cmd,
            pool: self.pool,
        })
    }
}
