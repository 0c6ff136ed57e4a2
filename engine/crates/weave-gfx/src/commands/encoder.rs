use ash::vk;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use crate::commands::rendering_info::GfxRenderingInfo;
use crate::error::GfxResult;
use crate::queue::QueueDomain;
use crate::resources::image::GfxClearValue;

/// shader binding table 中的一段区域
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxSbtRegion {
    pub device_address: vk::DeviceAddress,
    pub stride: vk::DeviceSize,
    pub size: vk::DeviceSize,
}
impl GfxSbtRegion {
    #[inline]
    pub fn to_vk(&self) -> vk::StridedDeviceAddressRegionKHR {
        vk::StridedDeviceAddressRegionKHR {
            device_address: self.device_address,
            stride: self.stride,
            size: self.size,
        }
    }
}

/// trace rays 需要的四段 shader binding table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxShaderBindingTable {
    pub raygen: GfxSbtRegion,
    pub miss: GfxSbtRegion,
    pub hit: GfxSbtRegion,
    pub callable: GfxSbtRegion,
}

/// 录制完成、等待提交的命令
#[derive(Debug)]
pub struct GfxCommandList {
    pub domain: QueueDomain,
    pub handle: vk::CommandBuffer,
    /// 录制时使用的 command pool，提交完成之后由设备回收
    pub pool: vk::CommandPool,
}

/// 命令录制接口
///
/// 每个 encoder 只属于一个 queue domain。
/// 各个命令和 `vkCmd*` 一一对应，方法注释中标注了支持的 queue 类型。
pub trait GfxCommandEncoder: Send {
    fn domain(&self) -> QueueDomain;

    // 同步相关命令

    /// - supported queue types: graphics, compute, transfer
    fn pipeline_barrier(&mut self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]);

    // 绘制类型的命令

    /// - supported queue types: graphics
    fn begin_rendering(&mut self, info: &GfxRenderingInfo);
    /// - supported queue types: graphics
    fn end_rendering(&mut self);
    /// - supported queue types: graphics
    fn set_viewport(&mut self, first_viewport: u32, viewports: &[vk::Viewport]);
    /// - supported queue types: graphics
    fn set_scissor(&mut self, first_scissor: u32, scissors: &[vk::Rect2D]);
    /// - supported queue types: graphics, compute
    fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline);
    /// - supported queue types: graphics
    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]);
    /// - supported queue types: graphics
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);
    /// - supported queue types: graphics, compute
    fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    /// - supported queue types: graphics, compute
    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]);
    /// - supported queue types: graphics
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    /// - supported queue types: graphics
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    /// - supported queue types: graphics, compute
    fn dispatch(&mut self, group_count: glam::UVec3);
    /// - supported queue types: compute
    fn trace_rays(&mut self, sbt: &GfxShaderBindingTable, extent: glam::UVec3);

    // 数据传输类型

    /// - supported queue types: transfer, graphics, compute
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);
    /// - supported queue types: graphics
    fn blit_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );
    /// color 可以在 graphics / compute 上清除，depth 只能在 graphics 上
    fn clear_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &GfxClearValue,
        range: vk::ImageSubresourceRange,
    );
    /// - supported queue types: transfer, graphics, compute
    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32);

    // 光追相关

    /// - supported queue types: compute
    fn build_acceleration_structures(
        &mut self,
        infos: &[vk::AccelerationStructureBuildGeometryInfoKHR<'_>],
        ranges: &[&[vk::AccelerationStructureBuildRangeInfoKHR]],
    );

    // debug 相关命令

    fn begin_label(&mut self, label_name: &str, label_color: glam::Vec4);
    fn end_label(&mut self);

    /// 结束录制
    fn finish(self: Box<Self>) -> GfxResult<GfxCommandList>;
}

/// debug label 的颜色
pub struct LabelColor;
impl LabelColor {
    pub const COLOR_PASS: glam::Vec4 = glam::Vec4::new(0.8, 0.5, 0.2, 1.0);
    pub const COLOR_BATCH: glam::Vec4 = glam::Vec4::new(0.2, 0.6, 0.9, 1.0);
}
