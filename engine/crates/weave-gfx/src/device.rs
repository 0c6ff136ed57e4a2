use ash::vk;

use crate::commands::encoder::{GfxCommandEncoder, GfxCommandList};
use crate::commands::submit_info::GfxSubmitTicket;
use crate::error::GfxResult;
use crate::pipelines::descriptor::{GfxDescriptorSet, GfxDescriptorSetCreateInfo, GfxDescriptorSetLayoutCreateInfo};
use crate::pipelines::pipeline::{
    GfxComputePipelineCreateInfo, GfxGraphicsPipelineCreateInfo, GfxPipelineLayoutCreateInfo,
};
use crate::pipelines::shader::GfxShaderModuleCreateInfo;
use crate::queue::QueueDomain;
use crate::resources::buffer::{GfxBuffer, GfxBufferCreateInfo};
use crate::resources::image::{GfxImage, GfxImageCreateInfo};
use crate::sampler::GfxSamplerCreateInfo;

/// 设备后端接口
///
/// RenderGraph 和各个 cache 只通过这个 trait 与设备交互。
/// 实现必须可以跨线程共享：cache 的构造可能发生在任意线程上。
pub trait GfxDevice: Send + Sync {
    /// domain 对应的 queue family，两个 domain 可能映射到同一个 family
    fn queue_family_index(&self, domain: QueueDomain) -> u32;

    // 资源
    fn create_image(&self, info: &GfxImageCreateInfo, debug_name: &str) -> GfxResult<GfxImage>;
    fn destroy_image(&self, image: GfxImage);
    fn create_buffer(&self, info: &GfxBufferCreateInfo, debug_name: &str) -> GfxResult<GfxBuffer>;
    fn destroy_buffer(&self, buffer: GfxBuffer);
    /// 只能写入 host visible 的 buffer
    fn write_buffer(&self, buffer: &GfxBuffer, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()>;
    fn create_sampler(&self, info: &GfxSamplerCreateInfo) -> GfxResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // 管线
    fn create_shader_module(&self, info: &GfxShaderModuleCreateInfo) -> GfxResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_descriptor_set_layout(
        &self,
        info: &GfxDescriptorSetLayoutCreateInfo,
    ) -> GfxResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_pipeline_layout(&self, info: &GfxPipelineLayoutCreateInfo) -> GfxResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, info: &GfxGraphicsPipelineCreateInfo<'_>) -> GfxResult<vk::Pipeline>;
    fn create_compute_pipeline(&self, info: &GfxComputePipelineCreateInfo) -> GfxResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn create_descriptor_set(&self, info: &GfxDescriptorSetCreateInfo) -> GfxResult<GfxDescriptorSet>;
    fn destroy_descriptor_set(&self, set: GfxDescriptorSet);

    // 命令
    fn begin_encoder(&self, domain: QueueDomain, debug_name: &str) -> GfxResult<Box<dyn GfxCommandEncoder>>;
    /// 提交一个 command list，在 `waits` 全部完成之后才开始执行
    fn submit(&self, list: GfxCommandList, waits: &[GfxSubmitTicket]) -> GfxResult<GfxSubmitTicket>;
    /// 丢弃录制完成但不会再提交的命令
    fn discard(&self, list: GfxCommandList);
    /// 阻塞直到所有 ticket 完成
    fn wait(&self, tickets: &[GfxSubmitTicket]) -> GfxResult<()>;
    fn is_complete(&self, ticket: GfxSubmitTicket) -> GfxResult<bool>;
}
