use ash::vk;

use crate::pipelines::descriptor::GfxDescriptorSetLayoutCreateInfo;
use crate::pipelines::shader::GfxShaderStage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxPushConstantRange {
    pub stages: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}
impl GfxPushConstantRange {
    #[inline]
    pub fn to_vk(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: self.offset,
            size: self.size,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxPipelineLayoutCreateInfo {
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<GfxPushConstantRange>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxVertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxVertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// 颜色混合方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GfxBlendMode {
    #[default]
    Opaque,
    Alpha,
    Additive,
}
impl GfxBlendMode {
    pub fn attachment_state(&self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            Self::Opaque => state.blend_enable(false),
            Self::Alpha => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
            Self::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// 光栅化和深度相关的固定管线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxRasterState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub blend: GfxBlendMode,
}
impl Default for GfxRasterState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: false,
            depth_write: false,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            blend: GfxBlendMode::Opaque,
        }
    }
}

/// 与 render target 无关的管线描述
///
/// 同一个 base 在不同的附件格式下会实例化出不同的 graphics pipeline。
/// 只有一个 compute stage 时表示 compute pipeline。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GfxPipelineBaseCreateInfo {
    pub stages: Vec<GfxShaderStage>,
    pub set_layouts: Vec<GfxDescriptorSetLayoutCreateInfo>,
    pub push_constant_ranges: Vec<GfxPushConstantRange>,
    pub vertex_bindings: Vec<GfxVertexBinding>,
    pub vertex_attributes: Vec<GfxVertexAttribute>,
    pub raster: GfxRasterState,
}
// builder
impl GfxPipelineBaseCreateInfo {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stage(mut self, stage: GfxShaderStage) -> Self {
        self.stages.push(stage);
        self
    }

    #[inline]
    pub fn set_layout(mut self, set_layout: GfxDescriptorSetLayoutCreateInfo) -> Self {
        self.set_layouts.push(set_layout);
        self
    }

    #[inline]
    pub fn push_constant_range(mut self, range: GfxPushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    #[inline]
    pub fn vertex_layout(mut self, bindings: Vec<GfxVertexBinding>, attributes: Vec<GfxVertexAttribute>) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    #[inline]
    pub fn raster(mut self, raster: GfxRasterState) -> Self {
        self.raster = raster;
        self
    }
}
// getters
impl GfxPipelineBaseCreateInfo {
    #[inline]
    pub fn is_compute(&self) -> bool {
        self.stages.len() == 1 && self.stages[0].stage == vk::ShaderStageFlags::COMPUTE
    }

    /// 所有 push constant 覆盖的 stage
    pub fn push_constant_stages(&self) -> vk::ShaderStageFlags {
        self.push_constant_ranges.iter().fold(vk::ShaderStageFlags::empty(), |acc, range| acc | range.stages)
    }
}

/// 已经解析好 layout 和 shader module 的 pipeline base
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxPipelineBase {
    pub create_info: GfxPipelineBaseCreateInfo,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub layout: vk::PipelineLayout,
    /// 与 `create_info.stages` 一一对应
    pub modules: Vec<vk::ShaderModule>,
}

/// 一个 pipeline base 在具体 render target 格式下的实例
pub struct GfxGraphicsPipelineCreateInfo<'a> {
    pub base: &'a GfxPipelineBase,
    pub color_formats: &'a [vk::Format],
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxComputePipelineCreateInfo {
    pub module: vk::ShaderModule,
    pub entry_point: String,
    pub layout: vk::PipelineLayout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::shader::GfxShaderModuleCreateInfo;

    #[test]
    fn compute_base_is_detected() {
        let module = GfxShaderModuleCreateInfo::new(vec![0x0723_0203u32], "blur.comp");
        let compute = GfxPipelineBaseCreateInfo::new()
            .stage(GfxShaderStage::new(vk::ShaderStageFlags::COMPUTE, module.clone()))
            .push_constant_range(GfxPushConstantRange {
                stages: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: 16,
            });
        assert!(compute.is_compute());
        assert_eq!(compute.push_constant_stages(), vk::ShaderStageFlags::COMPUTE);

        let graphics = GfxPipelineBaseCreateInfo::new()
            .stage(GfxShaderStage::new(vk::ShaderStageFlags::VERTEX, module.clone()))
            .stage(GfxShaderStage::new(vk::ShaderStageFlags::FRAGMENT, module));
        assert!(!graphics.is_compute());
    }
}
