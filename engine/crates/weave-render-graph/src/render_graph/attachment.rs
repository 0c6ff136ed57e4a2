use std::fmt;
use std::sync::Arc;

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::resources::buffer::{GfxBufferCreateInfo, GfxMemoryUsage};
use weave_gfx::resources::image::{GfxImage, GfxImageCreateInfo};

use super::inference::RgInferenceContext;

/// transient image 的描述
///
/// 未设置的字段在编译时通过推导规则补全。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgImageAttachment {
    pub extent: Option<vk::Extent3D>,
    pub format: Option<vk::Format>,
    pub samples: Option<vk::SampleCountFlags>,
    pub mip_levels: Option<u32>,
    pub array_layers: Option<u32>,
    pub image_type: vk::ImageType,
    pub view_type: vk::ImageViewType,
}
impl Default for RgImageAttachment {
    fn default() -> Self {
        Self {
            extent: None,
            format: None,
            samples: None,
            mip_levels: None,
            array_layers: None,
            image_type: vk::ImageType::TYPE_2D,
            view_type: vk::ImageViewType::TYPE_2D,
        }
    }
}
// new & init
impl RgImageAttachment {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有字段都已知的描述
    pub fn from_image(image: &GfxImage) -> Self {
        let info = image.info();
        Self {
            extent: Some(info.extent),
            format: Some(info.format),
            samples: Some(info.samples),
            mip_levels: Some(info.mip_levels),
            array_layers: Some(info.array_layers),
            image_type: info.image_type,
            view_type: info.view_type,
        }
    }
}
// builder
impl RgImageAttachment {
    #[inline]
    pub fn extent_2d(mut self, width: u32, height: u32) -> Self {
        self.extent = Some(vk::Extent3D { width, height, depth: 1 });
        self
    }

    #[inline]
    pub fn extent(mut self, extent: vk::Extent3D) -> Self {
        self.extent = Some(extent);
        self
    }

    #[inline]
    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = Some(format);
        self
    }

    #[inline]
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = Some(samples);
        self
    }

    #[inline]
    pub fn levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = Some(mip_levels);
        self
    }

    #[inline]
    pub fn layers(mut self, array_layers: u32) -> Self {
        self.array_layers = Some(array_layers);
        self
    }
}
// tools
impl RgImageAttachment {
    /// 还缺少的必需字段
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.extent.is_none() {
            missing.push("extent");
        }
        if self.format.is_none() {
            missing.push("format");
        }
        missing
    }

    /// samples / levels / layers 的默认值
    pub fn fill_defaults(&mut self) {
        self.samples.get_or_insert(vk::SampleCountFlags::TYPE_1);
        self.mip_levels.get_or_insert(1);
        self.array_layers.get_or_insert(1);
    }

    /// 形状完整时转换为创建参数
    pub fn to_create_info(&self, usage: vk::ImageUsageFlags) -> Option<GfxImageCreateInfo> {
        Some(GfxImageCreateInfo {
            image_type: self.image_type,
            view_type: self.view_type,
            format: self.format?,
            extent: self.extent?,
            samples: self.samples.unwrap_or(vk::SampleCountFlags::TYPE_1),
            mip_levels: self.mip_levels.unwrap_or(1),
            array_layers: self.array_layers.unwrap_or(1),
            usage,
        })
    }

    #[inline]
    pub fn extent_2d_value(&self) -> Option<vk::Extent2D> {
        self.extent.map(|extent| vk::Extent2D {
            width: extent.width,
            height: extent.height,
        })
    }
}

/// transient buffer 的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBufferAttachment {
    pub size: Option<vk::DeviceSize>,
    pub memory: GfxMemoryUsage,
}
impl Default for RgBufferAttachment {
    fn default() -> Self {
        Self {
            size: None,
            memory: GfxMemoryUsage::GpuOnly,
        }
    }
}
impl RgBufferAttachment {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn size(mut self, size: vk::DeviceSize) -> Self {
        self.size = Some(size);
        self
    }

    #[inline]
    pub fn memory(mut self, memory: GfxMemoryUsage) -> Self {
        self.memory = memory;
        self
    }

    pub fn to_create_info(&self, usage: vk::BufferUsageFlags) -> Option<GfxBufferCreateInfo> {
        Some(GfxBufferCreateInfo::new(self.size?, usage, self.memory))
    }
}

pub type RgImageInferenceFn = dyn Fn(&RgInferenceContext<'_>, &mut RgImageAttachment) + Send + Sync;
pub type RgBufferInferenceFn = dyn Fn(&RgInferenceContext<'_>, &mut RgBufferAttachment) + Send + Sync;

/// 附件参数的推导规则
///
/// 规则中引用的名字与目标处于同一个图片段中。
#[derive(Clone)]
pub enum RgInferenceRule {
    /// extent + levels + layers
    SameShapeAs(Name),
    SameExtentAs(Name),
    /// 只取宽高，depth 为 1
    Same2dExtentAs(Name),
    SameFormatAs(Name),
    /// 除 usage 之外的所有参数
    SimilarTo(Name),
    /// buffer 的大小
    SameSizeAs(Name),
    Image(Arc<RgImageInferenceFn>),
    Buffer(Arc<RgBufferInferenceFn>),
}
impl RgInferenceRule {
    pub fn same_shape_as(name: impl Into<Name>) -> Self {
        Self::SameShapeAs(name.into())
    }

    pub fn same_extent_as(name: impl Into<Name>) -> Self {
        Self::SameExtentAs(name.into())
    }

    pub fn same_2d_extent_as(name: impl Into<Name>) -> Self {
        Self::Same2dExtentAs(name.into())
    }

    pub fn same_format_as(name: impl Into<Name>) -> Self {
        Self::SameFormatAs(name.into())
    }

    pub fn similar_to(name: impl Into<Name>) -> Self {
        Self::SimilarTo(name.into())
    }

    pub fn same_size_as(name: impl Into<Name>) -> Self {
        Self::SameSizeAs(name.into())
    }

    pub fn image(rule: impl Fn(&RgInferenceContext<'_>, &mut RgImageAttachment) + Send + Sync + 'static) -> Self {
        Self::Image(Arc::new(rule))
    }

    pub fn buffer(rule: impl Fn(&RgInferenceContext<'_>, &mut RgBufferAttachment) + Send + Sync + 'static) -> Self {
        Self::Buffer(Arc::new(rule))
    }

    /// 规则引用的源资源
    pub fn source(&self) -> Option<Name> {
        match self {
            Self::SameShapeAs(name)
            | Self::SameExtentAs(name)
            | Self::Same2dExtentAs(name)
            | Self::SameFormatAs(name)
            | Self::SimilarTo(name)
            | Self::SameSizeAs(name) => Some(*name),
            Self::Image(_) | Self::Buffer(_) => None,
        }
    }
}
impl fmt::Debug for RgInferenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SameShapeAs(name) => write!(f, "SameShapeAs({})", name),
            Self::SameExtentAs(name) => write!(f, "SameExtentAs({})", name),
            Self::Same2dExtentAs(name) => write!(f, "Same2dExtentAs({})", name),
            Self::SameFormatAs(name) => write!(f, "SameFormatAs({})", name),
            Self::SimilarTo(name) => write!(f, "SimilarTo({})", name),
            Self::SameSizeAs(name) => write!(f, "SameSizeAs({})", name),
            Self::Image(_) => f.write_str("Image(<closure>)"),
            Self::Buffer(_) => f.write_str("Buffer(<closure>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_info_needs_extent_and_format() {
        let partial = RgImageAttachment::new().format(vk::Format::R8G8B8A8_UNORM);
        assert_eq!(partial.missing(), vec!["extent"]);
        assert!(partial.to_create_info(vk::ImageUsageFlags::SAMPLED).is_none());

        let mut full = partial.extent_2d(64, 32);
        full.fill_defaults();
        let info = full.to_create_info(vk::ImageUsageFlags::SAMPLED).unwrap();
        assert_eq!(info.extent, vk::Extent3D { width: 64, height: 32, depth: 1 });
        assert_eq!(info.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!((info.mip_levels, info.array_layers), (1, 1));
    }

    #[test]
    fn defaults_do_not_override_explicit_values() {
        let mut attachment = RgImageAttachment::new().samples(vk::SampleCountFlags::TYPE_4).levels(5);
        attachment.fill_defaults();
        assert_eq!(attachment.samples, Some(vk::SampleCountFlags::TYPE_4));
        assert_eq!(attachment.mip_levels, Some(5));
        assert_eq!(attachment.array_layers, Some(1));
    }
}
