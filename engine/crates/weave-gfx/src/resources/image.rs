use ash::vk;

/// 根据 format 推导 aspect
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[inline]
pub fn is_depth_format(format: vk::Format) -> bool {
    format_aspect(format).intersects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL)
}

/// Image 的创建参数
///
/// 只包含可以比较和哈希的字段，直接作为 transient image cache 的 key。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageCreateInfo {
    pub image_type: vk::ImageType,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
}
// new & init
impl GfxImageCreateInfo {
    #[inline]
    pub fn new_image_2d_info(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            extent: extent.into(),
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            usage,
        }
    }
}
// tools
impl GfxImageCreateInfo {
    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }

    pub fn as_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo {
            image_type: self.image_type,
            format: self.format,
            extent: self.extent,
            mip_levels: self.mip_levels,
            array_layers: self.array_layers,
            samples: self.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: self.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            // 只能是 UNDEFINED 或者 PREINITIALIZED
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        }
    }

    pub fn view_info(&self, image: vk::Image) -> vk::ImageViewCreateInfo<'static> {
        vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(self.view_type)
            .format(self.format)
            .subresource_range(self.full_range())
    }

    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect(),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }
}

/// 已经创建好的 image，只持有句柄和描述信息
///
/// 内存由创建它的 `GfxDevice` 管理，因此可以自由复制，作为 cache 的 value。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImage {
    handle: vk::Image,
    view: vk::ImageView,
    info: GfxImageCreateInfo,
}
// new & init
impl GfxImage {
    #[inline]
    pub fn new(handle: vk::Image, view: vk::ImageView, info: GfxImageCreateInfo) -> Self {
        Self { handle, view, info }
    }
}
// getters
impl GfxImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn info(&self) -> &GfxImageCreateInfo {
        &self.info
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.info.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.info.extent.width,
            height: self.info.extent.height,
        }
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.info.samples
    }

    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        self.info.full_range()
    }
}

/// 外部提供的 swapchain image，不归 RenderGraph 管理
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxSwapchainImage {
    pub image: GfxImage,
    pub image_index: u32,
}

/// 清屏值
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GfxClearValue {
    Color([f32; 4]),
    ColorUint([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}
impl GfxClearValue {
    pub const BLACK: Self = Self::Color([0.0, 0.0, 0.0, 1.0]);
    pub const DEPTH_ONE: Self = Self::DepthStencil { depth: 1.0, stencil: 0 };
    pub const DEPTH_ZERO: Self = Self::DepthStencil { depth: 0.0, stencil: 0 };

    pub fn to_vk(&self) -> vk::ClearValue {
        match *self {
            Self::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            Self::ColorUint(uint32) => vk::ClearValue {
                color: vk::ClearColorValue { uint32 },
            },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }

    #[inline]
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::DepthStencil { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_from_format() {
        assert_eq!(format_aspect(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
        assert_eq!(format_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            format_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert!(is_depth_format(vk::Format::D16_UNORM));
        assert!(!is_depth_format(vk::Format::R16G16B16A16_SFLOAT));
    }

    #[test]
    fn create_info_is_a_key() {
        let extent = vk::Extent2D { width: 64, height: 32 };
        let a = GfxImageCreateInfo::new_image_2d_info(extent, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        let mut b = a;
        assert_eq!(a, b);
        b.usage |= vk::ImageUsageFlags::STORAGE;
        assert_ne!(a, b);
        assert_eq!(a.full_range().level_count, 1);
        assert_eq!(a.as_info().extent.depth, 1);
    }
}
