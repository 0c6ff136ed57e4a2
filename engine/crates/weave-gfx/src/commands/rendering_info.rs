use ash::vk;

use crate::resources::image::GfxClearValue;

/// dynamic rendering 的一个附件
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GfxRenderingAttachment {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<GfxClearValue>,
}
impl GfxRenderingAttachment {
    pub fn to_vk(&self) -> vk::RenderingAttachmentInfo<'static> {
        let mut info = vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(self.layout)
            .load_op(self.load_op)
            .store_op(self.store_op);
        if let Some(clear_value) = self.clear_value {
            info = info.clear_value(clear_value.to_vk());
        }
        info
    }
}

/// `vkCmdBeginRendering` 需要的全部信息
#[derive(Clone, Debug, PartialEq, Default)]
pub struct GfxRenderingInfo {
    pub extent: vk::Extent2D,
    pub layer_count: u32,
    pub samples: vk::SampleCountFlags,
    pub color_attachments: Vec<GfxRenderingAttachment>,
    pub depth_attachment: Option<GfxRenderingAttachment>,
}
impl GfxRenderingInfo {
    #[inline]
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    pub fn color_formats(&self) -> Vec<vk::Format> {
        self.color_attachments.iter().map(|attach| attach.format).collect()
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_attachment.map(|attach| attach.format).unwrap_or(vk::Format::UNDEFINED)
    }
}
