use ash::vk;

use crate::state::{GfxBufferState, GfxImageState};

/// image memory barrier
///
/// 以普通数据保存所有字段，可以比较，也可以在录制时转换成 `vk::ImageMemoryBarrier2`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageBarrier {
    pub image: vk::Image,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
    pub aspect: vk::ImageAspectFlags,
    pub level_count: u32,
    pub layer_count: u32,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            image: vk::Image::null(),
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
            aspect: vk::ImageAspectFlags::COLOR,
            level_count: vk::REMAINING_MIP_LEVELS,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由前后两个状态直接构造
    pub fn from_states(image: vk::Image, src: GfxImageState, dst: GfxImageState) -> Self {
        Self::new()
            .image(image)
            .layout_transfer(src.layout, dst.layout)
            .src_mask(src.stage, src.src_access())
            .dst_mask(dst.stage, dst.access)
    }

    /// builder
    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.src_queue_family = src_queue_family_index;
        self.dst_queue_family = dst_queue_family_index;
        self
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.old_layout = old_layout;
        self.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage_mask;
        self.src_access = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.dst_stage = dst_stage_mask;
        self.dst_access = dst_access_mask;
        self
    }

    /// builder
    /// layer 和 miplevel 覆盖整个 image
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.image = image;
        self
    }

    #[inline]
    pub fn is_queue_transfer(&self) -> bool {
        self.src_queue_family != self.dst_queue_family
    }

    pub fn to_vk(&self) -> vk::ImageMemoryBarrier2<'static> {
        vk::ImageMemoryBarrier2 {
            src_stage_mask: self.src_stage,
            src_access_mask: self.src_access,
            dst_stage_mask: self.dst_stage,
            dst_access_mask: self.dst_access,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            src_queue_family_index: self.src_queue_family,
            dst_queue_family_index: self.dst_queue_family,
            image: self.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: self.aspect,
                base_mip_level: 0,
                level_count: self.level_count,
                base_array_layer: 0,
                layer_count: self.layer_count,
            },
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBufferBarrier {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            buffer: vk::Buffer::null(),
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_stage: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::NONE,
            dst_access: vk::AccessFlags2::NONE,
            src_queue_family: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_states(buffer: vk::Buffer, src: GfxBufferState, dst: GfxBufferState) -> Self {
        Self::new()
            .buffer(buffer, 0, vk::WHOLE_SIZE)
            .src_mask(src.stage, src.src_access())
            .dst_mask(dst.stage, dst.access)
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.src_stage = src_stage_mask;
        self.src_access = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.dst_stage = dst_stage_mask;
        self.dst_access = dst_access_mask;
        self
    }

    #[inline]
    pub fn queue_family_transfer(mut self, src_queue_family_index: u32, dst_queue_family_index: u32) -> Self {
        self.src_queue_family = src_queue_family_index;
        self.dst_queue_family = dst_queue_family_index;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.buffer = buffer;
        self.offset = offset;
        self.size = size;
        self
    }

    pub fn to_vk(&self) -> vk::BufferMemoryBarrier2<'static> {
        vk::BufferMemoryBarrier2 {
            src_stage_mask: self.src_stage,
            src_access_mask: self.src_access,
            dst_stage_mask: self.dst_stage,
            dst_access_mask: self.dst_access,
            src_queue_family_index: self.src_queue_family,
            dst_queue_family_index: self.dst_queue_family,
            buffer: self.buffer,
            offset: self.offset,
            size: self.size,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_states_drops_src_reads() {
        let src = GfxImageState::new(
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        let barrier = GfxImageBarrier::from_states(vk::Image::null(), src, GfxImageState::TRANSFER_DST);
        assert_eq!(barrier.src_access, vk::AccessFlags2::NONE);
        assert_eq!(barrier.dst_access, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(!barrier.is_queue_transfer());

        let raw = barrier.queue_family_transfer(0, 1).to_vk();
        assert_eq!(raw.src_queue_family_index, 0);
        assert_eq!(raw.dst_queue_family_index, 1);
        assert_eq!(raw.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
