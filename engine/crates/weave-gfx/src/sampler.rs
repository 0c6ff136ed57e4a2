use ash::vk;

/// Sampler 描述
///
/// 浮点字段以 bit 形式保存，使整个描述可以作为 cache key。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerCreateInfo {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub border_color: vk::BorderColor,
    min_lod_bits: u32,
    max_lod_bits: u32,
}
impl Default for GfxSamplerCreateInfo {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
            compare_op: None,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            min_lod_bits: 0.0f32.to_bits(),
            max_lod_bits: vk::LOD_CLAMP_NONE.to_bits(),
        }
    }
}
// new & init
impl GfxSamplerCreateInfo {
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Default::default()
        }
    }

    #[inline]
    pub fn lod_range(mut self, min_lod: f32, max_lod: f32) -> Self {
        self.min_lod_bits = min_lod.to_bits();
        self.max_lod_bits = max_lod.to_bits();
        self
    }
}
// tools
impl GfxSamplerCreateInfo {
    #[inline]
    pub fn min_lod(&self) -> f32 {
        f32::from_bits(self.min_lod_bits)
    }

    #[inline]
    pub fn max_lod(&self) -> f32 {
        f32::from_bits(self.max_lod_bits)
    }

    pub fn as_info(&self) -> vk::SamplerCreateInfo<'static> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .mipmap_mode(self.mipmap_mode)
            .min_lod(self.min_lod())
            .max_lod(self.max_lod())
            .border_color(self.border_color);

        if self.max_anisotropy > 0 {
            create_info = create_info.anisotropy_enable(true).max_anisotropy(self.max_anisotropy as f32);
        } else {
            create_info = create_info.anisotropy_enable(false);
        }

        if let Some(compare_op) = self.compare_op {
            create_info = create_info.compare_enable(true).compare_op(compare_op);
        } else {
            create_info = create_info.compare_enable(false);
        }

        create_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn lod_bits_participate_in_hash() {
        let a = GfxSamplerCreateInfo::default();
        let b = GfxSamplerCreateInfo::default().lod_range(0.0, 4.0);
        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(b.max_lod(), 4.0);
        assert_eq!(a.as_info().max_lod, vk::LOD_CLAMP_NONE);
    }
}
