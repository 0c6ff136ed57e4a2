//! 资源访问方式
//!
//! `GfxAccess` 是一个普通的 bitflags 集合，每一位表示一种访问方式。
//! 每一位都能映射到 stage / access / layout，以及 image 和 buffer 的 usage。
//! 多个位组合时 stage 和 access 取并集；image layout 不一致时退化为 `GENERAL`。

use ash::vk;
use bitflags::bitflags;

use crate::state::{GfxBufferState, GfxImageState};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct GfxAccess: u64 {
        /// 颜色附件读取（blend / load）
        const COLOR_READ = 1 << 0;
        /// 颜色附件写入
        const COLOR_WRITE = 1 << 1;
        /// 深度模板只读
        const DEPTH_STENCIL_READ = 1 << 2;
        const DEPTH_STENCIL_WRITE = 1 << 3;
        const INPUT_ATTACHMENT_READ = 1 << 4;

        const VERTEX_ATTRIBUTE_READ = 1 << 5;
        const INDEX_READ = 1 << 6;
        const INDIRECT_READ = 1 << 7;

        const UNIFORM_READ_VERTEX = 1 << 8;
        const UNIFORM_READ_FRAGMENT = 1 << 9;
        const UNIFORM_READ_COMPUTE = 1 << 10;
        const UNIFORM_READ_RAY_TRACING = 1 << 11;

        const SAMPLED_VERTEX = 1 << 12;
        const SAMPLED_FRAGMENT = 1 << 13;
        const SAMPLED_COMPUTE = 1 << 14;
        const SAMPLED_RAY_TRACING = 1 << 15;

        const STORAGE_READ_FRAGMENT = 1 << 16;
        const STORAGE_READ_COMPUTE = 1 << 17;
        const STORAGE_READ_RAY_TRACING = 1 << 18;
        const STORAGE_WRITE_FRAGMENT = 1 << 19;
        const STORAGE_WRITE_COMPUTE = 1 << 20;
        const STORAGE_WRITE_RAY_TRACING = 1 << 21;

        const TRANSFER_READ = 1 << 22;
        const TRANSFER_WRITE = 1 << 23;

        /// 加速结构构建的输入（顶点、索引、实例、被引用的 BLAS）
        const AS_BUILD_READ = 1 << 24;
        /// 加速结构构建的输出
        const AS_BUILD_WRITE = 1 << 25;
        /// 着色器中读取加速结构（ray tracing pipeline）
        const AS_READ_RAY_TRACING = 1 << 26;
        /// 着色器中读取加速结构（ray query in compute）
        const AS_READ_COMPUTE = 1 << 27;

        const HOST_READ = 1 << 28;
        const HOST_WRITE = 1 << 29;

        /// 交给 presentation engine
        const PRESENT = 1 << 30;

        // 组合
        const COLOR_RW = Self::COLOR_READ.bits() | Self::COLOR_WRITE.bits();
        const DEPTH_STENCIL_RW = Self::DEPTH_STENCIL_READ.bits() | Self::DEPTH_STENCIL_WRITE.bits();
        const COMPUTE_RW = Self::STORAGE_READ_COMPUTE.bits() | Self::STORAGE_WRITE_COMPUTE.bits();
        const RAY_TRACING_RW = Self::STORAGE_READ_RAY_TRACING.bits() | Self::STORAGE_WRITE_RAY_TRACING.bits();
        const RAY_TRACING_READ = Self::STORAGE_READ_RAY_TRACING.bits();
        const RAY_TRACING_WRITE = Self::STORAGE_WRITE_RAY_TRACING.bits();
    }
}

/// 单个访问位的属性
#[derive(Clone, Copy, Debug)]
struct AccessInfo {
    bit: GfxAccess,
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    /// 对 buffer-only 的位没有意义，填 UNDEFINED
    layout: vk::ImageLayout,
    image_usage: vk::ImageUsageFlags,
    buffer_usage: vk::BufferUsageFlags,
    class: AccessClass,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct AccessClass: u8 {
        const IMAGE = 1 << 0;
        const BUFFER = 1 << 1;
        const ATTACHMENT = 1 << 2;
        const WRITE = 1 << 3;
    }
}

const IMG: AccessClass = AccessClass::IMAGE;
const BUF: AccessClass = AccessClass::BUFFER;
const BOTH: AccessClass = AccessClass::IMAGE.union(AccessClass::BUFFER);

const fn info(
    bit: GfxAccess,
    stage: vk::PipelineStageFlags2,
    access: vk::AccessFlags2,
    layout: vk::ImageLayout,
    image_usage: vk::ImageUsageFlags,
    buffer_usage: vk::BufferUsageFlags,
    class: AccessClass,
) -> AccessInfo {
    AccessInfo {
        bit,
        stage,
        access,
        layout,
        image_usage,
        buffer_usage,
        class,
    }
}

type S = vk::PipelineStageFlags2;
type A = vk::AccessFlags2;
type L = vk::ImageLayout;
type IU = vk::ImageUsageFlags;
type BU = vk::BufferUsageFlags;

const RT_STAGE: S = S::RAY_TRACING_SHADER_KHR;
const AS_BUILD_STAGE: S = S::ACCELERATION_STRUCTURE_BUILD_KHR;
const DEPTH_STAGE: S = S::from_raw(S::EARLY_FRAGMENT_TESTS.as_raw() | S::LATE_FRAGMENT_TESTS.as_raw());
const AS_BUILD_READ_ACCESS: A = A::from_raw(A::ACCELERATION_STRUCTURE_READ_KHR.as_raw() | A::SHADER_READ.as_raw());
const AS_INPUT_USAGE: BU =
    BU::from_raw(BU::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR.as_raw() | BU::SHADER_DEVICE_ADDRESS.as_raw());
const AS_STORAGE_USAGE: BU =
    BU::from_raw(BU::ACCELERATION_STRUCTURE_STORAGE_KHR.as_raw() | BU::SHADER_DEVICE_ADDRESS.as_raw());

#[rustfmt::skip]
const ACCESS_TABLE: &[AccessInfo] = &[
    info(GfxAccess::COLOR_READ, S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_READ, L::COLOR_ATTACHMENT_OPTIMAL, IU::COLOR_ATTACHMENT, BU::empty(), IMG.union(AccessClass::ATTACHMENT)),
    info(GfxAccess::COLOR_WRITE, S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_WRITE, L::COLOR_ATTACHMENT_OPTIMAL, IU::COLOR_ATTACHMENT, BU::empty(), IMG.union(AccessClass::ATTACHMENT).union(AccessClass::WRITE)),
    info(GfxAccess::DEPTH_STENCIL_READ, DEPTH_STAGE, A::DEPTH_STENCIL_ATTACHMENT_READ, L::DEPTH_STENCIL_READ_ONLY_OPTIMAL, IU::DEPTH_STENCIL_ATTACHMENT, BU::empty(), IMG.union(AccessClass::ATTACHMENT)),
    info(GfxAccess::DEPTH_STENCIL_WRITE, DEPTH_STAGE, A::DEPTH_STENCIL_ATTACHMENT_WRITE, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, IU::DEPTH_STENCIL_ATTACHMENT, BU::empty(), IMG.union(AccessClass::ATTACHMENT).union(AccessClass::WRITE)),
    info(GfxAccess::INPUT_ATTACHMENT_READ, S::FRAGMENT_SHADER, A::INPUT_ATTACHMENT_READ, L::SHADER_READ_ONLY_OPTIMAL, IU::INPUT_ATTACHMENT, BU::empty(), IMG),

    info(GfxAccess::VERTEX_ATTRIBUTE_READ, S::VERTEX_ATTRIBUTE_INPUT, A::VERTEX_ATTRIBUTE_READ, L::UNDEFINED, IU::empty(), BU::VERTEX_BUFFER, BUF),
    info(GfxAccess::INDEX_READ, S::INDEX_INPUT, A::INDEX_READ, L::UNDEFINED, IU::empty(), BU::INDEX_BUFFER, BUF),
    info(GfxAccess::INDIRECT_READ, S::DRAW_INDIRECT, A::INDIRECT_COMMAND_READ, L::UNDEFINED, IU::empty(), BU::INDIRECT_BUFFER, BUF),

    info(GfxAccess::UNIFORM_READ_VERTEX, S::VERTEX_SHADER, A::UNIFORM_READ, L::UNDEFINED, IU::empty(), BU::UNIFORM_BUFFER, BUF),
    info(GfxAccess::UNIFORM_READ_FRAGMENT, S::FRAGMENT_SHADER, A::UNIFORM_READ, L::UNDEFINED, IU::empty(), BU::UNIFORM_BUFFER, BUF),
    info(GfxAccess::UNIFORM_READ_COMPUTE, S::COMPUTE_SHADER, A::UNIFORM_READ, L::UNDEFINED, IU::empty(), BU::UNIFORM_BUFFER, BUF),
    info(GfxAccess::UNIFORM_READ_RAY_TRACING, RT_STAGE, A::UNIFORM_READ, L::UNDEFINED, IU::empty(), BU::UNIFORM_BUFFER, BUF),

    info(GfxAccess::SAMPLED_VERTEX, S::VERTEX_SHADER, A::SHADER_SAMPLED_READ, L::SHADER_READ_ONLY_OPTIMAL, IU::SAMPLED, BU::empty(), IMG),
    info(GfxAccess::SAMPLED_FRAGMENT, S::FRAGMENT_SHADER, A::SHADER_SAMPLED_READ, L::SHADER_READ_ONLY_OPTIMAL, IU::SAMPLED, BU::empty(), IMG),
    info(GfxAccess::SAMPLED_COMPUTE, S::COMPUTE_SHADER, A::SHADER_SAMPLED_READ, L::SHADER_READ_ONLY_OPTIMAL, IU::SAMPLED, BU::empty(), IMG),
    info(GfxAccess::SAMPLED_RAY_TRACING, RT_STAGE, A::SHADER_SAMPLED_READ, L::SHADER_READ_ONLY_OPTIMAL, IU::SAMPLED, BU::empty(), IMG),

    info(GfxAccess::STORAGE_READ_FRAGMENT, S::FRAGMENT_SHADER, A::SHADER_STORAGE_READ, L::GENERAL, IU::STORAGE, BU::STORAGE_BUFFER, BOTH),
    info(GfxAccess::STORAGE_READ_COMPUTE, S::COMPUTE_SHADER, A::SHADER_STORAGE_READ, L::GENERAL, IU::STORAGE, BU::STORAGE_BUFFER, BOTH),
    info(GfxAccess::STORAGE_READ_RAY_TRACING, RT_STAGE, A::SHADER_STORAGE_READ, L::GENERAL, IU::STORAGE, BU::STORAGE_BUFFER, BOTH),
    info(GfxAccess::STORAGE_WRITE_FRAGMENT, S::FRAGMENT_SHADER, A::SHADER_STORAGE_WRITE, L::GENERAL, IU::STORAGE, BU::STORAGE_BUFFER, BOTH.union(AccessClass::WRITE)),
    info(GfxAccess::STORAGE_WRITE_COMPUTE, S::COMPUTE_SHADER, A::SHADER_STORAGE_WRITE, L::GENERAL, IU::STORAGE, BU::STORAGE_BUFFER, BOTH.union(AccessClass::WRITE)),
    info(GfxAccess::STORAGE_WRITE_RAY_TRACING, RT_STAGE, A::SHADER_STORAGE_WRITE, L::GENERAL, IU::STORAGE, BU::STORAGE_BUFFER, BOTH.union(AccessClass::WRITE)),

    info(GfxAccess::TRANSFER_READ, S::TRANSFER, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL, IU::TRANSFER_SRC, BU::TRANSFER_SRC, BOTH),
    info(GfxAccess::TRANSFER_WRITE, S::TRANSFER, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL, IU::TRANSFER_DST, BU::TRANSFER_DST, BOTH.union(AccessClass::WRITE)),

    info(GfxAccess::AS_BUILD_READ, AS_BUILD_STAGE, AS_BUILD_READ_ACCESS, L::UNDEFINED, IU::empty(), AS_INPUT_USAGE, BUF),
    info(GfxAccess::AS_BUILD_WRITE, AS_BUILD_STAGE, A::ACCELERATION_STRUCTURE_WRITE_KHR, L::UNDEFINED, IU::empty(), AS_STORAGE_USAGE, BUF.union(AccessClass::WRITE)),
    info(GfxAccess::AS_READ_RAY_TRACING, RT_STAGE, A::ACCELERATION_STRUCTURE_READ_KHR, L::UNDEFINED, IU::empty(), BU::ACCELERATION_STRUCTURE_STORAGE_KHR, BUF),
    info(GfxAccess::AS_READ_COMPUTE, S::COMPUTE_SHADER, A::ACCELERATION_STRUCTURE_READ_KHR, L::UNDEFINED, IU::empty(), BU::ACCELERATION_STRUCTURE_STORAGE_KHR, BUF),

    info(GfxAccess::HOST_READ, S::HOST, A::HOST_READ, L::GENERAL, IU::empty(), BU::empty(), BOTH),
    info(GfxAccess::HOST_WRITE, S::HOST, A::HOST_WRITE, L::GENERAL, IU::empty(), BU::empty(), BOTH.union(AccessClass::WRITE)),

    info(GfxAccess::PRESENT, S::BOTTOM_OF_PIPE, A::NONE, L::PRESENT_SRC_KHR, IU::empty(), BU::empty(), IMG),
];

// 分类
impl GfxAccess {
    fn infos(self) -> impl Iterator<Item = &'static AccessInfo> {
        ACCESS_TABLE.iter().filter(move |info| self.contains(info.bit))
    }

    fn bits_of_class(class: AccessClass) -> Self {
        ACCESS_TABLE.iter().filter(|info| info.class.contains(class)).fold(Self::empty(), |acc, info| acc | info.bit)
    }

    /// 所有写入类的位
    pub fn write_bits() -> Self {
        Self::bits_of_class(AccessClass::WRITE)
    }

    /// 所有 color/depth 附件类的位
    pub fn attachment_bits() -> Self {
        Self::bits_of_class(AccessClass::ATTACHMENT)
    }

    /// 只能用于 image 的位
    pub fn image_only_bits() -> Self {
        ACCESS_TABLE
            .iter()
            .filter(|info| info.class.contains(AccessClass::IMAGE) && !info.class.contains(AccessClass::BUFFER))
            .fold(Self::empty(), |acc, info| acc | info.bit)
    }

    /// 只能用于 buffer 的位
    pub fn buffer_only_bits() -> Self {
        ACCESS_TABLE
            .iter()
            .filter(|info| info.class.contains(AccessClass::BUFFER) && !info.class.contains(AccessClass::IMAGE))
            .fold(Self::empty(), |acc, info| acc | info.bit)
    }

    #[inline]
    pub fn is_write(self) -> bool {
        self.intersects(Self::write_bits())
    }

    /// 含有任何非写入位即视为读
    #[inline]
    pub fn is_read(self) -> bool {
        !(self - Self::write_bits()).is_empty()
    }

    #[inline]
    pub fn is_attachment(self) -> bool {
        self.intersects(Self::attachment_bits())
    }

    /// 所有位都是附件访问
    #[inline]
    pub fn is_attachment_only(self) -> bool {
        !self.is_empty() && Self::attachment_bits().contains(self)
    }

    #[inline]
    pub fn is_color(self) -> bool {
        self.intersects(Self::COLOR_RW)
    }

    #[inline]
    pub fn is_depth_stencil(self) -> bool {
        self.intersects(Self::DEPTH_STENCIL_RW)
    }

    #[inline]
    pub fn is_valid_for_image(self) -> bool {
        !self.intersects(Self::buffer_only_bits())
    }

    #[inline]
    pub fn is_valid_for_buffer(self) -> bool {
        !self.intersects(Self::image_only_bits())
    }
}

// 映射
impl GfxAccess {
    /// stage 和 access 的并集
    pub fn stage_access(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        self.infos().fold((S::NONE, A::NONE), |(stage, access), info| (stage | info.stage, access | info.access))
    }

    /// 组合后的 image layout
    ///
    /// 深度只读与深度读写同时出现时取 `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`，
    /// 深度只读与采样同时出现时取 `DEPTH_STENCIL_READ_ONLY_OPTIMAL`，其余不一致时为 `GENERAL`。
    pub fn image_layout(self) -> vk::ImageLayout {
        let mut layouts: Vec<vk::ImageLayout> =
            self.infos().map(|info| info.layout).filter(|layout| *layout != L::UNDEFINED).collect();
        layouts.sort_by_key(|layout| layout.as_raw());
        layouts.dedup();

        match layouts.as_slice() {
            [] => L::UNDEFINED,
            [single] => *single,
            [a, b] => {
                let pair = |x: L, y: L| (*a == x && *b == y) || (*a == y && *b == x);
                if pair(L::DEPTH_STENCIL_READ_ONLY_OPTIMAL, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) {
                    L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else if pair(L::DEPTH_STENCIL_READ_ONLY_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) {
                    L::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                } else {
                    L::GENERAL
                }
            }
            _ => L::GENERAL,
        }
    }

    pub fn image_state(self) -> GfxImageState {
        let (stage, access) = self.stage_access();
        GfxImageState::new(stage, access, self.image_layout())
    }

    pub fn buffer_state(self) -> GfxBufferState {
        let (stage, access) = self.stage_access();
        GfxBufferState::new(stage, access)
    }

    pub fn image_usage(self) -> vk::ImageUsageFlags {
        self.infos().fold(IU::empty(), |acc, info| acc | info.image_usage)
    }

    pub fn buffer_usage(self) -> vk::BufferUsageFlags {
        self.infos().fold(BU::empty(), |acc, info| acc | info.buffer_usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_follows_bits() {
        assert!(GfxAccess::COLOR_WRITE.is_write());
        assert!(!GfxAccess::COLOR_WRITE.is_read());
        assert!(GfxAccess::COLOR_RW.is_write() && GfxAccess::COLOR_RW.is_read());
        assert!(GfxAccess::SAMPLED_FRAGMENT.is_read() && !GfxAccess::SAMPLED_FRAGMENT.is_write());
        assert!(GfxAccess::DEPTH_STENCIL_RW.is_attachment_only());
        assert!(!(GfxAccess::COLOR_WRITE | GfxAccess::SAMPLED_FRAGMENT).is_attachment_only());
    }

    #[test]
    fn combined_layouts() {
        assert_eq!(GfxAccess::COLOR_RW.image_layout(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(GfxAccess::DEPTH_STENCIL_RW.image_layout(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(
            (GfxAccess::DEPTH_STENCIL_READ | GfxAccess::SAMPLED_FRAGMENT).image_layout(),
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );
        assert_eq!((GfxAccess::SAMPLED_COMPUTE | GfxAccess::TRANSFER_READ).image_layout(), vk::ImageLayout::GENERAL);
        assert_eq!(GfxAccess::INDEX_READ.image_layout(), vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn usages_and_validity() {
        let access = GfxAccess::COLOR_WRITE | GfxAccess::SAMPLED_FRAGMENT | GfxAccess::TRANSFER_READ;
        assert_eq!(
            access.image_usage(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC
        );
        assert!(access.is_valid_for_image());
        assert!(!access.is_valid_for_buffer());

        assert_eq!(GfxAccess::COMPUTE_RW.buffer_usage(), vk::BufferUsageFlags::STORAGE_BUFFER);
        assert!(GfxAccess::COMPUTE_RW.is_valid_for_image() && GfxAccess::COMPUTE_RW.is_valid_for_buffer());
        assert!(!GfxAccess::AS_BUILD_WRITE.is_valid_for_image());
    }

    #[test]
    fn states_union_stages() {
        let state = (GfxAccess::SAMPLED_FRAGMENT | GfxAccess::SAMPLED_COMPUTE).image_state();
        assert_eq!(state.stage, vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(state.access, vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(state.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(GfxAccess::STORAGE_WRITE_COMPUTE.buffer_state().is_write());
    }
}
