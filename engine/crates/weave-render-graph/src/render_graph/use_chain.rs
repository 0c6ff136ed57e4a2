//! Use chain：每个资源按执行顺序的访问列表
//!
//! barrier、usage、附件推导和内存复用都以 use chain 为输入。

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::access::GfxAccess;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::image::GfxClearValue;
use weave_gfx::state::{GfxBufferState, GfxImageState};

use super::resolve::RgResolvedPass;

/// 资源的一次访问
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RgUse {
    /// 执行顺序中的位置
    pub pass: usize,
    pub pass_name: Name,
    pub access: GfxAccess,
    pub domain: QueueDomain,
    /// 以 load op 的形式清除
    pub clear: Option<GfxClearValue>,
}
impl RgUse {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.access.image_layout()
    }

    #[inline]
    pub fn image_state(&self) -> GfxImageState {
        self.access.image_state()
    }

    #[inline]
    pub fn buffer_state(&self) -> GfxBufferState {
        self.access.buffer_state()
    }
}

/// 按执行顺序构建所有资源的 use chain
///
/// `passes` 是声明顺序的 pass，`order` 是执行顺序。
pub(crate) fn build_use_chains(passes: &[RgResolvedPass], order: &[usize], resource_count: usize) -> Vec<Vec<RgUse>> {
    let mut chains: Vec<Vec<RgUse>> = vec![Vec::new(); resource_count];
    for (position, &pass_index) in order.iter().enumerate() {
        let pass = &passes[pass_index];
        for u in &pass.uses {
            chains[u.resource].push(RgUse {
                pass: position,
                pass_name: pass.name,
                access: u.access,
                domain: pass.domain,
                clear: u.clear,
            });
        }
    }
    chains
}

/// use chain 需要的 image usage
pub fn compute_usage(chain: &[RgUse]) -> vk::ImageUsageFlags {
    chain.iter().fold(vk::ImageUsageFlags::empty(), |acc, u| acc | u.access.image_usage())
}

/// use chain 需要的 buffer usage
pub fn compute_buffer_usage(chain: &[RgUse]) -> vk::BufferUsageFlags {
    chain.iter().fold(vk::BufferUsageFlags::empty(), |acc, u| acc | u.access.buffer_usage())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn use_of(pass: usize, access: GfxAccess) -> RgUse {
        RgUse {
            pass,
            pass_name: Name::new("p"),
            access,
            domain: QueueDomain::Graphics,
            clear: None,
        }
    }

    #[test]
    fn usage_is_union_of_chain() {
        let chain = [use_of(0, GfxAccess::COLOR_WRITE), use_of(1, GfxAccess::SAMPLED_FRAGMENT)];
        let usage = compute_usage(&chain);
        assert!(usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(!usage.contains(vk::ImageUsageFlags::STORAGE));

        let chain = [use_of(0, GfxAccess::TRANSFER_WRITE), use_of(1, GfxAccess::STORAGE_READ_COMPUTE)];
        let usage = compute_buffer_usage(&chain);
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }

    #[test]
    fn layout_comes_from_access() {
        assert_eq!(use_of(0, GfxAccess::SAMPLED_FRAGMENT).layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(use_of(0, GfxAccess::COLOR_WRITE).is_write());
    }
}
