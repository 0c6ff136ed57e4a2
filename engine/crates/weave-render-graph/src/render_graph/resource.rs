//! 资源声明与绑定
//!
//! Pass 只通过名字声明对资源的访问，名字最终绑定到下面几种来源之一：
//! 外部资源、swapchain、由图管理的 transient 资源，或者已经执行完的 future 的输出。

use ash::vk;
use weave_crate_tools::name::Name;
use weave_gfx::access::GfxAccess;
use weave_gfx::commands::submit_info::GfxSubmitTicket;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::buffer::GfxBuffer;
use weave_gfx::resources::image::{GfxClearValue, GfxImage, GfxSwapchainImage};

use super::attachment::{RgBufferAttachment, RgImageAttachment};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgResourceKind {
    Image,
    Buffer,
}

/// pass 对一个名字的访问声明
///
/// `name` 可以带 `+` 后缀：只读声明会绑定到该资源在整张图中的最后一次写入。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgResourceUse {
    pub name: Name,
    pub kind: RgResourceKind,
    pub access: GfxAccess,
    /// 为空时使用 pass 的 domain
    pub domain: Option<QueueDomain>,
}
// new & init
impl RgResourceUse {
    #[inline]
    pub fn image(name: impl Into<Name>, access: GfxAccess) -> Self {
        Self {
            name: name.into(),
            kind: RgResourceKind::Image,
            access,
            domain: None,
        }
    }

    #[inline]
    pub fn buffer(name: impl Into<Name>, access: GfxAccess) -> Self {
        Self {
            name: name.into(),
            kind: RgResourceKind::Buffer,
            access,
            domain: None,
        }
    }

    /// builder
    #[inline]
    pub fn on(mut self, domain: QueueDomain) -> Self {
        self.domain = Some(domain);
        self
    }
}
// getters
impl RgResourceUse {
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }

    /// 纯读取，不含任何写入位
    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.access.is_write()
    }
}

/// 图执行之后资源所在的物理对象
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgPhysicalResource {
    Image(GfxImage),
    Buffer(GfxBuffer),
}
impl RgPhysicalResource {
    #[inline]
    pub fn kind(&self) -> RgResourceKind {
        match self {
            Self::Image(_) => RgResourceKind::Image,
            Self::Buffer(_) => RgResourceKind::Buffer,
        }
    }

    #[inline]
    pub fn image(&self) -> Option<GfxImage> {
        match self {
            Self::Image(image) => Some(*image),
            Self::Buffer(_) => None,
        }
    }

    #[inline]
    pub fn buffer(&self) -> Option<GfxBuffer> {
        match self {
            Self::Buffer(buffer) => Some(*buffer),
            Self::Image(_) => None,
        }
    }
}

/// future 执行完成之后的输出
///
/// 记录物理资源以及它最后的访问状态，下一张图以此作为初始状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgFutureValue {
    pub name: Name,
    pub resource: RgPhysicalResource,
    pub last_access: GfxAccess,
    pub domain: QueueDomain,
    /// 最后一次写入该资源的提交
    pub ticket: Option<GfxSubmitTicket>,
}
impl RgFutureValue {
    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        match self.resource {
            RgPhysicalResource::Image(_) => self.last_access.image_layout(),
            RgPhysicalResource::Buffer(_) => vk::ImageLayout::UNDEFINED,
        }
    }
}

/// 名字绑定的来源
#[derive(Clone, Debug, PartialEq)]
pub enum RgAttachment {
    /// 图外部创建的 image，`initial` 是进入图之前最后一次访问
    ExternalImage {
        image: GfxImage,
        initial: GfxAccess,
        domain: QueueDomain,
    },
    ExternalBuffer {
        buffer: GfxBuffer,
        initial: GfxAccess,
        domain: QueueDomain,
    },
    Swapchain(GfxSwapchainImage),
    /// 由图分配的 image，缺失的参数通过推导补全
    TransientImage(RgImageAttachment),
    TransientBuffer(RgBufferAttachment),
    /// 已经执行完的 future 的输出
    Materialized(RgFutureValue),
}
impl RgAttachment {
    pub fn kind(&self) -> RgResourceKind {
        match self {
            Self::ExternalImage { .. } | Self::Swapchain(_) | Self::TransientImage(_) => RgResourceKind::Image,
            Self::ExternalBuffer { .. } | Self::TransientBuffer(_) => RgResourceKind::Buffer,
            Self::Materialized(value) => value.resource.kind(),
        }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientImage(_) | Self::TransientBuffer(_))
    }

    /// 进入图时资源中是否已经有内容
    #[inline]
    pub fn has_contents(&self) -> bool {
        !self.is_transient()
    }

    /// 进入图之前的访问和所在 domain
    pub fn initial_access(&self) -> (GfxAccess, QueueDomain) {
        match self {
            Self::ExternalImage { initial, domain, .. } | Self::ExternalBuffer { initial, domain, .. } => {
                (*initial, *domain)
            }
            Self::Materialized(value) => (value.last_access, value.domain),
            Self::Swapchain(_) | Self::TransientImage(_) | Self::TransientBuffer(_) => {
                (GfxAccess::empty(), QueueDomain::Graphics)
            }
        }
    }
}

/// 名字上的绑定，`clear` 表示第一次使用之前需要清除
#[derive(Clone, Debug, PartialEq)]
pub struct RgBinding {
    pub attachment: RgAttachment,
    pub clear: Option<GfxClearValue>,
}
impl RgBinding {
    #[inline]
    pub fn new(attachment: RgAttachment) -> Self {
        Self {
            attachment,
            clear: None,
        }
    }

    #[inline]
    pub fn with_clear(attachment: RgAttachment, clear: GfxClearValue) -> Self {
        Self {
            attachment,
            clear: Some(clear),
        }
    }

    /// 可以直接读取：有外部内容，或者有待执行的清除
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.attachment.has_contents() || self.clear.is_some()
    }
}

/// 图结束时把资源交给某个 domain 上的某种访问
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgRelease {
    pub access: GfxAccess,
    pub domain: QueueDomain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transients_have_no_contents_until_cleared() {
        let transient = RgBinding::new(RgAttachment::TransientImage(RgImageAttachment::new()));
        assert!(!transient.is_readable());

        let cleared =
            RgBinding::with_clear(RgAttachment::TransientImage(RgImageAttachment::new()), GfxClearValue::BLACK);
        assert!(cleared.is_readable());

        let buffer = RgAttachment::TransientBuffer(RgBufferAttachment::new().size(256));
        assert_eq!(buffer.kind(), RgResourceKind::Buffer);
        assert_eq!(buffer.initial_access(), (GfxAccess::empty(), QueueDomain::Graphics));
    }
}
