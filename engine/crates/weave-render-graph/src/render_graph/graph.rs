//! RenderGraph 片段
//!
//! 一个 `RenderGraph` 是一组 pass、名字绑定、推导规则和输入 future 的集合。
//! 片段之间通过 `attach_in` 组合，编译时合并成一张完整的图。

use std::sync::atomic::{AtomicU64, Ordering};

use weave_crate_tools::name::Name;
use weave_gfx::access::GfxAccess;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::buffer::GfxBuffer;
use weave_gfx::resources::image::{GfxClearValue, GfxImage, GfxSwapchainImage};

use super::attachment::{RgBufferAttachment, RgImageAttachment, RgInferenceRule};
use super::future::RgFuture;
use super::pass::{RgPass, RgPassDesc, RgPassNode};
use super::resource::{RgAttachment, RgBinding, RgRelease};

/// 片段的唯一标识，同一个片段在一次编译中只会被合并一次
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(u64);
impl FragmentId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// 声明式的渲染图片段
///
/// # 使用流程
///
/// 1. 创建: `RenderGraph::new("frame")`
/// 2. 绑定资源: `attach_image` / `attach_external_image` / `attach_swapchain` / `attach_in` ...
/// 3. 添加 Pass: `add_pass(RgPassDesc::new("gbuffer")...)`
/// 4. 编译: `graph.compile(RgCompileOptions::default())`
/// 5. 执行: `compiled.execute(&ctx)`
pub struct RenderGraph {
    pub(crate) id: FragmentId,
    pub(crate) name: Name,

    /// 按添加顺序
    pub(crate) passes: Vec<RgPassNode>,
    pub(crate) bindings: Vec<(Name, RgBinding)>,
    pub(crate) inputs: Vec<(Name, RgFuture)>,
    /// (name_out, name_in)
    pub(crate) aliases: Vec<(Name, Name)>,
    pub(crate) rules: Vec<(Name, RgInferenceRule)>,
    pub(crate) releases: Vec<(Name, RgRelease)>,
}
// new & init
impl RenderGraph {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            id: FragmentId::next(),
            name: name.into(),
            passes: Vec::new(),
            bindings: Vec::new(),
            inputs: Vec::new(),
            aliases: Vec::new(),
            rules: Vec::new(),
            releases: Vec::new(),
        }
    }

    /// 保持同一个 id 的副本，只在合并 shared fragment 时使用
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            passes: self.passes.clone(),
            bindings: self.bindings.clone(),
            inputs: self.inputs.iter().map(|(name, future)| (*name, future.duplicate())).collect(),
            aliases: self.aliases.clone(),
            rules: self.rules.clone(),
            releases: self.releases.clone(),
        }
    }
}
// getters
impl RenderGraph {
    #[inline]
    pub fn id(&self) -> FragmentId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Name {
        self.name
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}
// passes
impl RenderGraph {
    pub fn add_pass(&mut self, desc: RgPassDesc) -> &mut Self {
        self.passes.push(desc.into_node());
        self
    }

    /// 添加实现了 `RgPass` 的 pass，`setup` 会立即被调用
    pub fn add_rg_pass<P: RgPass + 'static>(&mut self, name: impl Into<Name>, pass: P) -> &mut Self {
        self.passes.push(RgPassNode::from_pass(name.into(), pass));
        self
    }

    /// 在 `name_in` 上插入一个清除 pass，之后可以用 `name_out` 引用清除后的结果
    pub fn clear_image(
        &mut self,
        name_in: impl Into<Name>,
        name_out: impl Into<Name>,
        value: GfxClearValue,
    ) -> &mut Self {
        let name_in = name_in.into().base();
        let name_out = name_out.into().base();
        self.passes.push(clear_pass_node(name_in, value));
        self.aliases.push((name_out, name_in));
        self
    }
}
// bindings
impl RenderGraph {
    fn bind(&mut self, name: Name, binding: RgBinding) -> &mut Self {
        self.bindings.push((name.base(), binding));
        self
    }

    /// 由图分配的 image，未指定的参数通过推导补全
    pub fn attach_image(&mut self, name: impl Into<Name>, attachment: RgImageAttachment) -> &mut Self {
        self.bind(name.into(), RgBinding::new(RgAttachment::TransientImage(attachment)))
    }

    /// 由图分配的 image，在第一次使用之前清除
    pub fn attach_and_clear_image(
        &mut self,
        name: impl Into<Name>,
        attachment: RgImageAttachment,
        value: GfxClearValue,
    ) -> &mut Self {
        self.bind(name.into(), RgBinding::with_clear(RgAttachment::TransientImage(attachment), value))
    }

    /// 外部 image，`initial` 是进入图之前在 graphics 上的最后一次访问
    pub fn attach_external_image(&mut self, name: impl Into<Name>, image: GfxImage, initial: GfxAccess) -> &mut Self {
        self.attach_external_image_on(name, image, initial, QueueDomain::Graphics)
    }

    pub fn attach_external_image_on(
        &mut self,
        name: impl Into<Name>,
        image: GfxImage,
        initial: GfxAccess,
        domain: QueueDomain,
    ) -> &mut Self {
        self.bind(
            name.into(),
            RgBinding::new(RgAttachment::ExternalImage {
                image,
                initial,
                domain,
            }),
        )
    }

    /// 外部 buffer，之前的访问已经同步完成
    pub fn attach_buffer(&mut self, name: impl Into<Name>, buffer: GfxBuffer) -> &mut Self {
        self.attach_buffer_with(name, buffer, GfxAccess::empty(), QueueDomain::Graphics)
    }

    pub fn attach_buffer_with(
        &mut self,
        name: impl Into<Name>,
        buffer: GfxBuffer,
        initial: GfxAccess,
        domain: QueueDomain,
    ) -> &mut Self {
        self.bind(
            name.into(),
            RgBinding::new(RgAttachment::ExternalBuffer {
                buffer,
                initial,
                domain,
            }),
        )
    }

    pub fn attach_transient_buffer(&mut self, name: impl Into<Name>, attachment: RgBufferAttachment) -> &mut Self {
        self.bind(name.into(), RgBinding::new(RgAttachment::TransientBuffer(attachment)))
    }

    /// swapchain image，图结束时默认转换到 `PRESENT`
    pub fn attach_swapchain(&mut self, name: impl Into<Name>, swapchain: GfxSwapchainImage) -> &mut Self {
        self.bind(name.into(), RgBinding::new(RgAttachment::Swapchain(swapchain)))
    }

    /// 把另一张图的输出绑定到 `name`
    pub fn attach_in(&mut self, name: impl Into<Name>, future: RgFuture) -> &mut Self {
        self.inputs.push((name.into().base(), future));
        self
    }

    pub fn inference_rule(&mut self, name: impl Into<Name>, rule: RgInferenceRule) -> &mut Self {
        self.rules.push((name.into().base(), rule));
        self
    }

    /// 图结束时把资源转换到 `domain` 上的 `access`
    pub fn release(&mut self, name: impl Into<Name>, access: GfxAccess, domain: QueueDomain) -> &mut Self {
        self.releases.push((name.into().base(), RgRelease { access, domain }));
        self
    }
}

/// 清除一个 image 的 pass
pub(crate) fn clear_pass_node(name: Name, value: GfxClearValue) -> RgPassNode {
    RgPassDesc::new(Name::new("clear").append(":").append(name.as_str()))
        .image(name, GfxAccess::TRANSFER_WRITE)
        .execute(move |ctx| {
            ctx.clear_image(name, value);
        })
        .into_node()
}
