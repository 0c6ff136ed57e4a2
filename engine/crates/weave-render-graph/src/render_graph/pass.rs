//! Pass 定义和构建器
//!
//! 两种声明 pass 的方式：
//!
//! - `RgPassDesc`: 名字 + 访问列表 + 执行闭包
//! - `RgPass` trait: 在 `setup` 中通过 `RgPassBuilder` 声明访问
//!
//! 两者最终都变成 `RgPassNode`，执行回调以类型擦除的 `RgPassExecutor` 保存。

use std::fmt;
use std::sync::Arc;

use weave_crate_tools::name::Name;
use weave_gfx::access::GfxAccess;
use weave_gfx::queue::QueueDomain;

use super::pass_context::RgPassContext;
use super::resource::RgResourceUse;

/// 类型擦除的 Pass 执行器
pub trait RgPassExecutor: Send + Sync {
    fn execute(&self, ctx: &mut RgPassContext<'_>);
}

/// 包装用户 Pass 实现的执行器
struct RgPassExecutorWrapper<P: RgPass> {
    pass: P,
}
impl<P: RgPass> RgPassExecutor for RgPassExecutorWrapper<P> {
    fn execute(&self, ctx: &mut RgPassContext<'_>) {
        self.pass.execute(ctx);
    }
}

struct RgClosureExecutor<F> {
    f: F,
}
impl<F> RgPassExecutor for RgClosureExecutor<F>
where
    F: Fn(&mut RgPassContext<'_>) + Send + Sync,
{
    fn execute(&self, ctx: &mut RgPassContext<'_>) {
        (self.f)(ctx);
    }
}

/// 不录制任何命令
struct RgNoopExecutor;
impl RgPassExecutor for RgNoopExecutor {
    fn execute(&self, _ctx: &mut RgPassContext<'_>) {}
}

/// RgPass trait
///
/// 定义渲染图中的一个 Pass。
///
/// # 示例
///
/// ```ignore
/// struct BlurPass;
///
/// impl RgPass for BlurPass {
///     fn setup(&mut self, builder: &mut RgPassBuilder) {
///         builder.on(QueueDomain::Compute);
///         builder.read_image("hdr", GfxAccess::SAMPLED_COMPUTE);
///         builder.write_image("blurred", GfxAccess::STORAGE_WRITE_COMPUTE);
///     }
///
///     fn execute(&self, ctx: &mut RgPassContext<'_>) {
///         ctx.bind_compute_pipeline("blur")
///             .bind_sampled_image(0, 0, "hdr", GfxSamplerCreateInfo::default())
///             .bind_storage_image(0, 1, "blurred")
///             .dispatch_invocations(UVec3::new(1920, 1080, 1), UVec3::new(8, 8, 1));
///     }
/// }
/// ```
pub trait RgPass: Send + Sync {
    /// 声明 Pass 访问的资源
    fn setup(&mut self, builder: &mut RgPassBuilder);

    /// 录制命令，资源只能通过声明过的名字访问
    fn execute(&self, ctx: &mut RgPassContext<'_>);
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用。
pub struct RgPassBuilder {
    pub(crate) name: Name,
    pub(crate) domain: QueueDomain,
    pub(crate) uses: Vec<RgResourceUse>,
}
impl RgPassBuilder {
    pub(crate) fn new(name: Name) -> Self {
        Self {
            name,
            domain: QueueDomain::Graphics,
            uses: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> Name {
        self.name
    }

    /// 指定 pass 执行的 queue domain，默认为 graphics
    #[inline]
    pub fn on(&mut self, domain: QueueDomain) -> &mut Self {
        self.domain = domain;
        self
    }

    /// 声明读取图像
    ///
    /// 名字带 `+` 后缀时读取该资源最终的写入结果。
    #[inline]
    pub fn read_image(&mut self, name: impl Into<Name>, access: GfxAccess) -> &mut Self {
        self.use_image(name, access)
    }

    /// 声明写入图像
    #[inline]
    pub fn write_image(&mut self, name: impl Into<Name>, access: GfxAccess) -> &mut Self {
        self.use_image(name, access)
    }

    pub fn use_image(&mut self, name: impl Into<Name>, access: GfxAccess) -> &mut Self {
        self.uses.push(RgResourceUse::image(name, access));
        self
    }

    #[inline]
    pub fn read_buffer(&mut self, name: impl Into<Name>, access: GfxAccess) -> &mut Self {
        self.use_buffer(name, access)
    }

    #[inline]
    pub fn write_buffer(&mut self, name: impl Into<Name>, access: GfxAccess) -> &mut Self {
        self.use_buffer(name, access)
    }

    pub fn use_buffer(&mut self, name: impl Into<Name>, access: GfxAccess) -> &mut Self {
        self.uses.push(RgResourceUse::buffer(name, access));
        self
    }
}

/// 以闭包执行的 pass 描述
///
/// ```ignore
/// graph.add_pass(
///     RgPassDesc::new("tonemap")
///         .image("hdr", GfxAccess::SAMPLED_FRAGMENT)
///         .image("swapchain", GfxAccess::COLOR_WRITE)
///         .execute(|ctx| {
///             ctx.set_viewport_full(0).set_scissor_full(0).bind_graphics_pipeline("tonemap").draw(3, 1, 0, 0);
///         }),
/// );
/// ```
pub struct RgPassDesc {
    name: Name,
    domain: QueueDomain,
    uses: Vec<RgResourceUse>,
    executor: Option<Arc<dyn RgPassExecutor>>,
}
impl RgPassDesc {
    pub fn new(name: impl Into<Name>) -> Self {
        Self {
            name: name.into(),
            domain: QueueDomain::Graphics,
            uses: Vec::new(),
            executor: None,
        }
    }

    #[inline]
    pub fn on(mut self, domain: QueueDomain) -> Self {
        self.domain = domain;
        self
    }

    #[inline]
    pub fn image(mut self, name: impl Into<Name>, access: GfxAccess) -> Self {
        self.uses.push(RgResourceUse::image(name, access));
        self
    }

    #[inline]
    pub fn buffer(mut self, name: impl Into<Name>, access: GfxAccess) -> Self {
        self.uses.push(RgResourceUse::buffer(name, access));
        self
    }

    #[inline]
    pub fn uses(mut self, uses: impl IntoIterator<Item = RgResourceUse>) -> Self {
        self.uses.extend(uses);
        self
    }

    pub fn execute(mut self, f: impl Fn(&mut RgPassContext<'_>) + Send + Sync + 'static) -> Self {
        self.executor = Some(Arc::new(RgClosureExecutor { f }));
        self
    }

    pub(crate) fn into_node(self) -> RgPassNode {
        RgPassNode {
            name: self.name,
            domain: self.domain,
            uses: self.uses,
            executor: self.executor.unwrap_or_else(|| Arc::new(RgNoopExecutor)),
        }
    }
}

/// Pass 节点数据
#[derive(Clone)]
pub struct RgPassNode {
    pub name: Name,
    pub domain: QueueDomain,
    pub uses: Vec<RgResourceUse>,

    /// 执行回调（类型擦除的 Pass 实现）
    pub(crate) executor: Arc<dyn RgPassExecutor>,
}
impl RgPassNode {
    pub(crate) fn from_pass<P: RgPass + 'static>(name: Name, mut pass: P) -> Self {
        let mut builder = RgPassBuilder::new(name);
        pass.setup(&mut builder);
        Self {
            name: builder.name,
            domain: builder.domain,
            uses: builder.uses,
            executor: Arc::new(RgPassExecutorWrapper { pass }),
        }
    }
}
impl fmt::Debug for RgPassNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgPassNode")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShadowPass;
    impl RgPass for ShadowPass {
        fn setup(&mut self, builder: &mut RgPassBuilder) {
            builder.write_image("shadow_map", GfxAccess::DEPTH_STENCIL_RW);
            builder.read_buffer("shadow_casters", GfxAccess::VERTEX_ATTRIBUTE_READ);
        }

        fn execute(&self, _ctx: &mut RgPassContext<'_>) {}
    }

    #[test]
    fn trait_passes_declare_through_builder() {
        let node = RgPassNode::from_pass(Name::new("shadow"), ShadowPass);
        assert_eq!(node.domain, QueueDomain::Graphics);
        assert_eq!(node.uses.len(), 2);
        assert_eq!(node.uses[0].name, Name::new("shadow_map"));
        assert!(node.uses[0].is_write());
        assert!(node.uses[1].is_read_only());
    }

    #[test]
    fn desc_keeps_declaration_order() {
        let node = RgPassDesc::new("bloom")
            .on(QueueDomain::Compute)
            .image("hdr", GfxAccess::SAMPLED_COMPUTE)
            .image("bloom", GfxAccess::STORAGE_WRITE_COMPUTE)
            .into_node();
        assert_eq!(node.domain, QueueDomain::Compute);
        let names: Vec<_> = node.uses.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["hdr", "bloom"]);
    }
}
