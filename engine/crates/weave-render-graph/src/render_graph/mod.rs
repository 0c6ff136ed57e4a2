//! RenderGraph - 声明式渲染图
//!
//! pass 通过名字声明对资源的访问，编译器根据声明推导执行顺序、barrier、
//! 附件参数和 queue 之间的同步，执行器把结果录制到各个 queue 上。
//!
//! # 核心概念
//!
//! - **RenderGraph**: 一个片段，包含 pass、名字绑定和输入 future
//! - **RgFuture**: 某个片段中某个名字的最终版本，可以作为另一个片段的输入
//! - **RgCompiledGraph**: 编译结果，包含执行顺序、use chain、barrier 和 render scope
//! - **RgPassContext**: pass 录制命令的入口，只能访问 pass 声明过的名字
//!
//! # 使用示例
//!
//! ```ignore
//! use weave_render_graph::render_graph::*;
//!
//! let mut graph = RenderGraph::new("frame");
//! graph
//!     .attach_swapchain("swapchain", swapchain_image)
//!     .attach_and_clear_image(
//!         "depth",
//!         RgImageAttachment::new().format(vk::Format::D32_SFLOAT),
//!         GfxClearValue::DEPTH_ONE,
//!     )
//!     .add_pass(
//!         RgPassDesc::new("forward")
//!             .image("swapchain", GfxAccess::COLOR_WRITE)
//!             .image("depth", GfxAccess::DEPTH_STENCIL_RW)
//!             .execute(|ctx| {
//!                 ctx.set_viewport_full(0).set_scissor_full(0).bind_graphics_pipeline("forward").draw(3, 1, 0, 0);
//!             }),
//!     );
//!
//! let compiled = graph.compile(RgCompileOptions::default())?;
//! compiled.execute(&render_context)?;
//! ```
//!
//! # 编译阶段
//!
//! - `merge`: 合并 `attach_in` 引用的片段
//! - `resolve`: 名字解析、`+` 版本、pending clear
//! - `dependency`: 依赖图和稳定的拓扑排序
//! - `use_chain`: 每个资源按执行顺序的访问列表
//! - `inference`: 附件参数推导和 usage 计算
//! - `aliasing`: transient 资源的内存复用
//! - `barrier`: barrier 和 queue ownership transfer
//! - `batching`: dynamic rendering scope 合并
//! - `compiler` / `executor`: submit batch 划分和执行

mod aliasing;
mod attachment;
mod barrier;
mod batching;
mod compiler;
mod dependency;
mod error;
mod executor;
mod future;
mod graph;
mod inference;
mod merge;
mod pass;
mod pass_context;
mod resolve;
mod resource;
mod use_chain;

#[cfg(test)]
mod tests;

// Re-exports
pub use attachment::{RgBufferAttachment, RgBufferInferenceFn, RgImageAttachment, RgImageInferenceFn, RgInferenceRule};
pub use barrier::{RgBufferBarrierDesc, RgImageBarrierDesc, RgPassBarriers, RgQueueTransfer, RgTransferRole};
pub use batching::{RgRenderScope, RgScopeAttachment};
pub use compiler::{RgBatchKind, RgCompileOptions, RgCompiledGraph, RgSubmitBatch};
pub use dependency::{RgDependencyEdge, RgDependencyGraph, RgHazard};
pub use error::{RgCompileError, RgError};
pub use executor::RgExecution;
pub use future::{RgFuture, RgSharedFragment, wait_for_futures};
pub use graph::{FragmentId, RenderGraph};
pub use inference::{RgInferenceContext, RgResourceDesc};
pub use merge::RgScopedName;
pub use pass::{RgPass, RgPassBuilder, RgPassDesc, RgPassExecutor, RgPassNode};
pub use pass_context::{RgPassContext, RgPipelineRef};
pub use resource::{
    RgAttachment, RgBinding, RgFutureValue, RgPhysicalResource, RgRelease, RgResourceKind, RgResourceUse,
};
pub use use_chain::{RgUse, compute_buffer_usage, compute_usage};
