//! Weave RenderGraph
//!
//! 以名字声明资源的渲染图。编译阶段完成：
//!
//! - 多个图片段（fragment）的合并与名字解析
//! - 依赖分析和确定性的拓扑排序
//! - image layout / barrier / queue ownership transfer 的推导
//! - transient 资源的形状推导与内存复用
//! - dynamic rendering scope 的合批
//!
//! 执行阶段通过 [`weave_render_interface::context::RenderContext`] 获取缓存的 GPU 对象，
//! 并按 queue domain 分批提交。

pub mod render_graph;
