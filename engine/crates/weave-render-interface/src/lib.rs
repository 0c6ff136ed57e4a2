//! GPU 的边界
//!
//! - [`cache::GfxCache`]: 以 create info 为 key 的对象缓存，按帧回收
//! - [`cache_policy`]: 每种缓存的回收策略
//! - [`context::RenderContext`]: 显式传递的设备上下文，持有所有缓存和延迟销毁队列
//! - [`headless::HeadlessDevice`]: 不依赖 GPU 的 `GfxDevice` 实现，用于测试

pub mod cache;
pub mod cache_policy;
pub mod config;
pub mod context;
pub mod error;
pub mod frame_counter;
pub mod handles;
pub mod headless;
