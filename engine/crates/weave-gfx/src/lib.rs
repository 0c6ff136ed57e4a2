//! Weave GFX 层
//!
//! 对 Vulkan 的资源描述、访问类型和同步原语进行封装，并定义后端接口：
//!
//! - [`access::GfxAccess`]: Pass 对资源的访问类型（bitflags）
//! - [`state`]: 访问类型对应的 stage / access / layout
//! - [`commands::barrier`]: image / buffer barrier 描述
//! - [`device::GfxDevice`] / [`commands::encoder::GfxCommandEncoder`]: 设备和命令录制接口
//! - [`ash_backend`]: 基于 ash + vk-mem 的实现
//!
//! 所有 create info 类型都实现了 `Hash + Eq`，可以直接作为缓存的 key。

pub mod access;
pub mod ash_backend;
pub mod commands;
pub mod device;
pub mod error;
pub mod pipelines;
pub mod queue;
pub mod resources;
pub mod sampler;
pub mod state;
