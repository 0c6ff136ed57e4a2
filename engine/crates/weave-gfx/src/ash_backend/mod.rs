//! 基于 ash + vk-mem 的 `GfxDevice` 实现
//!
//! instance / device / queue 的创建不在这里完成，由调用者传入已经创建好的对象。
//! 设备需要开启 synchronization2、timeline semaphore、dynamic rendering 和 buffer device address。

mod device;
mod encoder;

pub use device::{AshDevice, AshQueueInfo};
pub use encoder::AshCommandEncoder;

/// 设备的函数表，encoder 与 device 共享
pub(crate) struct AshDeviceFns {
    pub(crate) device: ash::Device,
    pub(crate) dynamic_rendering: ash::khr::dynamic_rendering::Device,
    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,
    pub(crate) ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
}
