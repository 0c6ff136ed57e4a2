use ash::vk;

/// buffer 所在内存的用途
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GfxMemoryUsage {
    /// 只由 GPU 访问
    #[default]
    GpuOnly,
    /// CPU 写入，GPU 读取（staging, uniform）
    CpuToGpu,
    /// GPU 写入，CPU 回读
    GpuToCpu,
}
impl GfxMemoryUsage {
    #[inline]
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, Self::GpuOnly)
    }

    pub fn allocation_info(&self) -> vk_mem::AllocationCreateInfo {
        let flags = match self {
            Self::GpuOnly => vk_mem::AllocationCreateFlags::empty(),
            Self::CpuToGpu => {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE | vk_mem::AllocationCreateFlags::MAPPED
            }
            Self::GpuToCpu => vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM | vk_mem::AllocationCreateFlags::MAPPED,
        };
        vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags,
            ..Default::default()
        }
    }
}

/// buffer 的创建参数，可作为 cache key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBufferCreateInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: GfxMemoryUsage,
    /// 起始地址的对齐，默认 8 字节
    pub alignment: vk::DeviceSize,
}
// new & init
impl GfxBufferCreateInfo {
    #[inline]
    pub fn new(size: vk::DeviceSize, usage: vk::BufferUsageFlags, memory: GfxMemoryUsage) -> Self {
        Self {
            size,
            usage,
            memory,
            alignment: 8,
        }
    }

    #[inline]
    pub fn new_stage_buffer(size: vk::DeviceSize) -> Self {
        Self::new(size, vk::BufferUsageFlags::TRANSFER_SRC, GfxMemoryUsage::CpuToGpu)
    }
}
// tools
impl GfxBufferCreateInfo {
    #[inline]
    pub fn as_info(&self) -> vk::BufferCreateInfo<'static> {
        vk::BufferCreateInfo::default().size(self.size).usage(self.usage)
    }

    #[inline]
    pub fn has_device_address(&self) -> bool {
        self.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
    }
}

/// 已经创建好的 buffer，内存由 `GfxDevice` 管理
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBuffer {
    handle: vk::Buffer,
    info: GfxBufferCreateInfo,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    device_addr: Option<vk::DeviceAddress>,
}
// new & init
impl GfxBuffer {
    #[inline]
    pub fn new(handle: vk::Buffer, info: GfxBufferCreateInfo, device_addr: Option<vk::DeviceAddress>) -> Self {
        Self {
            handle,
            info,
            device_addr,
        }
    }
}
// getters
impl GfxBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.info.size
    }

    #[inline]
    pub fn info(&self) -> &GfxBufferCreateInfo {
        &self.info
    }

    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_addr
    }
}
