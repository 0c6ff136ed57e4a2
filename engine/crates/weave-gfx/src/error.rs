use ash::vk;

/// GFX 层的错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    #[error("vk error: {0}")]
    Vk(vk::Result),

    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("device lost")]
    DeviceLost,

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// headless 设备注入的失败
    #[error("injected failure: {0}")]
    Injected(&'static str),
}

impl From<vk::Result> for GfxError {
    fn from(value: vk::Result) -> Self {
        match value {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => GfxError::OutOfDeviceMemory,
            other => GfxError::Vk(other),
        }
    }
}

impl GfxError {
    /// 是否不可恢复
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, GfxError::DeviceLost)
    }
}

pub type GfxResult<T> = Result<T, GfxError>;
