use std::sync::Arc;

use ash::vk;

/// Shader module 的创建参数
///
/// 以 SPIR-V 内容作为 key，同样内容的 shader 只会创建一次。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxShaderModuleCreateInfo {
    pub code: Arc<[u32]>,
    /// 仅用于调试
    pub name: String,
}
impl GfxShaderModuleCreateInfo {
    pub fn new(code: impl Into<Arc<[u32]>>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }

    /// 从 spv 字节读取，字节数必须是 4 的倍数
    pub fn from_spv_bytes(bytes: &[u8], name: impl Into<String>) -> std::io::Result<Self> {
        let code = ash::util::read_spv(&mut std::io::Cursor::new(bytes))?;
        Ok(Self::new(code, name))
    }
}

/// 管线中的一个 shader stage
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfxShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: GfxShaderModuleCreateInfo,
    pub entry_point: String,
}
impl GfxShaderStage {
    pub fn new(stage: vk::ShaderStageFlags, module: GfxShaderModuleCreateInfo) -> Self {
        Self {
            stage,
            module,
            entry_point: "main".to_string(),
        }
    }

    #[inline]
    pub fn entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}
