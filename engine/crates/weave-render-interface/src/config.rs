use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::cache_policy::GfxCachePolicyTable;
use crate::frame_counter::FrameCounter;

/// `RenderContext` 的配置
///
/// 可以从 TOML 文件读取，缺省的字段使用默认值：
///
/// ```toml
/// frames_in_flight = 2
/// dump_plan = true
///
/// [cache_policies.transient_images]
/// mode = "periodic"
/// period = 1
/// phase = 0
/// max_age = 8
///
/// [cache_policies.shader_modules]
/// mode = "exempt"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderContextConfig {
    pub frames_in_flight: u64,
    pub cache_policies: GfxCachePolicyTable,
    /// 编译时是否打印执行计划
    pub dump_plan: bool,
}
impl Default for RenderContextConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: FrameCounter::DEFAULT_FIF_COUNT,
            cache_policies: GfxCachePolicyTable::default(),
            dump_plan: false,
        }
    }
}
impl RenderContextConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("读取配置文件失败: {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("解析 TOML 配置失败: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(config.frames_in_flight > 0, "frames_in_flight 必须大于 0");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_policy::GfxCachePolicy;

    #[test]
    fn missing_fields_use_defaults() {
        let config = RenderContextConfig::from_toml_str("dump_plan = true").unwrap();
        assert!(config.dump_plan);
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.cache_policies, GfxCachePolicyTable::default());
    }

    #[test]
    fn policies_can_be_overridden() {
        let config = RenderContextConfig::from_toml_str(
            r#"
            frames_in_flight = 2

            [cache_policies.transient_images]
            mode = "periodic"
            period = 2
            phase = 1
            max_age = 8

            [cache_policies.shader_modules]
            mode = "exempt"
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.cache_policies.transient_images, GfxCachePolicy::periodic(2, 1, 8));
        assert_eq!(config.cache_policies.shader_modules, GfxCachePolicy::Exempt);
        assert_eq!(config.cache_policies.samplers, GfxCachePolicy::Exempt);
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        assert!(RenderContextConfig::from_toml_str("frames_in_flight = 0").is_err());
        assert!(RenderContextConfig::load("/nonexistent/weave.toml").is_err());
    }
}
