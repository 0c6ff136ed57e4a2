use weave_crate_tools::name::Name;
use weave_gfx::error::GfxError;
use weave_render_interface::error::CacheConstructionError;

/// 编译失败
///
/// 编译是全有或全无的：任何一个错误都不会产生部分结果。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RgCompileError {
    #[error("unresolved name \"{name}\": {reason}")]
    UnresolvedName { name: Name, reason: String },

    #[error("dependency cycle between passes {passes:?}")]
    CycleDetected { passes: Vec<Name> },

    #[error("cannot infer {missing:?} of \"{name}\"")]
    UnresolvedShape { name: Name, missing: Vec<&'static str> },

    #[error("conflicting usage of \"{name}\": {reason}")]
    ConflictingUsage { name: Name, reason: String },

    #[error("\"{name}\" is bound more than once")]
    ConflictingBinding { name: Name },

    /// shared fragment 已经合并进另一张尚未执行的图
    #[error("future \"{name}\" is merged into a graph that has not been executed yet")]
    FutureNotReady { name: Name },
}

impl RgCompileError {
    pub(crate) fn unresolved(name: Name, reason: impl Into<String>) -> Self {
        Self::UnresolvedName {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn conflicting(name: Name, reason: impl Into<String>) -> Self {
        Self::ConflictingUsage {
            name,
            reason: reason.into(),
        }
    }
}

/// 编译或执行 RenderGraph 时的错误
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RgError {
    #[error(transparent)]
    Compile(#[from] RgCompileError),

    #[error(transparent)]
    CacheConstruction(#[from] CacheConstructionError),

    /// 设备丢失，当前帧无法继续
    #[error("device lost")]
    DeviceLost,

    #[error(transparent)]
    Gfx(GfxError),
}

impl From<GfxError> for RgError {
    fn from(value: GfxError) -> Self {
        match value {
            GfxError::DeviceLost => RgError::DeviceLost,
            other => RgError::Gfx(other),
        }
    }
}

impl RgError {
    #[inline]
    pub fn is_fatal(&self) -> bool {
        match self {
            RgError::DeviceLost => true,
            RgError::CacheConstruction(e) => e.source.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_render_interface::cache_policy::GfxCacheKind;

    #[test]
    fn device_lost_is_lifted() {
        assert_eq!(RgError::from(GfxError::DeviceLost), RgError::DeviceLost);
        assert!(RgError::DeviceLost.is_fatal());
        assert_eq!(RgError::from(GfxError::OutOfDeviceMemory), RgError::Gfx(GfxError::OutOfDeviceMemory));

        let err: RgError = CacheConstructionError::new(GfxCacheKind::Sampler, GfxError::DeviceLost).into();
        assert!(err.is_fatal());
    }

    #[test]
    fn messages_name_the_resource() {
        let err = RgCompileError::UnresolvedShape {
            name: Name::new("bloom"),
            missing: vec!["extent"],
        };
        assert_eq!(err.to_string(), "cannot infer [\"extent\"] of \"bloom\"");
    }
}
