use weave_gfx::error::GfxError;

use crate::cache_policy::GfxCacheKind;

/// 缓存对象构造失败
///
/// 失败不会留下缓存项，下一次请求同样的 key 会重新构造。
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to construct {cache:?} entry: {source}")]
pub struct CacheConstructionError {
    pub cache: GfxCacheKind,
    #[source]
    pub source: GfxError,
}

impl CacheConstructionError {
    #[inline]
    pub fn new(cache: GfxCacheKind, source: GfxError) -> Self {
        Self { cache, source }
    }
}
