/// 打开一个 tracy span
///
/// 只有在 tracy client 已经启动时才会真正创建 span，否则返回 `None`，
/// 因此可以在单元测试和 headless 环境下安全使用。
///
/// ```ignore
/// let _span = weave_crate_tools::profile_span!("RenderGraph::compile");
/// ```
#[macro_export]
macro_rules! profile_span {
    ($name:expr) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span($crate::tracy_client::span_location!($name), 0))
    };
}
