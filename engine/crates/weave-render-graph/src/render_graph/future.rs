//! Future：某个片段中某个名字的最终版本
//!
//! future 有两种来源：
//!
//! - 独占的片段（`RgFuture::new`），只会被合并进一张图
//! - 共享的片段（`RgFuture::shared`），可以被多张图引用。第一次编译时合并进来，
//!   执行之后记录输出，之后的图直接以执行结果作为输入。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use weave_crate_tools::name::Name;
use weave_gfx::commands::submit_info::latest_per_domain;
use weave_render_interface::context::RenderContext;

use super::compiler::RgCompileOptions;
use super::error::{RgCompileError, RgError};
use super::graph::{FragmentId, RenderGraph};
use super::resource::RgFutureValue;

/// 一次编译的标识，用于标记 shared fragment 被哪张图合并
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CompilationId(u64);
impl CompilationId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) enum RgFragmentRef {
    Owned(Box<RenderGraph>),
    Shared(Arc<RgSharedFragment>),
}

/// 片段 + 输出名字
pub struct RgFuture {
    pub(crate) fragment: RgFragmentRef,
    pub(crate) output: Name,
}
// new & init
impl RgFuture {
    /// 独占片段的输出
    pub fn new(graph: RenderGraph, output: impl Into<Name>) -> Self {
        Self {
            fragment: RgFragmentRef::Owned(Box::new(graph)),
            output: output.into().base(),
        }
    }

    /// 共享片段的输出，同一个片段可以产生多个 future
    pub fn shared(fragment: &Arc<RgSharedFragment>, output: impl Into<Name>) -> Self {
        Self {
            fragment: RgFragmentRef::Shared(fragment.clone()),
            output: output.into().base(),
        }
    }

    pub(crate) fn duplicate(&self) -> Self {
        let fragment = match &self.fragment {
            RgFragmentRef::Owned(graph) => RgFragmentRef::Owned(Box::new(graph.duplicate())),
            RgFragmentRef::Shared(shared) => RgFragmentRef::Shared(shared.clone()),
        };
        Self {
            fragment,
            output: self.output,
        }
    }
}
// getters
impl RgFuture {
    #[inline]
    pub fn output(&self) -> Name {
        self.output
    }

    pub fn fragment_id(&self) -> FragmentId {
        match &self.fragment {
            RgFragmentRef::Owned(graph) => graph.id(),
            RgFragmentRef::Shared(shared) => shared.id(),
        }
    }
}
impl fmt::Debug for RgFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.fragment {
            RgFragmentRef::Owned(_) => "owned",
            RgFragmentRef::Shared(_) => "shared",
        };
        f.debug_struct("RgFuture")
            .field("fragment", &self.fragment_id())
            .field("kind", &kind)
            .field("output", &self.output)
            .finish()
    }
}

pub(crate) enum RgSharedState {
    Pending {
        graph: RenderGraph,
        /// 已经合并进某次编译、但还没有执行
        merged_into: Option<CompilationId>,
    },
    Submitted {
        outputs: HashMap<Name, RgFutureValue>,
    },
}

/// `checkout` 的结果
pub(crate) enum RgCheckout {
    /// 需要把片段合并进当前编译
    Merge(RenderGraph),
    /// 已经执行过，直接使用输出
    Submitted(HashMap<Name, RgFutureValue>),
    /// 被另一张还没执行的图合并了
    Busy,
}

/// 可以被多张图引用的片段
pub struct RgSharedFragment {
    id: FragmentId,
    name: Name,
    state: Mutex<RgSharedState>,
}
// new & init
impl RgSharedFragment {
    pub fn new(graph: RenderGraph) -> Arc<Self> {
        Arc::new(Self {
            id: graph.id(),
            name: graph.name(),
            state: Mutex::new(RgSharedState::Pending {
                graph,
                merged_into: None,
            }),
        })
    }
}
// getters
impl RgSharedFragment {
    #[inline]
    pub fn id(&self) -> FragmentId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Name {
        self.name
    }

    pub fn is_submitted(&self) -> bool {
        matches!(*self.state.lock(), RgSharedState::Submitted { .. })
    }

    /// 执行之后的输出
    pub fn output(&self, name: impl Into<Name>) -> Option<RgFutureValue> {
        match &*self.state.lock() {
            RgSharedState::Submitted { outputs } => outputs.get(&name.into().base()).copied(),
            RgSharedState::Pending { .. } => None,
        }
    }
}
// tools
impl RgSharedFragment {
    pub(crate) fn checkout(&self, compilation: CompilationId) -> RgCheckout {
        let mut state = self.state.lock();
        match &mut *state {
            RgSharedState::Pending { graph, merged_into } => match merged_into {
                Some(other) if *other != compilation => RgCheckout::Busy,
                _ => {
                    *merged_into = Some(compilation);
                    RgCheckout::Merge(graph.duplicate())
                }
            },
            RgSharedState::Submitted { outputs } => RgCheckout::Submitted(outputs.clone()),
        }
    }

    /// 编译失败或者编译结果没有执行就被丢弃
    pub(crate) fn release_merge(&self, compilation: CompilationId) {
        if let RgSharedState::Pending { merged_into, .. } = &mut *self.state.lock() {
            if *merged_into == Some(compilation) {
                *merged_into = None;
            }
        }
    }

    pub(crate) fn mark_submitted(&self, outputs: HashMap<Name, RgFutureValue>) {
        let mut state = self.state.lock();
        if let RgSharedState::Submitted { outputs: existing } = &mut *state {
            existing.extend(outputs);
            return;
        }
        log::debug!("shared fragment {} submitted with {} outputs", self.name, outputs.len());
        *state = RgSharedState::Submitted { outputs };
    }
}
impl fmt::Debug for RgSharedFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgSharedFragment")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("submitted", &self.is_submitted())
            .finish()
    }
}

/// 编译、执行并等待一组 future，返回它们的执行结果
///
/// 所有 future 的片段合并成一张图提交，之后阻塞等待对应的提交完成。
pub fn wait_for_futures(ctx: &RenderContext, futures: Vec<RgFuture>) -> Result<Vec<RgFutureValue>, RgError> {
    let _span = weave_crate_tools::profile_span!("wait_for_futures");

    let names: Vec<Name> = (0..futures.len()).map(|i| Name::from(format!("future_{}", i))).collect();
    let mut graph = RenderGraph::new("wait_for_futures");
    for (name, future) in names.iter().zip(futures) {
        graph.attach_in(*name, future);
    }

    let options = RgCompileOptions::default().exports(names.iter().copied());
    let compiled = graph.compile(options)?;
    let execution = compiled.execute(ctx)?;

    ctx.device().wait(&latest_per_domain(&execution.tickets))?;

    names
        .iter()
        .map(|name| {
            execution.output(*name).ok_or_else(|| {
                RgError::from(RgCompileError::unresolved(*name, "future output was not produced by the graph"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_fragment_is_merged_by_one_compilation_at_a_time() {
        let fragment = RgSharedFragment::new(RenderGraph::new("upload"));
        let first = CompilationId::next();
        let second = CompilationId::next();

        assert!(matches!(fragment.checkout(first), RgCheckout::Merge(_)));
        // 同一次编译重复引用仍然可以合并
        assert!(matches!(fragment.checkout(first), RgCheckout::Merge(_)));
        assert!(matches!(fragment.checkout(second), RgCheckout::Busy));

        fragment.release_merge(first);
        assert!(matches!(fragment.checkout(second), RgCheckout::Merge(_)));
        assert!(!fragment.is_submitted());
    }

    #[test]
    fn future_output_drops_suffix() {
        let future = RgFuture::new(RenderGraph::new("a"), "color+");
        assert_eq!(future.output(), Name::new("color"));
        let copy = future.duplicate();
        assert_eq!(copy.fragment_id(), future.fragment_id());
    }
}
