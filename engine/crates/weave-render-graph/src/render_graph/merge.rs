//! 片段合并
//!
//! 从根片段出发，按深度优先的后序把 `attach_in` 引用的片段合并成一张图：
//! 生产者的 pass 总是排在消费者之前。每个片段只合并一次，
//! 名字都带上所属片段，不同片段中的同名资源互不干扰。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use weave_crate_tools::name::Name;

use super::attachment::RgInferenceRule;
use super::error::RgCompileError;
use super::future::{CompilationId, RgCheckout, RgFragmentRef, RgSharedFragment};
use super::graph::{FragmentId, RenderGraph};
use super::pass::RgPassNode;
use super::resource::{RgAttachment, RgBinding, RgRelease};

/// 带片段作用域的名字
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgScopedName {
    pub fragment: FragmentId,
    pub name: Name,
}
impl RgScopedName {
    #[inline]
    pub fn new(fragment: FragmentId, name: Name) -> Self {
        Self {
            fragment,
            name: name.base(),
        }
    }
}

pub(crate) struct RgMergedPass {
    pub node: RgPassNode,
    pub fragment: FragmentId,
}

/// 合并之后的图，所有名字都已经带上片段作用域
pub(crate) struct RgMergedGraph {
    pub root: FragmentId,
    pub compilation: CompilationId,
    pub fragment_names: HashMap<FragmentId, Name>,
    pub passes: Vec<RgMergedPass>,
    pub bindings: Vec<(RgScopedName, RgBinding)>,
    /// (name_out, name_in)
    pub aliases: Vec<(RgScopedName, RgScopedName)>,
    pub rules: Vec<(RgScopedName, RgInferenceRule)>,
    pub releases: Vec<(RgScopedName, RgRelease)>,
    /// 本次编译合并进来的共享片段，执行后需要记录输出
    pub shared: Vec<Arc<RgSharedFragment>>,
}
impl RgMergedGraph {
    /// 编译失败时撤销对共享片段的占用
    pub(crate) fn release_shared(&self) {
        for fragment in &self.shared {
            fragment.release_merge(self.compilation);
        }
    }

    pub(crate) fn is_shared(&self, fragment: FragmentId) -> bool {
        self.shared.iter().any(|shared| shared.id() == fragment)
    }
}

struct RgMerger {
    merged: RgMergedGraph,
    seen: HashSet<FragmentId>,
}
impl RgMerger {
    fn merge_fragment(&mut self, graph: RenderGraph) -> Result<(), RgCompileError> {
        let id = graph.id;
        self.seen.insert(id);
        self.merged.fragment_names.insert(id, graph.name);

        // 先合并输入，生产者的 pass 排在前面
        for (name, future) in graph.inputs {
            let consumer = RgScopedName::new(id, name);
            match future.fragment {
                RgFragmentRef::Owned(producer) => {
                    let producer_id = producer.id;
                    if !self.seen.contains(&producer_id) {
                        self.merge_fragment(*producer)?;
                    }
                    self.merged.aliases.push((consumer, RgScopedName::new(producer_id, future.output)));
                }
                RgFragmentRef::Shared(shared) => {
                    let producer_id = shared.id();
                    if self.seen.contains(&producer_id) {
                        self.merged.aliases.push((consumer, RgScopedName::new(producer_id, future.output)));
                        continue;
                    }
                    match shared.checkout(self.merged.compilation) {
                        RgCheckout::Merge(producer) => {
                            self.merged.shared.push(shared.clone());
                            self.merge_fragment(producer)?;
                            self.merged.aliases.push((consumer, RgScopedName::new(producer_id, future.output)));
                        }
                        RgCheckout::Submitted(outputs) => {
                            let value = outputs.get(&future.output).copied().ok_or_else(|| {
                                RgCompileError::unresolved(
                                    future.output,
                                    format!("fragment \"{}\" has no such output", shared.name()),
                                )
                            })?;
                            self.merged.bindings.push((consumer, RgBinding::new(RgAttachment::Materialized(value))));
                        }
                        RgCheckout::Busy => {
                            return Err(RgCompileError::FutureNotReady { name: future.output });
                        }
                    }
                }
            }
        }

        let scoped = |name: Name| RgScopedName::new(id, name);
        self.merged.passes.extend(graph.passes.into_iter().map(|node| RgMergedPass { node, fragment: id }));
        self.merged.bindings.extend(graph.bindings.into_iter().map(|(name, binding)| (scoped(name), binding)));
        self.merged.aliases.extend(graph.aliases.into_iter().map(|(out, input)| (scoped(out), scoped(input))));
        self.merged.rules.extend(graph.rules.into_iter().map(|(name, rule)| (scoped(name), rule)));
        self.merged.releases.extend(graph.releases.into_iter().map(|(name, release)| (scoped(name), release)));
        Ok(())
    }
}

/// 合并 `root` 及其引用的所有片段
pub(crate) fn merge(root: RenderGraph, compilation: CompilationId) -> Result<RgMergedGraph, RgCompileError> {
    let _span = weave_crate_tools::profile_span!("RenderGraph::merge");

    let mut merger = RgMerger {
        merged: RgMergedGraph {
            root: root.id,
            compilation,
            fragment_names: HashMap::new(),
            passes: Vec::new(),
            bindings: Vec::new(),
            aliases: Vec::new(),
            rules: Vec::new(),
            releases: Vec::new(),
            shared: Vec::new(),
        },
        seen: HashSet::new(),
    };

    match merger.merge_fragment(root) {
        Ok(()) => {
            log::trace!(
                "merged {} fragments, {} passes",
                merger.merged.fragment_names.len(),
                merger.merged.passes.len()
            );
            Ok(merger.merged)
        }
        Err(e) => {
            merger.merged.release_shared();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use weave_gfx::access::GfxAccess;

    use super::*;
    use crate::render_graph::attachment::RgImageAttachment;
    use crate::render_graph::future::RgFuture;
    use crate::render_graph::pass::RgPassDesc;

    fn producer(name: &str) -> RenderGraph {
        let mut graph = RenderGraph::new(name);
        graph
            .attach_image("out", RgImageAttachment::new())
            .add_pass(RgPassDesc::new(Name::from(format!("{}_write", name))).image("out", GfxAccess::COLOR_WRITE));
        graph
    }

    #[test]
    fn producers_come_first() {
        let a = producer("a");
        let a_id = a.id();
        let mut root = RenderGraph::new("root");
        root.attach_in("input", RgFuture::new(a, "out"))
            .add_pass(RgPassDesc::new("consume").image("input", GfxAccess::SAMPLED_FRAGMENT));
        let root_id = root.id();

        let merged = merge(root, CompilationId::next()).unwrap();
        let names: Vec<_> = merged.passes.iter().map(|p| p.node.name.as_str()).collect();
        assert_eq!(names, vec!["a_write", "consume"]);
        assert_eq!(
            merged.aliases,
            vec![(RgScopedName::new(root_id, Name::new("input")), RgScopedName::new(a_id, Name::new("out")))]
        );
        assert_eq!(merged.root, root_id);
    }

    #[test]
    fn shared_fragment_is_merged_once() {
        let shared = RgSharedFragment::new(producer("upload"));
        let mut root = RenderGraph::new("root");
        root.attach_in("x", RgFuture::shared(&shared, "out"))
            .attach_in("y", RgFuture::shared(&shared, "out"));

        let compilation = CompilationId::next();
        let merged = merge(root, compilation).unwrap();
        assert_eq!(merged.passes.len(), 1);
        assert_eq!(merged.aliases.len(), 2);
        assert!(merged.is_shared(shared.id()));

        // 另一张图在第一张执行之前引用它
        let mut other = RenderGraph::new("other");
        other.attach_in("z", RgFuture::shared(&shared, "out"));
        let err = merge(other, CompilationId::next()).err().unwrap();
        assert_eq!(err, RgCompileError::FutureNotReady { name: Name::new("out") });

        merged.release_shared();
        let mut again = RenderGraph::new("again");
        again.attach_in("z", RgFuture::shared(&shared, "out"));
        assert!(merge(again, CompilationId::next()).is_ok());
    }
}
