//! 名字解析
//!
//! 把合并后的图变成以资源下标表示的形式：
//!
//! - 沿着别名找到每个名字背后的资源，检查绑定冲突和类型冲突
//! - 同一个 pass 对同一资源的多次声明合并为一次
//! - 处理 `attach_and_clear_image` 的 pending clear
//! - 确定每次只读访问读到的是哪一次写入
//!
//! 读取的绑定规则：不带后缀的只读声明读到按声明顺序在它之前的最后一次写入，
//! 没有写入时读到资源的初始内容；带 `+` 后缀的只读声明读到整张图中最后一次写入。

use std::collections::HashMap;
use std::sync::Arc;

use weave_crate_tools::name::Name;
use weave_gfx::access::GfxAccess;
use weave_gfx::queue::QueueDomain;
use weave_gfx::resources::image::GfxClearValue;

use super::attachment::RgInferenceRule;
use super::error::RgCompileError;
use super::graph::{FragmentId, clear_pass_node};
use super::merge::{RgMergedGraph, RgScopedName};
use super::pass::RgPassExecutor;
use super::resource::{RgBinding, RgRelease, RgResourceKind};

/// 只读访问读到的内容
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RgReadSource {
    /// 资源进入图时的内容
    Initial,
    /// 某个 pass（声明顺序下标）写入的内容
    Write(usize),
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RgResolvedUse {
    pub resource: usize,
    /// pass 中声明时使用的名字（去掉后缀）
    pub declared: Name,
    pub access: GfxAccess,
    /// 以 load op 的形式清除
    pub clear: Option<GfxClearValue>,
    /// 只读访问才有
    pub source: Option<RgReadSource>,
}

#[derive(Clone)]
pub(crate) struct RgResolvedPass {
    pub name: Name,
    pub fragment: FragmentId,
    pub domain: QueueDomain,
    pub uses: Vec<RgResolvedUse>,
    pub executor: Arc<dyn RgPassExecutor>,
}
impl RgResolvedPass {
    #[inline]
    pub fn find_use(&self, resource: usize) -> Option<&RgResolvedUse> {
        self.uses.iter().find(|u| u.resource == resource)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RgResolvedResource {
    /// 根片段中的资源直接使用名字，其他片段的资源以 `片段/名字` 显示
    pub name: Name,
    pub scoped: RgScopedName,
    pub binding: RgBinding,
    /// 执行之后仍然需要存活，交给调用者
    pub exported: bool,
    pub release: Option<RgRelease>,
}
impl RgResolvedResource {
    #[inline]
    pub fn kind(&self) -> RgResourceKind {
        self.binding.attachment.kind()
    }
}

/// 名字到资源的映射
#[derive(Debug, Default)]
pub(crate) struct RgNameTable {
    /// name_out -> name_in
    alias_of: HashMap<RgScopedName, RgScopedName>,
    /// 规范名字 -> 资源下标
    canonical: HashMap<RgScopedName, usize>,
}
impl RgNameTable {
    fn canonical_name(&self, name: RgScopedName) -> Result<RgScopedName, RgCompileError> {
        let mut current = name;
        let mut steps = 0;
        while let Some(next) = self.alias_of.get(&current) {
            current = *next;
            steps += 1;
            if steps > self.alias_of.len() {
                return Err(RgCompileError::unresolved(name.name, "alias cycle"));
            }
        }
        Ok(current)
    }

    pub fn resolve(&self, name: RgScopedName) -> Result<usize, RgCompileError> {
        let canonical = self.canonical_name(name)?;
        self.canonical
            .get(&canonical)
            .copied()
            .ok_or_else(|| RgCompileError::unresolved(name.name, "no binding for this name"))
    }

    /// 某个片段中所有能解析到资源的名字
    pub fn names_in(&self, fragment: FragmentId) -> Vec<(Name, usize)> {
        let bound = self
            .canonical
            .iter()
            .filter(|(name, _)| name.fragment == fragment)
            .map(|(name, r)| (name.name, *r));
        let aliased = self
            .alias_of
            .keys()
            .filter(|name| name.fragment == fragment)
            .filter_map(|name| self.resolve(*name).ok().map(|r| (name.name, r)));
        let mut names: Vec<_> = bound.chain(aliased).collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }
}

pub(crate) struct RgResolvedGraph {
    pub root: FragmentId,
    /// 声明顺序（合并顺序），pending clear 插入的 pass 排在第一个使用者之前
    pub passes: Vec<RgResolvedPass>,
    pub resources: Vec<RgResolvedResource>,
    pub names: RgNameTable,
    /// (目标资源, 规则所在片段, 规则)
    pub rules: Vec<(usize, FragmentId, RgInferenceRule)>,
    /// 每个资源的写入者，按声明顺序
    pub writers: Vec<Vec<usize>>,
}

fn display_name(merged: &RgMergedGraph, name: RgScopedName) -> Name {
    if name.fragment == merged.root {
        return name.name;
    }
    match merged.fragment_names.get(&name.fragment) {
        Some(fragment) => Name::from(format!("{}/{}", fragment, name.name)),
        None => name.name,
    }
}

fn build_name_table(
    merged: &RgMergedGraph,
) -> Result<(RgNameTable, Vec<RgResolvedResource>), RgCompileError> {
    let mut table = RgNameTable::default();
    for (out, input) in &merged.aliases {
        if table.alias_of.insert(*out, *input).is_some() {
            return Err(RgCompileError::ConflictingBinding { name: out.name });
        }
    }

    let mut resources = Vec::with_capacity(merged.bindings.len());
    for (name, binding) in &merged.bindings {
        if table.alias_of.contains_key(name) || table.canonical.contains_key(name) {
            return Err(RgCompileError::ConflictingBinding { name: name.name });
        }
        table.canonical.insert(*name, resources.len());
        resources.push(RgResolvedResource {
            name: display_name(merged, *name),
            scoped: *name,
            binding: binding.clone(),
            exported: merged.is_shared(name.fragment),
            release: None,
        });
    }
    Ok((table, resources))
}

fn check_access(name: Name, kind: RgResourceKind, access: GfxAccess) -> Result<(), RgCompileError> {
    if access.is_empty() {
        return Err(RgCompileError::conflicting(name, "empty access"));
    }
    let valid = match kind {
        RgResourceKind::Image => access.is_valid_for_image(),
        RgResourceKind::Buffer => access.is_valid_for_buffer(),
    };
    if !valid {
        return Err(RgCompileError::conflicting(name, format!("{:?} is not valid for a {:?}", access, kind)));
    }
    Ok(())
}

/// 解析之后、绑定读取来源之前的 pass
struct RgPendingPass {
    pass: RgResolvedPass,
    /// 与 `pass.uses` 一一对应：只读声明是否带 `+` 后缀
    suffixed: Vec<bool>,
}

pub(crate) fn resolve(merged: &RgMergedGraph, exports: &[Name]) -> Result<RgResolvedGraph, RgCompileError> {
    let _span = weave_crate_tools::profile_span!("RenderGraph::resolve");

    let (names, mut resources) = build_name_table(merged)?;

    // 每个 pass 的声明
    let mut pending = Vec::with_capacity(merged.passes.len());
    for merged_pass in &merged.passes {
        let node = &merged_pass.node;
        let mut uses: Vec<RgResolvedUse> = Vec::with_capacity(node.uses.len());
        let mut suffixed: Vec<bool> = Vec::with_capacity(node.uses.len());

        for decl in &node.uses {
            let resource = names.resolve(RgScopedName::new(merged_pass.fragment, decl.name))?;
            let bound_kind = resources[resource].kind();
            if decl.kind != bound_kind {
                return Err(RgCompileError::conflicting(
                    decl.name,
                    format!("pass \"{}\" uses it as {:?} but it is bound to {:?}", node.name, decl.kind, bound_kind),
                ));
            }
            check_access(decl.name, bound_kind, decl.access)?;
            if let Some(domain) = decl.domain {
                if domain != node.domain {
                    return Err(RgCompileError::conflicting(
                        decl.name,
                        format!("pass \"{}\" runs on {} but the use asks for {}", node.name, node.domain, domain),
                    ));
                }
            }

            let versioned = decl.name.is_versioned() && decl.is_read_only();
            match uses.iter().position(|u| u.resource == resource) {
                Some(index) => {
                    uses[index].access |= decl.access;
                    suffixed[index] |= versioned;
                }
                None => {
                    uses.push(RgResolvedUse {
                        resource,
                        declared: decl.name.base(),
                        access: decl.access,
                        clear: None,
                        source: None,
                    });
                    suffixed.push(versioned);
                }
            }
        }

        pending.push(RgPendingPass {
            pass: RgResolvedPass {
                name: node.name,
                fragment: merged_pass.fragment,
                domain: node.domain,
                uses,
                executor: node.executor.clone(),
            },
            suffixed,
        });
    }

    apply_pending_clears(&resources, &mut pending);

    // 读取来源和写入者
    let mut writers: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];
    for (index, p) in pending.iter().enumerate() {
        for u in &p.pass.uses {
            if u.access.is_write() {
                writers[u.resource].push(index);
            }
        }
    }

    let mut last_writer: Vec<Option<usize>> = vec![None; resources.len()];
    for (index, p) in pending.iter_mut().enumerate() {
        for (u, versioned) in p.pass.uses.iter_mut().zip(&p.suffixed) {
            let resource = &resources[u.resource];
            if u.access.is_write() {
                continue;
            }
            let source = if *versioned {
                match writers[u.resource].last() {
                    Some(&writer) => RgReadSource::Write(writer),
                    None => {
                        return Err(RgCompileError::unresolved(
                            resource.name,
                            format!("pass \"{}\" reads the final version but no pass writes it", p.pass.name),
                        ));
                    }
                }
            } else {
                match last_writer[u.resource] {
                    Some(writer) => RgReadSource::Write(writer),
                    None if resource.binding.is_readable() => RgReadSource::Initial,
                    None => {
                        return Err(RgCompileError::unresolved(
                            resource.name,
                            format!("pass \"{}\" reads it before any pass writes it", p.pass.name),
                        ));
                    }
                }
            };
            u.source = Some(source);
        }
        for u in &p.pass.uses {
            if u.access.is_write() {
                last_writer[u.resource] = Some(index);
            }
        }
    }

    // 图结束时的状态
    for (name, release) in &merged.releases {
        let resource = names.resolve(*name)?;
        check_access(name.name, resources[resource].kind(), release.access)?;
        if resources[resource].release.replace(*release).is_some() {
            return Err(RgCompileError::conflicting(resources[resource].name, "released more than once"));
        }
    }

    for export in exports {
        let resource = names.resolve(RgScopedName::new(merged.root, *export))?;
        resources[resource].exported = true;
    }

    let mut rules = Vec::with_capacity(merged.rules.len());
    for (name, rule) in &merged.rules {
        rules.push((names.resolve(*name)?, name.fragment, rule.clone()));
    }

    Ok(RgResolvedGraph {
        root: merged.root,
        passes: pending.into_iter().map(|p| p.pass).collect(),
        resources,
        names,
        rules,
        writers,
    })
}

/// 第一次使用是附件访问时以 load op 清除，否则在第一个使用者之前插入一个清除 pass
fn apply_pending_clears(resources: &[RgResolvedResource], pending: &mut Vec<RgPendingPass>) {
    let mut inserts: Vec<(usize, RgPendingPass)> = Vec::new();

    for (resource_index, resource) in resources.iter().enumerate() {
        let Some(value) = resource.binding.clear else {
            continue;
        };
        let first = pending
            .iter()
            .enumerate()
            .find_map(|(index, p)| p.pass.uses.iter().position(|u| u.resource == resource_index).map(|u| (index, u)));
        let Some((pass_index, use_index)) = first else {
            continue;
        };

        let first_use = &mut pending[pass_index].pass.uses[use_index];
        if resource.kind() == RgResourceKind::Image && first_use.access.is_attachment() {
            first_use.clear = Some(value);
            first_use.access |= if first_use.access.is_depth_stencil() {
                GfxAccess::DEPTH_STENCIL_WRITE
            } else {
                GfxAccess::COLOR_WRITE
            };
            pending[pass_index].suffixed[use_index] = false;
            continue;
        }

        let node = clear_pass_node(resource.scoped.name, value);
        inserts.push((
            pass_index,
            RgPendingPass {
                pass: RgResolvedPass {
                    name: Name::from(format!("clear:{}", resource.name)),
                    fragment: resource.scoped.fragment,
                    domain: QueueDomain::Graphics,
                    uses: vec![RgResolvedUse {
                        resource: resource_index,
                        declared: resource.scoped.name,
                        access: GfxAccess::TRANSFER_WRITE,
                        clear: None,
                        source: None,
                    }],
                    executor: node.executor,
                },
                suffixed: vec![false],
            },
        ));
    }

    // 从后往前插入，前面的下标保持不变
    inserts.sort_by_key(|(index, _)| std::cmp::Reverse(*index));
    for (index, p) in inserts {
        log::trace!("pending clear of {} becomes pass {}", p.pass.name, index);
        pending.insert(index, p);
    }
}
