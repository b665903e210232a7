//! 编译
//!
//! 校验 Pass 的资源声明，分析依赖并排序，为资源分配 backing（可 alias），
//! 然后计算 barrier 与提交批次。所有拓扑错误都在这里 panic。

use std::collections::HashSet;

use indexmap::IndexMap;
use indexmap::map::Entry;

use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::resource_desc::GfxResourceDesc;
use kiln_render_interface::resource_state::{GfxImageLayout, GfxResourceState};
use kiln_utils::dependency_graph::DependencyGraph;

use crate::barrier::{BarrierPlan, EntryTransition, PassBarriers, compute_barriers};
use crate::pass::PassNode;
use crate::resource_handle::ResourceHandle;
use crate::resource_id::ResourceId;
use crate::storage::{Backing, GraphStorage};
use crate::sync::{SubmitBatch, build_batches};

/// 一个 Pass 对一个资源的全部访问合并后的结果
#[derive(Clone, Debug)]
pub(crate) struct PassAccess {
    pub resource: ResourceId,
    pub state: GfxResourceState,
    pub reads: bool,
    pub writes: bool,
}

/// 编译结果
pub(crate) struct CompiledGraph {
    /// 执行顺序（pass 下标）
    pub order: Vec<usize>,
    /// 每个 pass 的依赖层级
    pub levels: Vec<usize>,
    pub accesses: Vec<Vec<PassAccess>>,
    pub barriers: Vec<PassBarriers>,
    pub entries: Vec<EntryTransition>,
    /// 按 pass 下标，见 [`BarrierPlan::exit_states`]
    pub exit_states: Vec<Vec<(usize, GfxResourceState)>>,
    pub batches: Vec<SubmitBatch>,
    pub edge_count: usize,
}

pub(crate) fn compile(passes: &[PassNode], storage: &mut GraphStorage) -> CompiledGraph {
    let _span = tracy_client::span!("RenderGraph::compile");

    let accesses = validate(passes, storage);

    let graph = analyze_dependencies(passes, &accesses);
    let order = graph.topological_order().unwrap_or_else(|err| {
        let names: Vec<_> = err.involved.iter().map(|&i| passes[i].name.as_str()).collect();
        panic!("RenderGraph: Cycle detected involving passes: {names:?}");
    });
    let levels = graph.level_of_nodes().unwrap_or_default();

    let (backings, assignment) = assign_backings(passes, &accesses, &order, storage);
    storage.install_backings(backings, assignment);

    let BarrierPlan {
        passes: barriers,
        entries,
        exit_states,
        sync_pairs,
    } = compute_barriers(passes, &accesses, &order, storage);
    for entry in &entries {
        storage.backing_mut(entry.backing).entry_state = entry.state;
    }

    let batches = build_batches(passes, &order, &graph, &sync_pairs);

    CompiledGraph {
        order,
        levels,
        accesses,
        barriers,
        entries,
        exit_states,
        batches,
        edge_count: graph.edge_count(),
    }
}

/// 校验资源声明，并把每个 Pass 的访问按资源合并
///
/// # Panics
/// - 访问了没有创建或导入的资源
/// - 读取的资源没有被更早的 Pass 写入（导入资源视为已写入）
/// - 用法与资源类型不符，或者同一个 Pass 内 layout 冲突
pub(crate) fn validate(passes: &[PassNode], storage: &mut GraphStorage) -> Vec<Vec<PassAccess>> {
    let mut written: HashSet<ResourceId> =
        storage.resources().filter(|resource| resource.is_imported()).map(|resource| resource.id().clone()).collect();
    let mut result = Vec::with_capacity(passes.len());

    for pass in passes {
        let mut merged: IndexMap<ResourceId, PassAccess> = IndexMap::new();
        for access in &pass.resources.accesses {
            let id = access.view.resource();
            let resource = storage.resource(id).unwrap_or_else(|| {
                panic!("Pass '{}' accesses resource '{id}' which was never created or imported", pass.name)
            });
            let is_image = resource.desc().is_image();
            let state = access.intent.state_for(is_image).unwrap_or_else(|| {
                panic!(
                    "Pass '{}' uses {} '{id}' as {:?}",
                    pass.name,
                    if is_image { "image" } else { "buffer" },
                    access.intent
                )
            });

            let is_write = access.intent.is_write();
            if !is_write && !written.contains(id) {
                panic!("Pass '{}' reads resource '{id}' before any earlier pass writes it", pass.name);
            }

            match merged.entry(id.clone()) {
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.state = existing.state.merge(&state).unwrap_or_else(|| {
                        panic!(
                            "Pass '{}' accesses resource '{id}' with conflicting layouts {:?} and {:?}",
                            pass.name, existing.state.layout, state.layout
                        )
                    });
                    existing.reads |= !is_write;
                    existing.writes |= is_write;
                }
                Entry::Vacant(entry) => {
                    entry.insert(PassAccess {
                        resource: id.clone(),
                        state,
                        reads: !is_write,
                        writes: is_write,
                    });
                }
            }
        }

        for (id, _) in &pass.resources.exports {
            assert!(
                storage.contains_resource(id),
                "Pass '{}' exports resource '{id}' which does not exist",
                pass.name
            );
        }

        for access in &pass.resources.accesses {
            storage.register_view(&access.view);
        }
        written.extend(merged.values().filter(|access| access.writes).map(|access| access.resource.clone()));
        result.push(merged.into_values().collect());
    }

    result
}

#[derive(Default)]
struct ResourceTracker {
    last_writer: Option<usize>,
    /// 上一次写入之后的读取者
    readers: Vec<(usize, GfxImageLayout)>,
}

/// 分析资源依赖，构建依赖图
///
/// 规则（边总是从声明在前的 Pass 指向在后的 Pass）：
/// - 写后读（RAW）：reader 依赖 writer
/// - 写后写（WAW）：后一个 writer 依赖前一个 writer
/// - 读后写（WAR）：writer 依赖之前的所有 reader
/// - layout 不同的两次读取：后一个 reader 依赖前一个
pub(crate) fn analyze_dependencies(passes: &[PassNode], accesses: &[Vec<PassAccess>]) -> DependencyGraph {
    let mut graph = DependencyGraph::with_nodes(passes.len());
    let mut trackers: IndexMap<ResourceId, ResourceTracker> = IndexMap::new();

    let depend = |graph: &mut DependencyGraph, pass: usize, on: usize| {
        if pass != on {
            graph.add_dependency(pass, on).unwrap_or_else(|err| {
                panic!("Circular dependency between passes '{}' and '{}': {err}", passes[pass].name, passes[on].name)
            });
        }
    };

    for (pass_idx, pass_accesses) in accesses.iter().enumerate() {
        for access in pass_accesses {
            let tracker = trackers.entry(access.resource.clone()).or_default();

            if let Some(writer) = tracker.last_writer {
                depend(&mut graph, pass_idx, writer);
            }
            for &(reader, layout) in &tracker.readers {
                if access.writes || layout != access.state.layout {
                    depend(&mut graph, pass_idx, reader);
                }
            }

            if access.writes {
                tracker.last_writer = Some(pass_idx);
                tracker.readers.clear();
            } else {
                tracker.readers.push((pass_idx, access.state.layout));
            }
        }
    }

    graph
}

struct AliasSlot {
    backing: usize,
    key: (GfxResourceDesc, bool),
    last_use: usize,
}

/// alias 时比较的 key，window size 资源的尺寸总是相同，不参与比较
fn alias_key(resource: &ResourceHandle) -> (GfxResourceDesc, bool) {
    let window_sized = resource.is_window_size_dependent();
    let mut desc = *resource.desc();
    if window_sized {
        if let Some(image) = desc.as_image_mut() {
            image.extent = Extent2D::default();
        }
    }
    (desc, window_sized)
}

/// 计算资源的生命周期并分配 backing
///
/// - 导入资源：使用外部句柄
/// - 不可 alias 的资源：独占一个 backing
/// - 可 alias 的资源：按首次使用排序，贪心地复用描述相同、生命周期已经结束的 backing
///
/// 没有被任何执行的 Pass 访问的资源不分配 backing。
pub(crate) fn assign_backings(
    passes: &[PassNode],
    accesses: &[Vec<PassAccess>],
    order: &[usize],
    storage: &GraphStorage,
) -> (Vec<Backing>, Vec<(ResourceId, usize)>) {
    let mut lifetimes: IndexMap<ResourceId, (usize, usize)> = IndexMap::new();
    for (position, &pass_idx) in order.iter().enumerate() {
        if !passes[pass_idx].is_dispatchable() {
            continue;
        }
        for access in &accesses[pass_idx] {
            lifetimes.entry(access.resource.clone()).or_insert((position, position)).1 = position;
        }
    }

    let mut backings = Vec::new();
    let mut assignment = Vec::new();
    let mut aliasable = Vec::new();

    for resource in storage.resources() {
        let id = resource.id();
        let Some(&(first, last)) = lifetimes.get(id) else {
            log::debug!("Resource '{id}' is not used by any dispatched pass");
            continue;
        };
        if resource.is_imported() {
            backings.push(Backing::imported(id.clone(), *resource.desc()));
        } else if resource.is_aliasable() && resource.buffer_size_fn().is_none() {
            aliasable.push((first, last, resource));
            continue;
        } else {
            let mut backing =
                Backing::owned(id.name().to_string(), *resource.desc(), resource.is_window_size_dependent());
            backing.buffer_size = resource.buffer_size_fn();
            backings.push(backing);
        }
        assignment.push((id.clone(), backings.len() - 1));
    }

    aliasable.sort_by_key(|(first, _, _)| *first);
    let mut alias_slots: Vec<AliasSlot> = Vec::new();
    for (first, last, resource) in aliasable {
        let key = alias_key(resource);
        let id = resource.id();
        match alias_slots.iter_mut().find(|slot| slot.key == key && slot.last_use < first) {
            Some(slot) => {
                slot.last_use = last;
                let backing = &mut backings[slot.backing];
                backing.name.push('+');
                backing.name.push_str(id.name());
                assignment.push((id.clone(), slot.backing));
            }
            None => {
                backings.push(Backing::owned(id.name().to_string(), *resource.desc(), key.1));
                alias_slots.push(AliasSlot {
                    backing: backings.len() - 1,
                    key,
                    last_use: last,
                });
                assignment.push((id.clone(), backings.len() - 1));
            }
        }
    }

    (backings, assignment)
}
