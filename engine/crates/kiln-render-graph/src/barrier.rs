//! Barrier 自动计算
//!
//! 按执行顺序模拟每个物理资源的状态变化，生成 Pass 之前需要的 barrier，
//! 以及导出资源在最后一次使用之后需要的 barrier。

use kiln_render_interface::resource_state::GfxResourceState;

use crate::compile::PassAccess;
use crate::pass::PassNode;
use crate::resource_id::ResourceId;
use crate::storage::GraphStorage;

/// Barrier 描述
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierDesc {
    /// 触发 barrier 的逻辑资源
    pub resource: ResourceId,
    /// 物理资源下标
    pub backing: usize,
    pub before: GfxResourceState,
    pub after: GfxResourceState,
}

impl BarrierDesc {
    pub fn new(resource: ResourceId, backing: usize, before: GfxResourceState, after: GfxResourceState) -> Self {
        Self {
            resource,
            backing,
            before,
            after,
        }
    }

    /// layout 不同，或者任意一方有写操作
    #[inline]
    pub fn needs_barrier(&self) -> bool {
        self.before.needs_barrier_to(&self.after)
    }

    #[inline]
    pub fn layout_changed(&self) -> bool {
        self.before.layout != self.after.layout
    }
}

/// Pass 前后需要的 Barrier 集合
#[derive(Clone, Debug, Default)]
pub struct PassBarriers {
    /// 在 dispatch 之前
    pub pre: Vec<BarrierDesc>,
    /// 在 dispatch 之后，用于导出资源
    pub post: Vec<BarrierDesc>,
}

impl PassBarriers {
    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.pre.is_empty() || !self.post.is_empty()
    }

    #[inline]
    pub fn barrier_count(&self) -> usize {
        self.pre.len() + self.post.len()
    }
}

/// 物理资源在一帧中的第一次访问
///
/// 编译时不知道上一帧留下的状态，执行时与资源的实际状态比较，只有 layout 不同时才插入 barrier。
#[derive(Clone, Debug)]
pub(crate) struct EntryTransition {
    pub backing: usize,
    pub pass: usize,
    pub resource: ResourceId,
    pub state: GfxResourceState,
}

impl EntryTransition {
    #[inline]
    pub fn needs_barrier(&self, current: &GfxResourceState) -> bool {
        current.layout != self.state.layout
    }
}

#[derive(Debug, Default)]
pub(crate) struct BarrierPlan {
    /// 按 pass 下标
    pub passes: Vec<PassBarriers>,
    pub entries: Vec<EntryTransition>,
    /// 按 pass 下标，每个 Pass 执行完之后它访问过的 backing 的状态
    ///
    /// 批次提交成功后按顺序写回，提交到一半失败时已经执行的部分状态也是准确的。
    pub exit_states: Vec<Vec<(usize, GfxResourceState)>>,
    /// 先后使用同一个 backing 的 Pass，跨 queue 时需要同步
    pub sync_pairs: Vec<(usize, usize)>,
}

#[derive(Clone, Copy)]
struct TrackedState {
    state: GfxResourceState,
    last_pass: usize,
    /// 下标指向 entries，该资源还没有经过任何 barrier 时有效
    open_entry: Option<usize>,
}

/// 计算每个 Pass 需要的 barriers
///
/// 模拟 Pass 的执行顺序，按 backing 跟踪状态。被 cull 的 Pass 不参与。
pub(crate) fn compute_barriers(
    passes: &[PassNode],
    accesses: &[Vec<PassAccess>],
    order: &[usize],
    storage: &GraphStorage,
) -> BarrierPlan {
    let _span = tracy_client::span!("compute_barriers");

    let backing_count = storage.backing_count();
    let mut plan = BarrierPlan {
        passes: vec![PassBarriers::default(); passes.len()],
        exit_states: vec![Vec::new(); passes.len()],
        ..Default::default()
    };
    let mut tracked: Vec<Option<TrackedState>> = vec![None; backing_count];

    for &pass_idx in order {
        if !passes[pass_idx].is_dispatchable() {
            continue;
        }
        for access in &accesses[pass_idx] {
            let Some(backing) = storage.resource(&access.resource).and_then(|resource| resource.backing()) else {
                continue;
            };

            let Some(crt) = tracked[backing] else {
                plan.entries.push(EntryTransition {
                    backing,
                    pass: pass_idx,
                    resource: access.resource.clone(),
                    state: access.state,
                });
                tracked[backing] = Some(TrackedState {
                    state: access.state,
                    last_pass: pass_idx,
                    open_entry: Some(plan.entries.len() - 1),
                });
                set_exit_state(&mut plan.exit_states[pass_idx], backing, access.state);
                continue;
            };

            if crt.last_pass != pass_idx {
                plan.sync_pairs.push((crt.last_pass, pass_idx));
            }

            let barrier = BarrierDesc::new(access.resource.clone(), backing, crt.state, access.state);
            if barrier.needs_barrier() {
                plan.passes[pass_idx].pre.push(barrier);
                tracked[backing] = Some(TrackedState {
                    state: access.state,
                    last_pass: pass_idx,
                    open_entry: None,
                });
            } else {
                // 同 layout 的只读访问，合并 stage 与 access
                let merged = crt.state.merge(&access.state).unwrap_or(access.state);
                if let Some(entry) = crt.open_entry {
                    plan.entries[entry].state = merged;
                }
                tracked[backing] = Some(TrackedState {
                    state: merged,
                    last_pass: pass_idx,
                    open_entry: crt.open_entry,
                });
            }
            if let Some(crt) = tracked[backing] {
                set_exit_state(&mut plan.exit_states[pass_idx], backing, crt.state);
            }
        }
    }

    for pass in passes {
        for (id, final_state) in &pass.resources.exports {
            let Some(backing) = storage.resource(id).and_then(|resource| resource.backing()) else {
                log::warn!("Export of '{id}' ignored: resource is never used by a dispatched pass");
                continue;
            };
            let Some(crt) = tracked[backing] else {
                continue;
            };
            let barrier = BarrierDesc::new(id.clone(), backing, crt.state, *final_state);
            if barrier.needs_barrier() {
                plan.passes[crt.last_pass].post.push(barrier);
            }
            set_exit_state(&mut plan.exit_states[crt.last_pass], backing, *final_state);
            tracked[backing] = Some(TrackedState {
                state: *final_state,
                last_pass: crt.last_pass,
                open_entry: None,
            });
        }
    }

    plan
}

fn set_exit_state(states: &mut Vec<(usize, GfxResourceState)>, backing: usize, state: GfxResourceState) {
    match states.iter_mut().find(|(b, _)| *b == backing) {
        Some(entry) => entry.1 = state,
        None => states.push((backing, state)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_layout_change() {
        let barrier = BarrierDesc::new(
            ResourceId::new("a"),
            0,
            GfxResourceState::UNDEFINED,
            GfxResourceState::COLOR_ATTACHMENT_WRITE,
        );
        assert!(barrier.needs_barrier());
        assert!(barrier.layout_changed());
    }

    #[test]
    fn test_barrier_read_to_read() {
        let barrier = BarrierDesc::new(
            ResourceId::new("a"),
            0,
            GfxResourceState::SHADER_READ_FRAGMENT,
            GfxResourceState::SHADER_READ_NON_FRAGMENT,
        );
        assert!(!barrier.needs_barrier());
    }

    #[test]
    fn test_barrier_write_to_read() {
        let barrier = BarrierDesc::new(
            ResourceId::new("a"),
            0,
            GfxResourceState::STORAGE_WRITE_COMPUTE,
            GfxResourceState::SHADER_READ_FRAGMENT,
        );
        assert!(barrier.needs_barrier());
    }

    #[test]
    fn test_entry_only_compares_layout() {
        let entry = EntryTransition {
            backing: 0,
            pass: 0,
            resource: ResourceId::new("a"),
            state: GfxResourceState::COLOR_ATTACHMENT_WRITE,
        };
        assert!(!entry.needs_barrier(&GfxResourceState::COLOR_ATTACHMENT_WRITE));
        assert!(entry.needs_barrier(&GfxResourceState::SHADER_READ_FRAGMENT));
    }
}
