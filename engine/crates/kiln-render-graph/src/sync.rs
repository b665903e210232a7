//! 多 queue 提交与同步
//!
//! 连续的同 queue Pass 合并成一个批次；每个 queue 持有一个 timeline semaphore，
//! 跨 queue 的依赖通过等待对方批次的 signal 值来同步。

use std::time::Duration;

use kiln_render_interface::gfx_backend::{GfxBackend, QueueClass};
use kiln_render_interface::gfx_error::GfxResult;
use kiln_render_interface::handles::GfxSemaphoreHandle;
use kiln_utils::dependency_graph::DependencyGraph;

use crate::pass::PassNode;

/// 一次提交
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitBatch {
    pub queue: QueueClass,
    /// pass 下标，按执行顺序
    pub passes: Vec<usize>,
    /// 需要等待的批次（更早的批次下标）
    pub waits: Vec<usize>,
}

/// 把执行顺序切分成批次，并计算批次之间的等待关系
///
/// `sync_pairs` 为先后访问同一个 backing 的 Pass 对，即使没有依赖边也需要跨 queue 同步。
pub(crate) fn build_batches(
    passes: &[PassNode],
    order: &[usize],
    graph: &DependencyGraph,
    sync_pairs: &[(usize, usize)],
) -> Vec<SubmitBatch> {
    let mut batches: Vec<SubmitBatch> = Vec::new();
    let mut batch_of_pass: Vec<Option<usize>> = vec![None; passes.len()];

    for &pass_idx in order {
        let node = &passes[pass_idx];
        if !node.is_dispatchable() {
            continue;
        }
        match batches.last_mut() {
            Some(batch) if batch.queue == node.queue => batch.passes.push(pass_idx),
            _ => batches.push(SubmitBatch {
                queue: node.queue,
                passes: vec![pass_idx],
                waits: Vec::new(),
            }),
        }
        batch_of_pass[pass_idx] = Some(batches.len() - 1);
    }

    let dependency_pairs =
        (0..passes.len()).flat_map(|pass_idx| graph.dependents(pass_idx).iter().map(move |&d| (pass_idx, d)));
    for (from, to) in dependency_pairs.chain(sync_pairs.iter().copied()) {
        let (Some(src), Some(dst)) = (batch_of_pass[from], batch_of_pass[to]) else {
            continue;
        };
        if src != dst && batches[src].queue != batches[dst].queue && !batches[dst].waits.contains(&src) {
            batches[dst].waits.push(src);
        }
    }
    for batch in &mut batches {
        batch.waits.sort_unstable();
    }

    batches
}

/// 每个 queue 一个 timeline semaphore
pub(crate) struct QueueTimelines {
    semaphores: [Option<GfxSemaphoreHandle>; 3],
    /// 每个 queue 最后一次成功提交的 signal 值
    values: [u64; 3],
    /// 每个 FIF slot 上一次提交的 signal 值，复用 slot 之前需要等待
    slot_values: Vec<[u64; 3]>,
}

impl QueueTimelines {
    pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(fif_count: usize) -> Self {
        Self {
            semaphores: [None; 3],
            values: [0; 3],
            slot_values: vec![[0; 3]; fif_count],
        }
    }

    pub fn ensure_created(&mut self, backend: &mut dyn GfxBackend) -> GfxResult<()> {
        for queue in QueueClass::DISPATCHABLE {
            let Some(idx) = queue.index() else { continue };
            if self.semaphores[idx].is_none() {
                let name = format!("kiln-{queue}-timeline");
                self.semaphores[idx] = Some(backend.create_timeline_semaphore(self.values[idx], &name)?);
            }
        }
        Ok(())
    }

    #[inline]
    pub fn semaphore(&self, queue: QueueClass) -> Option<GfxSemaphoreHandle> {
        self.semaphores[queue.index()?]
    }

    #[inline]
    pub fn value(&self, queue: QueueClass) -> u64 {
        queue.index().map_or(0, |idx| self.values[idx])
    }

    /// 本次提交应当 signal 的值，提交成功后才通过 [`Self::commit`] 生效
    #[inline]
    pub fn next_value(&self, queue: QueueClass) -> u64 {
        self.value(queue) + 1
    }

    pub fn commit(&mut self, queue: QueueClass, slot: usize, value: u64) {
        if let Some(idx) = queue.index() {
            self.values[idx] = value;
            self.slot_values[slot][idx] = value;
        }
    }

    /// 等待该 slot 上一次提交的所有工作完成
    pub fn wait_slot(&self, backend: &mut dyn GfxBackend, slot: usize) -> GfxResult<()> {
        let _span = tracy_client::span!("QueueTimelines::wait_slot");
        for (idx, &value) in self.slot_values[slot].iter().enumerate() {
            if value == 0 {
                continue;
            }
            if let Some(semaphore) = self.semaphores[idx] {
                backend.wait_semaphore(semaphore, value, Self::WAIT_TIMEOUT)?;
            }
        }
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GfxBackend) {
        for semaphore in self.semaphores.iter_mut() {
            if let Some(handle) = semaphore.take() {
                backend.destroy_semaphore(handle);
            }
        }
    }

    #[inline]
    pub fn is_created(&self) -> bool {
        self.semaphores.iter().any(Option::is_some)
    }
}

impl Drop for QueueTimelines {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && !std::thread::panicking() {
            assert!(!self.is_created(), "QueueTimelines dropped without destroy()");
        }
    }
}
