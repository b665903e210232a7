use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use bitflags::bitflags;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::phase_builder::{PhaseId, PipelineBuilder};

bitflags! {
    /// Phase 的运行时开关
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PhaseFlags: u8 {
        /// Phase 被禁用，tick 时跳过
        const DISABLED = 1 << 0;
        /// Phase 不会被放到线程池中执行，只在调用 tick 的线程上执行
        const DONT_PARALLELIZE = 1 << 1;
    }
}

/// 挂载到 Phase 上的回调
pub type PhaseCallback = Box<dyn FnMut() + Send>;

/// `attach` 返回的回调 id，用于 `detach`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Pipeline 的构造参数
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// 子系统需要假设的 in-flight 帧数量
    pub frame_latency: u32,
    /// 并行执行 Phase 的工作线程数量，小于等于 1 时所有 Phase 都在调用线程上执行
    pub worker_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_latency: 3,
            worker_threads: 2,
        }
    }
}

struct PipelinePhase {
    name: String,
    flags: PhaseFlags,
    /// 按挂载顺序排列
    callbacks: Mutex<Vec<(CallbackId, PhaseCallback)>>,
}

impl PipelinePhase {
    fn has_callbacks(&self) -> bool {
        !self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    fn broadcast(&self) {
        let _span = tracy_client::span!("PipelinePhase::broadcast");
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, callback) in callbacks.iter_mut() {
            callback();
        }
    }
}

/// 编译后的 Phase 图
///
/// 拓扑序与依赖层级在构造时计算一次，之后拓扑不再变化；回调可以随时挂载和移除。
///
/// tick 时逐层执行：某一层的所有 Phase 返回之后才会开始下一层，
/// 因此一个 Phase 永远不会早于它依赖的 Phase 执行。
/// 回调在 Phase 的锁内执行，回调中不能再对同一个 Phase 调用 `attach` / `detach`。
pub struct Pipeline {
    phases: Vec<PipelinePhase>,
    lookup: IndexMap<String, PhaseId>,

    /// Kahn 拓扑序
    order: Vec<PhaseId>,
    /// 依赖层级，层内按拓扑序排列
    levels: Vec<Vec<PhaseId>>,

    thread_pool: Option<rayon::ThreadPool>,
    frame_latency: u32,

    next_callback_id: AtomicU64,
    frame_index: u64,
}
// new & init
impl Pipeline {
    pub fn new(builder: PipelineBuilder, config: PipelineConfig) -> Self {
        let _span = tracy_client::span!("Pipeline::new");
        assert!(config.frame_latency > 0, "Pipeline frame latency must be positive");

        let (lookup, graph) = builder.into_parts();

        let order = graph
            .topological_order()
            .unwrap_or_else(|err| panic!("Pipeline phase graph is not acyclic: {err}"))
            .into_iter()
            .map(PhaseId)
            .collect_vec();
        let levels = graph
            .levels()
            .unwrap_or_else(|err| panic!("Pipeline phase graph is not acyclic: {err}"))
            .into_iter()
            .map(|level| level.into_iter().map(PhaseId).collect_vec())
            .collect_vec();

        let phases = lookup
            .keys()
            .map(|name| PipelinePhase {
                name: name.clone(),
                flags: PhaseFlags::empty(),
                callbacks: Mutex::new(Vec::new()),
            })
            .collect_vec();

        let thread_pool = if config.worker_threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.worker_threads)
                .thread_name(|i| format!("kiln-phase-{i}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    log::warn!("Failed to create phase thread pool, phases will run serially: {err}");
                    None
                }
            }
        } else {
            None
        };

        log::info!("Pipeline order: {}", order.iter().map(|id| phases[id.0].name.as_str()).join(" → "));

        Self {
            phases,
            lookup,
            order,
            levels,
            thread_pool,
            frame_latency: config.frame_latency,
            next_callback_id: AtomicU64::new(0),
            frame_index: 0,
        }
    }
}
// 回调
impl Pipeline {
    fn phase(&self, name: &str) -> &PipelinePhase {
        let id = self.lookup.get(name).unwrap_or_else(|| panic!("Pipeline phase '{name}' does not exist"));
        &self.phases[id.0]
    }

    fn phase_mut(&mut self, name: &str) -> &mut PipelinePhase {
        let id = *self.lookup.get(name).unwrap_or_else(|| panic!("Pipeline phase '{name}' does not exist"));
        &mut self.phases[id.0]
    }

    /// 将回调追加到 Phase 的回调列表末尾
    pub fn attach(&self, phase_name: &str, callback: impl FnMut() + Send + 'static) -> CallbackId {
        let phase = self.phase(phase_name);
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        phase.callbacks.lock().unwrap_or_else(PoisonError::into_inner).push((id, Box::new(callback)));
        id
    }

    /// 移除回调，返回该回调是否存在
    pub fn detach(&self, phase_name: &str, id: CallbackId) -> bool {
        let phase = self.phase(phase_name);
        let mut callbacks = phase.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let len = callbacks.len();
        callbacks.retain(|(callback_id, _)| *callback_id != id);
        callbacks.len() != len
    }

    pub fn callback_count(&self, phase_name: &str) -> usize {
        self.phase(phase_name).callbacks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
// flags
impl Pipeline {
    pub fn set_phase_enabled(&mut self, phase_name: &str, enabled: bool) {
        self.phase_mut(phase_name).flags.set(PhaseFlags::DISABLED, !enabled);
    }

    pub fn set_phase_parallelize(&mut self, phase_name: &str, parallelize: bool) {
        self.phase_mut(phase_name).flags.set(PhaseFlags::DONT_PARALLELIZE, !parallelize);
    }

    pub fn phase_flags(&self, phase_name: &str) -> PhaseFlags {
        self.phase(phase_name).flags
    }
}
// update
impl Pipeline {
    /// 执行一帧
    ///
    /// 逐层执行。层内可并行的 Phase 交给线程池，其余 Phase 随后按拓扑序在当前线程执行。
    pub fn tick(&mut self) {
        let _span = tracy_client::span!("Pipeline::tick");

        for level in &self.levels {
            let active = level
                .iter()
                .map(|id| &self.phases[id.0])
                .filter(|phase| !phase.flags.contains(PhaseFlags::DISABLED) && phase.has_callbacks())
                .collect_vec();

            let (parallel, serial): (Vec<_>, Vec<_>) = active.into_iter().partition(|phase| {
                self.thread_pool.is_some() && !phase.flags.contains(PhaseFlags::DONT_PARALLELIZE)
            });

            if let Some(pool) = &self.thread_pool
                && parallel.len() > 1
            {
                pool.scope(|scope| {
                    for phase in &parallel {
                        scope.spawn(move |_| phase.broadcast());
                    }
                });
            } else {
                // 只有一个可并行的 Phase 时没有必要切换线程
                parallel.iter().for_each(|phase| phase.broadcast());
            }

            serial.iter().for_each(|phase| phase.broadcast());
        }

        self.frame_index += 1;
    }
}
// getters
impl Pipeline {
    /// 拓扑序
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|id| self.phases[id.0].name.as_str())
    }

    /// 依赖层级
    pub fn levels(&self) -> Vec<Vec<&str>> {
        self.levels.iter().map(|level| level.iter().map(|id| self.phases[id.0].name.as_str()).collect()).collect()
    }

    #[inline]
    pub fn frame_latency(&self) -> u32 {
        self.frame_latency
    }

    /// 已经执行过的 tick 数量
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn update_render_pipeline(worker_threads: usize) -> Pipeline {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("Update").then("PostUpdate").then("Render");
        Pipeline::new(
            builder,
            PipelineConfig {
                frame_latency: 2,
                worker_threads,
            },
        )
    }

    /// 每次调用时从共享计数器取一个递增的序号，记录到 `slot`
    fn stamp(counter: &Arc<AtomicU64>, slot: &Arc<AtomicU64>) -> impl FnMut() + Send + 'static {
        let counter = counter.clone();
        let slot = slot.clone();
        move || slot.store(counter.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst)
    }

    #[test]
    fn test_tick_runs_dependencies_first() {
        kiln_crate_tools::init_log::init_log_for_test();

        for worker_threads in [1, 4] {
            let mut pipeline = update_render_pipeline(worker_threads);
            let counter = Arc::new(AtomicU64::new(0));
            let slots = [(); 3].map(|_| Arc::new(AtomicU64::new(0)));

            // 逆序挂载，执行顺序只取决于拓扑
            pipeline.attach("Render", stamp(&counter, &slots[2]));
            pipeline.attach("PostUpdate", stamp(&counter, &slots[1]));
            pipeline.attach("Update", stamp(&counter, &slots[0]));
            pipeline.tick();

            let [update, post_update, render] = slots.map(|slot| slot.load(Ordering::SeqCst));
            assert!(update > 0);
            assert!(update < post_update);
            assert!(post_update < render);
            assert_eq!(pipeline.frame_index(), 1);
        }
    }

    #[test]
    fn test_order_and_levels() {
        let mut builder = PipelineBuilder::new();
        builder.new_phase("Input");
        builder.new_phase("Physics");
        builder.new_phase("Update").depends_on("Input").depends_on("Physics");
        builder.new_phase("Render").depends_on("Update");
        let pipeline = Pipeline::new(builder, PipelineConfig::default());

        assert_eq!(pipeline.order().collect_vec(), vec!["Input", "Physics", "Update", "Render"]);
        assert_eq!(pipeline.levels(), vec![vec!["Input", "Physics"], vec!["Update"], vec!["Render"]]);
        assert_eq!(pipeline.frame_latency(), 3);
    }

    #[test]
    fn test_callbacks_run_in_attachment_order() {
        let mut pipeline = update_render_pipeline(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = log.clone();
            pipeline.attach("Update", move || log.lock().unwrap().push(i));
        }
        pipeline.tick();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_detach() {
        let mut pipeline = update_render_pipeline(1);
        let hits = Arc::new(AtomicU64::new(0));

        let hits_a = hits.clone();
        let id = pipeline.attach("Render", move || {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        pipeline.tick();
        assert!(pipeline.detach("Render", id));
        assert!(!pipeline.detach("Render", id));
        pipeline.tick();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.callback_count("Render"), 0);
    }

    #[test]
    fn test_disabled_phase_is_skipped() {
        let mut pipeline = update_render_pipeline(1);
        let hits = Arc::new(AtomicU64::new(0));
        let hits_a = hits.clone();
        pipeline.attach("PostUpdate", move || {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });

        pipeline.set_phase_enabled("PostUpdate", false);
        pipeline.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(pipeline.phase_flags("PostUpdate").contains(PhaseFlags::DISABLED));

        pipeline.set_phase_enabled("PostUpdate", true);
        pipeline.tick();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parallel_level_completes_before_dependent() {
        let mut builder = PipelineBuilder::new();
        for i in 0..8 {
            builder.new_phase(format!("Worker{i}"));
        }
        let mut join = builder.new_phase("Join");
        for i in 0..8 {
            join = join.depends_on(format!("Worker{i}").as_str());
        }
        let mut pipeline = Pipeline::new(
            builder,
            PipelineConfig {
                frame_latency: 1,
                worker_threads: 4,
            },
        );
        pipeline.set_phase_parallelize("Worker0", false);

        let done = Arc::new(AtomicU64::new(0));
        for i in 0..8 {
            let done = done.clone();
            pipeline.attach(&format!("Worker{i}"), move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        let observed = Arc::new(AtomicU64::new(0));
        {
            let done = done.clone();
            let observed = observed.clone();
            pipeline.attach("Join", move || observed.store(done.load(Ordering::SeqCst), Ordering::SeqCst));
        }

        pipeline.tick();
        assert_eq!(observed.load(Ordering::SeqCst), 8);
    }

    #[test]
    #[should_panic(expected = "Pipeline phase 'Missing' does not exist")]
    fn test_attach_to_missing_phase_panics() {
        let pipeline = update_render_pipeline(1);
        pipeline.attach("Missing", || {});
    }
}
