//! 可执行的渲染图
//!
//! 状态流转：`Unbuilt -> Built -> Running`。`reset` 回到 `Unbuilt`，
//! `resize` 只重建 window size 资源，不会改变 Pass 的顺序。

use itertools::Itertools;
use rayon::prelude::*;

use kiln_render_interface::async_load::LoadStatus;
use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::{GfxBackend, GfxBarrier, GfxCommandList, GfxSemaphoreSignal, GfxSemaphoreWait};
use kiln_render_interface::resource_state::GfxPipelineStage;

use crate::barrier::{BarrierDesc, PassBarriers};
use crate::builder::RenderGraphBuilder;
use crate::compile::{CompiledGraph, compile};
use crate::config::RenderGraphConfig;
use crate::error::RenderGraphError;
use crate::pass::{PassContext, PassNode};
use crate::storage::GraphStorage;
use crate::sync::{QueueTimelines, SubmitBatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderGraphState {
    /// 拓扑改变之后，或者 build 失败
    Unbuilt,
    Built,
    /// 至少执行过一帧
    Running,
}

/// 一帧执行的统计
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_id: u64,
    pub frame_label: usize,
    pub batch_count: usize,
    pub dispatched_passes: usize,
    /// 包括帧入口的状态转换
    pub barrier_count: usize,
}

pub struct RenderGraph {
    pub(crate) passes: Vec<PassNode>,
    pub(crate) storage: GraphStorage,
    compiled: Option<CompiledGraph>,
    timelines: QueueTimelines,
    state: RenderGraphState,
}

// new & init
impl RenderGraph {
    pub fn new(config: RenderGraphConfig) -> Self {
        Self {
            passes: Vec::new(),
            storage: GraphStorage::new(&config),
            compiled: None,
            timelines: QueueTimelines::new(config.frames_in_flight),
            state: RenderGraphState::Unbuilt,
        }
    }

    /// 拓扑改变：清空所有 Pass 与资源声明，返回用于重新添加 Pass 的 builder
    ///
    /// 旧的物理资源延迟销毁。
    pub fn reset(&mut self) -> RenderGraphBuilder<'_> {
        self.passes.clear();
        self.compiled = None;
        self.storage.clear_resources();
        self.state = RenderGraphState::Unbuilt;
        RenderGraphBuilder::new(self)
    }

    /// 编译并分配资源
    ///
    /// # Panics
    /// Pass 的资源声明不合法，例如读取了没有被写入的资源
    pub fn build(&mut self, backend: &mut dyn GfxBackend) -> Result<(), RenderGraphError> {
        let _span = tracy_client::span!("RenderGraph::build");

        self.state = RenderGraphState::Unbuilt;
        self.compiled = None;
        self.check_async_dependencies()?;

        let compiled = compile(&self.passes, &mut self.storage);

        if let Err(source) = self.timelines.ensure_created(backend) {
            self.storage.retire_backings();
            return Err(RenderGraphError::ResourceAllocation {
                resource: "queue timeline".to_string(),
                source,
            });
        }
        if let Err(err) = self.storage.allocate(backend) {
            log::error!("render graph build failed: {err}");
            self.storage.retire_backings();
            return Err(err);
        }

        log::info!(
            "render graph built: {} passes, {} edges, {} batches, {} backings",
            self.passes.len(),
            compiled.edge_count,
            compiled.batches.len(),
            self.storage.backing_count()
        );
        self.compiled = Some(compiled);
        self.state = RenderGraphState::Built;
        Ok(())
    }

    fn check_async_dependencies(&self) -> Result<(), RenderGraphError> {
        for pass in &self.passes {
            for handle in &pass.resources.async_dependencies {
                let status = handle.status();
                if status == LoadStatus::Failed {
                    return Err(RenderGraphError::DependencyFailed {
                        pass: pass.name.clone(),
                        dependency: handle.name().to_string(),
                    });
                }
                if status.is_pending() {
                    return Err(RenderGraphError::DependencyPending {
                        pass: pass.name.clone(),
                        dependency: handle.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

// destroy
impl RenderGraph {
    /// 等待 GPU 空闲，然后立即销毁所有资源
    pub fn destroy(&mut self, backend: &mut dyn GfxBackend) {
        let _span = tracy_client::span!("RenderGraph::destroy");

        if let Err(err) = backend.wait_idle() {
            log::error!("wait idle failed before destroying render graph: {err}");
        }
        self.storage.destroy(backend);
        self.timelines.destroy(backend);
        self.compiled = None;
        self.state = RenderGraphState::Unbuilt;
    }
}

// update
impl RenderGraph {
    /// 执行一帧
    ///
    /// 没有 build 成功时返回 [`RenderGraphError::NotBuilt`]，不会执行任何 Pass。
    pub fn run(&mut self, backend: &mut dyn GfxBackend) -> Result<FrameReport, RenderGraphError> {
        let _span = tracy_client::span!("RenderGraph::run");

        let Some(compiled) = self.compiled.as_ref() else {
            return Err(RenderGraphError::NotBuilt);
        };

        let slot = self.storage.current_slot();
        let frame_name = self.storage.frame_counter().frame_name();

        self.timelines.wait_slot(backend, slot).map_err(|source| RenderGraphError::Submission {
            batch: format!("{frame_name} wait slot"),
            source,
        })?;
        self.storage.retire(backend);
        self.storage.upload_frame_data(backend).map_err(|source| RenderGraphError::Submission {
            batch: format!("{frame_name} upload frame data"),
            source,
        })?;

        // 帧入口：与资源实际的状态比较
        let mut entry_barriers: Vec<Vec<GfxBarrier>> = vec![Vec::new(); self.passes.len()];
        for entry in &compiled.entries {
            let Some(crt) = self.storage.backing_slot(entry.backing, slot) else {
                continue;
            };
            if entry.needs_barrier(&crt.state) {
                entry_barriers[entry.pass].push(GfxBarrier::new(crt.handle, crt.state, entry.state));
            }
        }

        let mut command_lists = compiled
            .batches
            .iter()
            .enumerate()
            .map(|(idx, batch)| backend.allocate_command_list(batch.queue, &batch_name(&frame_name, idx, batch)))
            .collect_vec();

        {
            let _span = tracy_client::span!("RenderGraph::record");
            let passes = &self.passes;
            let storage = &self.storage;
            let entry_barriers = &entry_barriers;
            command_lists.par_iter_mut().zip(compiled.batches.par_iter()).for_each(|(cmd, batch)| {
                record_batch(passes, storage, compiled, entry_barriers, slot, batch, cmd.as_mut());
            });
        }

        let barrier_count = entry_barriers.iter().map(Vec::len).sum::<usize>()
            + compiled
                .order
                .iter()
                .filter(|&&idx| self.passes[idx].is_dispatchable())
                .map(|&idx| compiled.barriers[idx].barrier_count())
                .sum::<usize>();

        // 按顺序提交，signal 值与资源状态在提交成功后才生效
        let _submit_span = tracy_client::span!("RenderGraph::submit");
        let mut batch_values: Vec<u64> = Vec::with_capacity(compiled.batches.len());
        for ((idx, batch), cmd) in compiled.batches.iter().enumerate().zip(command_lists) {
            let waits = batch
                .waits
                .iter()
                .filter_map(|&wait| {
                    Some(GfxSemaphoreWait {
                        semaphore: self.timelines.semaphore(compiled.batches[wait].queue)?,
                        value: batch_values[wait],
                        stage: GfxPipelineStage::ALL_COMMANDS,
                    })
                })
                .collect_vec();
            let value = self.timelines.next_value(batch.queue);
            let signals = self
                .timelines
                .semaphore(batch.queue)
                .map(|semaphore| GfxSemaphoreSignal {
                    semaphore,
                    value,
                    stage: GfxPipelineStage::ALL_COMMANDS,
                })
                .into_iter()
                .collect_vec();

            backend.submit(batch.queue, vec![cmd], &waits, &signals).map_err(|source| {
                let batch = batch_name(&frame_name, idx, batch);
                log::error!("submit '{batch}' failed: {source}");
                RenderGraphError::Submission { batch, source }
            })?;
            self.timelines.commit(batch.queue, slot, value);
            batch_values.push(value);

            // 已经提交的批次立即写回状态，后面的批次失败时重试的帧入口 barrier 才是正确的
            for &pass_idx in &batch.passes {
                for &(backing, state) in &compiled.exit_states[pass_idx] {
                    self.storage.set_backing_state(backing, slot, state);
                }
            }
        }

        let report = FrameReport {
            frame_id: self.storage.frame_counter().frame_id(),
            frame_label: slot,
            batch_count: compiled.batches.len(),
            dispatched_passes: compiled.batches.iter().map(|batch| batch.passes.len()).sum(),
            barrier_count,
        };

        self.storage.next_frame();
        self.state = RenderGraphState::Running;
        Ok(report)
    }

    /// 窗口尺寸改变
    ///
    /// 只重建 window size 资源，旧资源延迟销毁。尺寸为 0 时忽略。
    /// 返回是否重新创建了资源。
    ///
    /// 分配失败时 graph 回到 `Unbuilt`，下一次 resize 会重新 build。
    pub fn resize(&mut self, backend: &mut dyn GfxBackend, extent: Extent2D) -> Result<bool, RenderGraphError> {
        let _span = tracy_client::span!("RenderGraph::resize");

        if extent.is_empty() {
            log::debug!("ignore resize to empty extent {extent}");
            return Ok(false);
        }
        self.storage.set_frame_extent(extent);

        if self.state == RenderGraphState::Unbuilt {
            if self.passes.is_empty() {
                return Ok(false);
            }
            log::info!("render graph is unbuilt, rebuild on resize");
            self.build(backend)?;
            return Ok(true);
        }

        match self.storage.resize_window_resources(backend) {
            Ok(changed) => Ok(changed),
            Err(err) => {
                log::error!("resize failed: {err}");
                self.storage.retire_backings();
                self.compiled = None;
                self.state = RenderGraphState::Unbuilt;
                Err(err)
            }
        }
    }
}

fn batch_name(frame_name: &str, idx: usize, batch: &SubmitBatch) -> String {
    format!("{frame_name}batch{idx}-{}", batch.queue)
}

fn to_gfx_barrier(storage: &GraphStorage, desc: &BarrierDesc, slot: usize) -> Option<GfxBarrier> {
    let crt = storage.backing_slot(desc.backing, slot)?;
    Some(GfxBarrier::new(crt.handle, desc.before, desc.after))
}

/// 录制一个批次中的所有 Pass
fn record_batch(
    passes: &[PassNode],
    storage: &GraphStorage,
    compiled: &CompiledGraph,
    entry_barriers: &[Vec<GfxBarrier>],
    slot: usize,
    batch: &SubmitBatch,
    cmd: &mut dyn GfxCommandList,
) {
    for &pass_idx in &batch.passes {
        let node = &passes[pass_idx];
        let barriers = &compiled.barriers[pass_idx];

        cmd.begin_label(&node.name);

        let pre = entry_barriers[pass_idx]
            .iter()
            .copied()
            .chain(barriers.pre.iter().filter_map(|desc| to_gfx_barrier(storage, desc, slot)))
            .collect_vec();
        cmd.pipeline_barrier(&pre);

        let ctx = PassContext {
            storage,
            slot,
            pass_name: &node.name,
            render_targets: &node.resources.render_targets,
            depth_stencil: node.resources.depth_stencil.as_ref(),
        };
        node.pass.dispatch(&ctx, cmd);

        let post = barriers.post.iter().filter_map(|desc| to_gfx_barrier(storage, desc, slot)).collect_vec();
        cmd.pipeline_barrier(&post);

        cmd.end_label();
    }
}

// getters
impl RenderGraph {
    #[inline]
    pub fn state(&self) -> RenderGraphState {
        self.state
    }

    #[inline]
    pub fn storage(&self) -> &GraphStorage {
        &self.storage
    }

    #[inline]
    pub fn storage_mut(&mut self) -> &mut GraphStorage {
        &mut self.storage
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_index(&self, name: &str) -> Option<usize> {
        self.passes.iter().position(|pass| pass.name == name)
    }

    /// 执行顺序中的 Pass 名称，包括不会被执行的 Pass
    pub fn execution_order(&self) -> Vec<&str> {
        self.compiled
            .as_ref()
            .map(|compiled| compiled.order.iter().map(|&idx| self.passes[idx].name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn dependency_level(&self, name: &str) -> Option<usize> {
        let idx = self.pass_index(name)?;
        self.compiled.as_ref()?.levels.get(idx).copied()
    }

    #[inline]
    pub fn batches(&self) -> &[SubmitBatch] {
        self.compiled.as_ref().map_or(&[], |compiled| &compiled.batches)
    }

    /// 某个 Pass 在编译时计算出的 barriers
    pub fn pass_barriers(&self, name: &str) -> Option<&PassBarriers> {
        let idx = self.pass_index(name)?;
        self.compiled.as_ref()?.barriers.get(idx)
    }

    pub fn pass_name(&self, index: usize) -> &str {
        &self.passes[index].name
    }
}

// 调试方法
impl RenderGraph {
    /// 打印执行计划
    pub fn print_execution_plan(&self) {
        let Some(compiled) = &self.compiled else {
            log::warn!("RenderGraph is not built, nothing to print");
            return;
        };

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan                          ║");
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Execution Order: [{}]",
            self.passes.len(),
            compiled.order.iter().map(|&idx| self.passes[idx].name.as_str()).join(" → ")
        );
        log::info!(
            "║ Backings: {}  |  Batches: [{}]",
            self.storage.backing_count(),
            compiled
                .batches
                .iter()
                .enumerate()
                .map(|(idx, batch)| {
                    if batch.waits.is_empty() {
                        format!("#{idx} {}", batch.queue)
                    } else {
                        format!("#{idx} {} (wait {})", batch.queue, batch.waits.iter().map(|w| format!("#{w}")).join(","))
                    }
                })
                .join(", ")
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (order, &pass_idx) in compiled.order.iter().enumerate() {
            let pass = &self.passes[pass_idx];
            let barriers = &compiled.barriers[pass_idx];

            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!(
                "│ [{}/{}] Pass: \"{}\"  queue: {}  level: {}",
                order + 1,
                compiled.order.len(),
                pass.name,
                pass.queue,
                compiled.levels[pass_idx]
            );
            if !pass.is_dispatchable() {
                log::info!("│ (culled)");
            }
            log::info!("├─────────────────────────────────────────────────────────────────┤");

            for access in &compiled.accesses[pass_idx] {
                let icon = if access.writes { "✏️ " } else { "📖" };
                log::info!(
                    "│   {} \"{}\" @ {:?} (stage: {}, access: {})",
                    icon,
                    access.resource,
                    access.state.layout,
                    format_flags(access.state.stage),
                    format_flags(access.state.access)
                );
            }

            if barriers.has_barriers() {
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!("│ Barriers: {} pre, {} post", barriers.pre.len(), barriers.post.len());
                for (when, barrier) in
                    barriers.pre.iter().map(|b| ("pre", b)).chain(barriers.post.iter().map(|b| ("post", b)))
                {
                    let layout_change = if barrier.layout_changed() {
                        format!("{:?} → {:?}", barrier.before.layout, barrier.after.layout)
                    } else {
                        format!("{:?} (no layout change)", barrier.before.layout)
                    };
                    log::info!("│   🔒 [{when}] \"{}\":", barrier.resource);
                    log::info!("│       Layout: {layout_change}");
                    log::info!(
                        "│       Stage:  {} → {}",
                        format_flags(barrier.before.stage),
                        format_flags(barrier.after.stage)
                    );
                    log::info!(
                        "│       Access: {} → {}",
                        format_flags(barrier.before.access),
                        format_flags(barrier.after.access)
                    );
                }
            } else {
                log::info!("│ No barriers required");
            }

            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

fn format_flags<B>(flags: B) -> String
where
    B: bitflags::Flags,
    B::Bits: bitflags::parser::WriteHex,
{
    if flags.is_empty() {
        return "NONE".to_string();
    }
    let mut text = String::new();
    match bitflags::parser::to_writer(&flags, &mut text) {
        Ok(()) => text,
        Err(_) => "<invalid>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use kiln_render_interface::async_load::AsyncLoadHandle;
    use kiln_render_interface::camera_frame_data::CameraFrameData;
    use kiln_render_interface::frame_settings::{FrameSettings, GfxFormat};
    use kiln_render_interface::gfx_backend::QueueClass;
    use kiln_render_interface::gfx_error::GfxError;
    use kiln_render_interface::handles::GfxImageHandle;
    use kiln_render_interface::headless::{HeadlessBackend, RecordedCommand};
    use kiln_render_interface::resource_desc::{GfxImageDesc, GfxImageUsage};
    use kiln_render_interface::resource_state::GfxResourceState;

    use super::*;
    use crate::pass::{PassFlags, RenderPass};
    use crate::passes::{CopyToBackbufferPass, DEPTH_BUFFER, LIGHT_GRID, LambdaPass, LightCullPass, standard_passes};
    use crate::resolver::{ReadUsage, ResourceReadAccess, ResourceResolver, WriteUsage};
    use crate::resource_handle::ResourceFlags;
    use crate::resource_id::ResourceId;
    use crate::scene_context::DrawItem;

    const FIF: usize = 2;

    /// 4x4 RGBA8，每个 slot 64 字节
    fn color_desc() -> GfxImageDesc {
        GfxImageDesc::new_2d(Extent2D::new(4, 4), GfxFormat::Rgba8Unorm)
            .with_usage(GfxImageUsage::COLOR_ATTACHMENT | GfxImageUsage::SAMPLED | GfxImageUsage::STORAGE)
    }

    fn test_config() -> RenderGraphConfig {
        RenderGraphConfig {
            frames_in_flight: FIF,
            frame_settings: FrameSettings {
                frame_extent: Extent2D::new(8, 8),
                ..Default::default()
            },
        }
    }

    struct TestPass {
        name: &'static str,
        queue: QueueClass,
        flags: PassFlags,
        creates: Vec<(&'static str, ResourceFlags)>,
        writes: Vec<&'static str>,
        reads: Vec<&'static str>,
    }

    impl TestPass {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                queue: QueueClass::Graphics,
                flags: PassFlags::empty(),
                creates: Vec::new(),
                writes: Vec::new(),
                reads: Vec::new(),
            }
        }

        fn on(mut self, queue: QueueClass) -> Self {
            self.queue = queue;
            self
        }

        fn culled(mut self) -> Self {
            self.flags |= PassFlags::CULL;
            self
        }

        fn creates(mut self, resource: &'static str) -> Self {
            self.creates.push((resource, ResourceFlags::empty()));
            self
        }

        fn creates_aliasable(mut self, resource: &'static str) -> Self {
            self.creates.push((resource, ResourceFlags::ALIASABLE));
            self
        }

        fn writes(mut self, resource: &'static str) -> Self {
            self.writes.push(resource);
            self
        }

        fn reads(mut self, resource: &'static str) -> Self {
            self.reads.push(resource);
            self
        }
    }

    impl RenderPass for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn queue_class(&self) -> QueueClass {
            self.queue
        }

        fn flags(&self) -> PassFlags {
            self.flags
        }

        fn resolve(&mut self, resolver: &mut ResourceResolver) {
            let compute = self.queue == QueueClass::Compute;
            for &(resource, flags) in &self.creates {
                resolver.create_texture(ResourceId::new(resource), color_desc(), flags);
            }
            for &resource in &self.reads {
                let access = if compute { ResourceReadAccess::NonPixelShader } else { ResourceReadAccess::PixelShader };
                resolver.read_resource(ResourceId::new(resource).create_view(self.name), access, ReadUsage::ShaderResource);
            }
            for &resource in &self.writes {
                let usage = if compute { WriteUsage::UnorderedAccess } else { WriteUsage::RenderTarget };
                resolver.write_resource(ResourceId::new(resource).create_view(self.name), usage);
            }
        }

        fn dispatch(&self, _ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
            match self.queue {
                QueueClass::Compute => cmd.dispatch(1, 1, 1),
                _ => cmd.draw(3, 1),
            }
        }
    }

    fn build_graph(backend: &mut HeadlessBackend, passes: Vec<TestPass>) -> RenderGraph {
        let mut graph = RenderGraph::new(test_config());
        let mut builder = graph.reset();
        for pass in passes {
            builder.add_pass(pass);
        }
        builder.build(backend).unwrap();
        graph
    }

    fn backbuffer_desc() -> GfxImageDesc {
        GfxImageDesc::new_2d(Extent2D::new(8, 8), GfxFormat::Rgba8Srgb).with_usage(GfxImageUsage::TRANSFER_DST)
    }

    fn standard_graph(backend: &mut HeadlessBackend) -> (RenderGraph, GfxImageHandle) {
        let backbuffer = backend.create_image(&backbuffer_desc(), GfxResourceState::UNDEFINED, "swapchain-0").unwrap();

        let mut graph = RenderGraph::new(test_config());
        let mut builder = graph.reset();
        for pass in standard_passes(backbuffer, backbuffer_desc(), GfxResourceState::UNDEFINED) {
            builder.add_boxed_pass(pass);
        }
        builder.build(backend).unwrap();
        graph.storage_mut().scene_mut().add_draw(DrawItem {
            name: "cube".to_string(),
            index_count: 36,
            instance_count: 1,
        });
        (graph, backbuffer)
    }

    fn labels(backend: &HeadlessBackend) -> Vec<String> {
        backend.submissions().iter().flat_map(|s| s.labels()).map(str::to_string).collect()
    }

    #[test]
    fn test_dependency_order_and_barriers() {
        kiln_crate_tools::init_log::init_log_for_test();
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates("A").writes("A"),
                TestPass::new("P2").creates("B").reads("A").writes("B"),
                TestPass::new("P3").reads("B"),
            ],
        );

        assert_eq!(graph.state(), RenderGraphState::Built);
        assert_eq!(graph.execution_order(), vec!["P1", "P2", "P3"]);
        assert!(!graph.pass_barriers("P1").unwrap().has_barriers());
        assert_eq!(graph.pass_barriers("P2").unwrap().pre.len(), 1);
        assert_eq!(graph.pass_barriers("P3").unwrap().pre.len(), 1);
        assert_eq!(graph.batches().len(), 1);
        graph.print_execution_plan();

        let report = graph.run(&mut backend).unwrap();
        assert_eq!(report.barrier_count, 2);
        assert_eq!(report.dispatched_passes, 3);
        assert_eq!(graph.state(), RenderGraphState::Running);
        assert_eq!(labels(&backend), vec!["P1", "P2", "P3"]);

        // 回到 slot 0 时，资源停留在上一帧的读状态，需要帧入口转换
        graph.run(&mut backend).unwrap();
        let report = graph.run(&mut backend).unwrap();
        assert_eq!(report.frame_label, 0);
        assert_eq!(report.barrier_count, 4);
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());

        graph.destroy(&mut backend);
    }

    #[test]
    fn test_write_after_write_gets_one_barrier() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![TestPass::new("P1").creates("A").writes("A"), TestPass::new("P2").writes("A")],
        );

        assert_eq!(graph.execution_order(), vec!["P1", "P2"]);
        let barriers = graph.pass_barriers("P2").unwrap();
        assert_eq!(barriers.pre.len(), 1);
        assert_eq!(barriers.pre[0].before, GfxResourceState::COLOR_ATTACHMENT_WRITE);
        assert_eq!(graph.dependency_level("P2"), Some(1));

        graph.run(&mut backend).unwrap();
        assert!(backend.validation_errors().is_empty());
        graph.destroy(&mut backend);
    }

    #[test]
    #[should_panic(expected = "Pass 'P1' reads resource 'A' before any earlier pass writes it")]
    fn test_read_before_write_panics() {
        let mut backend = HeadlessBackend::new();
        build_graph(
            &mut backend,
            vec![TestPass::new("P0").creates("A"), TestPass::new("P1").reads("A"), TestPass::new("P2").writes("A")],
        );
    }

    #[test]
    #[should_panic(expected = "conflicting layouts")]
    fn test_conflicting_layouts_in_one_pass_panics() {
        let mut backend = HeadlessBackend::new();
        build_graph(
            &mut backend,
            vec![TestPass::new("P1").creates("A").writes("A"), TestPass::new("P2").reads("A").writes("A")],
        );
    }

    #[test]
    fn test_independent_passes_keep_declaration_order() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates("A").writes("A"),
                TestPass::new("P2").creates("B").writes("B"),
                TestPass::new("P3").reads("A"),
                TestPass::new("P4").writes("A"),
            ],
        );

        assert_eq!(graph.execution_order(), vec!["P1", "P2", "P3", "P4"]);
        assert_eq!(graph.dependency_level("P1"), Some(0));
        assert_eq!(graph.dependency_level("P2"), Some(0));
        assert_eq!(graph.dependency_level("P3"), Some(1));
        // 读后写
        assert_eq!(graph.dependency_level("P4"), Some(2));
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_culled_pass_is_not_dispatched() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates("A").writes("A"),
                TestPass::new("P2").reads("A").culled(),
                TestPass::new("P3").reads("A"),
                TestPass::new("P4").reads("A").on(QueueClass::Unknown),
            ],
        );

        assert_eq!(graph.execution_order(), vec!["P1", "P2", "P3", "P4"]);
        let report = graph.run(&mut backend).unwrap();
        assert_eq!(report.dispatched_passes, 2);
        assert_eq!(labels(&backend), vec!["P1", "P3"]);
        assert!(backend.validation_errors().is_empty());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_aliasable_resources_share_backing() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates_aliasable("A").writes("A"),
                TestPass::new("P2").creates("C").reads("A").writes("C"),
                TestPass::new("P3").creates_aliasable("B").reads("C").writes("B"),
                TestPass::new("P4").reads("B"),
            ],
        );

        let storage = graph.storage();
        let backing_a = storage.resource(&ResourceId::new("A")).unwrap().backing();
        let backing_b = storage.resource(&ResourceId::new("B")).unwrap().backing();
        assert!(backing_a.is_some());
        assert_eq!(backing_a, backing_b);
        assert_eq!(storage.backing_count(), 2);
        assert_eq!(backend.live_image_count(), 2 * FIF);

        for _ in 0..4 {
            graph.run(&mut backend).unwrap();
        }
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_aliased_backing_syncs_across_queues() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").on(QueueClass::Compute).creates_aliasable("A").writes("A"),
                TestPass::new("P2").creates_aliasable("B").writes("B"),
            ],
        );

        // 两个 Pass 之间没有依赖，但共用同一份显存
        assert_eq!(graph.storage().backing_count(), 1);
        assert_eq!(graph.dependency_level("P2"), Some(0));
        let batches = graph.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].queue, QueueClass::Compute);
        assert_eq!(batches[1].waits, vec![0]);
        assert_eq!(graph.pass_barriers("P2").unwrap().pre.len(), 1);

        for _ in 0..3 {
            graph.run(&mut backend).unwrap();
        }
        let submissions = backend.submissions();
        assert_eq!(submissions[1].waits.len(), 1);
        assert_eq!(submissions[1].waits[0].value, submissions[0].signals[0].value);
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_overlapping_aliasable_resources_do_not_share() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates_aliasable("A").writes("A"),
                TestPass::new("P2").creates_aliasable("B").reads("A").writes("B"),
                TestPass::new("P3").reads("B"),
            ],
        );

        assert_eq!(graph.storage().backing_count(), 2);
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_standard_passes_export_present() {
        kiln_crate_tools::init_log::init_log_for_test();
        let mut backend = HeadlessBackend::new();
        let (mut graph, backbuffer) = standard_graph(&mut backend);
        graph.print_execution_plan();

        assert_eq!(
            graph.execution_order(),
            vec!["DepthPrepass", "LightCullPass", "LightingPass", "PostProcessPass", "CopyToBackbufferPass"]
        );

        let post = &graph.pass_barriers(CopyToBackbufferPass::NAME).unwrap().post;
        assert_eq!(post.len(), 1);
        assert_eq!(post[0].after, GfxResourceState::PRESENT);

        // graphics -> compute -> graphics
        let batches = graph.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].queue, QueueClass::Compute);
        assert_eq!(batches[1].waits, vec![0]);
        assert_eq!(batches[2].waits, vec![1]);

        for _ in 0..5 {
            graph.run(&mut backend).unwrap();
        }
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());
        assert_eq!(backend.resource_state(backbuffer.into()), Some(GfxResourceState::PRESENT));

        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 15);
        assert_eq!(submissions[1].waits.len(), 1);
        assert_eq!(submissions[1].waits[0].value, submissions[0].signals[0].value);
        assert!(submissions[0].commands().any(|cmd| matches!(cmd, RecordedCommand::DrawIndexed { index_count: 36, .. })));

        graph.destroy(&mut backend);
        backend.destroy_image(backbuffer);
        assert_eq!(backend.live_image_count(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_semaphore_count(), 0);
    }

    #[test]
    fn test_cross_queue_semaphore_waits() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates("A").writes("A"),
                TestPass::new("P2").on(QueueClass::Compute).creates("B").reads("A").writes("B"),
                TestPass::new("P3").reads("B"),
            ],
        );

        assert_eq!(graph.batches().len(), 3);
        graph.run(&mut backend).unwrap();
        graph.run(&mut backend).unwrap();

        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 6);
        assert_eq!(submissions[1].queue, QueueClass::Compute);
        assert_eq!(submissions[1].waits[0].semaphore, submissions[0].signals[0].semaphore);
        assert_eq!(submissions[2].waits[0].value, submissions[1].signals[0].value);
        // 第二帧 graphics timeline 继续增长
        assert_eq!(submissions[3].signals[0].value, 3);
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_resize_recreates_window_resources() {
        let mut backend = HeadlessBackend::new();
        let (mut graph, backbuffer) = standard_graph(&mut backend);

        // 3 个 window size texture，外加 backbuffer；light grid 是 window size buffer
        let window_images = 3 * FIF;
        let window_buffers = FIF;
        assert_eq!(backend.live_image_count(), window_images + 1);
        let buffers = backend.live_buffer_count();

        assert!(graph.resize(&mut backend, Extent2D::new(16, 16)).unwrap());
        assert_eq!(graph.storage().pending_destroy_count(), window_images + window_buffers);
        assert_eq!(backend.live_image_count(), 2 * window_images + 1);
        assert_eq!(backend.live_buffer_count(), buffers + window_buffers);

        // 尺寸相同时什么都不做
        assert!(!graph.resize(&mut backend, Extent2D::new(16, 16)).unwrap());
        assert!(!graph.resize(&mut backend, Extent2D::new(0, 0)).unwrap());
        assert_eq!(backend.live_image_count(), 2 * window_images + 1);
        assert_eq!(graph.storage().output_size(), Extent2D::new(16, 16));

        let depth = graph.storage().image(&ResourceId::new(DEPTH_BUFFER).create_view("query")).unwrap();
        assert_eq!(backend.image(depth).unwrap().desc.extent, Extent2D::new(16, 16));

        // FIF 帧之后旧资源才被销毁
        for _ in 0..=FIF {
            graph.run(&mut backend).unwrap();
        }
        assert_eq!(graph.storage().pending_destroy_count(), 0);
        assert_eq!(backend.live_image_count(), window_images + 1);
        assert_eq!(backend.live_buffer_count(), buffers);
        assert_eq!(graph.state(), RenderGraphState::Running);
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());

        graph.destroy(&mut backend);
        backend.destroy_image(backbuffer);
    }

    #[test]
    fn test_resize_recreates_light_grid() {
        let mut backend = HeadlessBackend::new();
        let (mut graph, backbuffer) = standard_graph(&mut backend);
        let light_grid = ResourceId::new(LIGHT_GRID).create_view("query");

        assert!(graph.resize(&mut backend, Extent2D::new(64, 64)).unwrap());
        let buffer = graph.storage().buffer(&light_grid).unwrap();
        assert_eq!(backend.buffer(buffer).unwrap().desc.size, LightCullPass::light_grid_size((4, 4)));

        backend.take_submissions();
        graph.run(&mut backend).unwrap();
        let dispatches = backend
            .submissions()
            .iter()
            .filter(|submission| submission.queue == QueueClass::Compute)
            .flat_map(|submission| submission.commands())
            .filter(|cmd| matches!(cmd, RecordedCommand::Dispatch { .. }))
            .cloned()
            .collect_vec();
        assert_eq!(
            dispatches,
            vec![RecordedCommand::Dispatch {
                group_x: 4,
                group_y: 4,
                group_z: 1
            }]
        );
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());

        graph.destroy(&mut backend);
        backend.destroy_image(backbuffer);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn test_fixed_output_image_size() {
        let mut backend = HeadlessBackend::new();
        let (mut graph, backbuffer) = standard_graph(&mut backend);

        graph.storage_mut().set_output_image_size(Some(Extent2D::new(4, 4)));
        assert!(graph.resize(&mut backend, Extent2D::new(32, 32)).unwrap());
        let depth = graph.storage().image(&ResourceId::new(DEPTH_BUFFER).create_view("query")).unwrap();
        assert_eq!(backend.image(depth).unwrap().desc.extent, Extent2D::new(4, 4));

        // 输出尺寸固定，窗口再变化不需要重建
        assert!(!graph.resize(&mut backend, Extent2D::new(64, 64)).unwrap());

        graph.destroy(&mut backend);
        backend.destroy_image(backbuffer);
    }

    #[test]
    fn test_allocation_failure_keeps_graph_unbuilt() {
        let budget = CameraFrameData::SIZE * FIF as u64 + 64 * FIF as u64 + 16;
        let mut backend = HeadlessBackend::new().with_memory_budget(budget);

        let mut graph = RenderGraph::new(test_config());
        let mut builder = graph.reset();
        builder.add_pass(TestPass::new("P1").creates("A").writes("A"));
        builder.add_pass(TestPass::new("P2").creates("B").reads("A").writes("B"));
        let err = builder.build(&mut backend).unwrap_err();

        assert!(matches!(err, RenderGraphError::ResourceAllocation { ref resource, .. } if resource == "B"));
        assert_eq!(graph.state(), RenderGraphState::Unbuilt);
        assert!(matches!(graph.run(&mut backend), Err(RenderGraphError::NotBuilt)));
        assert_eq!(backend.live_image_count(), 0);

        // 下一次 resize 时重试
        backend.set_memory_budget(None);
        assert!(graph.resize(&mut backend, Extent2D::new(8, 8)).unwrap());
        assert_eq!(graph.state(), RenderGraphState::Built);
        graph.run(&mut backend).unwrap();
        assert!(backend.validation_errors().is_empty());

        graph.destroy(&mut backend);
    }

    #[test]
    fn test_submission_failure_does_not_advance_frame() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(&mut backend, vec![TestPass::new("P1").creates("A").writes("A")]);

        backend.fail_next_submit(GfxError::DeviceLost);
        let err = graph.run(&mut backend).unwrap_err();
        assert!(matches!(err, RenderGraphError::Submission { source: GfxError::DeviceLost, .. }));
        assert_eq!(graph.storage().frame_counter().frame_id(), 0);

        let report = graph.run(&mut backend).unwrap();
        assert_eq!(report.frame_id, 0);
        assert_eq!(graph.storage().frame_counter().frame_id(), 1);
        assert!(backend.validation_errors().is_empty());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_partial_submission_keeps_states_consistent() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![
                TestPass::new("P1").creates("A").writes("A"),
                TestPass::new("P2").reads("A"),
                TestPass::new("P3").on(QueueClass::Compute).creates("B").writes("B"),
            ],
        );
        assert_eq!(graph.batches().len(), 2);

        // graphics 批次已经执行，compute 批次提交失败
        backend.fail_submit_after(1, GfxError::DeviceLost);
        let err = graph.run(&mut backend).unwrap_err();
        assert!(matches!(err, RenderGraphError::Submission { ref batch, source: GfxError::DeviceLost } if batch.contains("batch1")));
        assert_eq!(graph.storage().frame_counter().frame_id(), 0);

        let a = ResourceId::new("A");
        let image = graph.storage().image(&a.create_view("query")).unwrap();
        assert_eq!(graph.storage().resource_state(&a), backend.resource_state(image.into()));

        let report = graph.run(&mut backend).unwrap();
        assert_eq!(report.frame_id, 0);
        for _ in 0..3 {
            graph.run(&mut backend).unwrap();
        }
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_run_unbuilt_graph() {
        let mut backend = HeadlessBackend::new();
        let mut graph = RenderGraph::new(test_config());
        assert!(matches!(graph.run(&mut backend), Err(RenderGraphError::NotBuilt)));

        let mut builder = graph.reset();
        builder.add_pass(TestPass::new("P1").creates("A").writes("A"));
        assert_eq!(builder.pass_count(), 1);
        drop(builder);
        assert!(matches!(graph.run(&mut backend), Err(RenderGraphError::NotBuilt)));
        assert!(backend.submissions().is_empty());
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_async_dependency() {
        let mut backend = HeadlessBackend::new();
        let mesh = AsyncLoadHandle::new("sponza.gltf");

        let mut graph = RenderGraph::new(test_config());
        let dependency = mesh.clone();
        graph.reset().add_pass(LambdaPass::new(
            "Geometry",
            move |resolver: &mut ResourceResolver| {
                resolver.require_loaded(&dependency);
                let target = ResourceId::new("GBuffer");
                resolver.create_texture(target.clone(), color_desc(), ResourceFlags::empty());
                resolver.write_resource(target.create_view("geometry"), WriteUsage::RenderTarget);
            },
            |_ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList| cmd.draw(3, 1),
        ));

        let err = graph.build(&mut backend).unwrap_err();
        assert!(matches!(err, RenderGraphError::DependencyPending { ref pass, .. } if pass == "Geometry"));
        assert_eq!(backend.live_image_count(), 0);

        mesh.set_status(LoadStatus::Failed);
        assert!(matches!(graph.build(&mut backend), Err(RenderGraphError::DependencyFailed { .. })));

        mesh.set_status(LoadStatus::Ready);
        graph.build(&mut backend).unwrap();
        graph.run(&mut backend).unwrap();
        assert_eq!(labels(&backend), vec!["Geometry"]);
        graph.destroy(&mut backend);
    }

    #[test]
    fn test_rebind_import() {
        let mut backend = HeadlessBackend::new();
        let (mut graph, backbuffer) = standard_graph(&mut backend);
        let second = backend.create_image(&backbuffer_desc(), GfxResourceState::UNDEFINED, "swapchain-1").unwrap();

        graph.run(&mut backend).unwrap();
        graph.storage_mut().rebind_import(&CopyToBackbufferPass::backbuffer_id(), second, GfxResourceState::UNDEFINED);
        graph.run(&mut backend).unwrap();

        let last = backend.submissions().last().unwrap();
        assert!(last.commands().any(|cmd| matches!(cmd, RecordedCommand::CopyImage { dst, .. } if *dst == second)));
        assert_eq!(backend.resource_state(second.into()), Some(GfxResourceState::PRESENT));
        assert!(backend.validation_errors().is_empty(), "{:?}", backend.validation_errors());

        graph.destroy(&mut backend);
        backend.destroy_image(backbuffer);
        backend.destroy_image(second);
    }

    #[test]
    fn test_reset_retires_old_resources() {
        let mut backend = HeadlessBackend::new();
        let mut graph = build_graph(
            &mut backend,
            vec![TestPass::new("P1").creates("A").writes("A"), TestPass::new("P2").reads("A")],
        );
        graph.run(&mut backend).unwrap();

        let mut builder = graph.reset();
        builder.add_pass(TestPass::new("Q1").creates("X").writes("X"));
        builder.build(&mut backend).unwrap();

        assert_eq!(graph.pass_count(), 1);
        assert_eq!(graph.storage().pending_destroy_count(), FIF);
        assert!(!graph.storage().contains_resource(&ResourceId::new("A")));

        for _ in 0..=FIF {
            graph.run(&mut backend).unwrap();
        }
        assert_eq!(graph.storage().pending_destroy_count(), 0);
        assert_eq!(backend.live_image_count(), FIF);
        graph.destroy(&mut backend);
    }
}
