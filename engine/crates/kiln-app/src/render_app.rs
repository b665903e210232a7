use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use kiln_crate_tools::init_log::init_log;
use kiln_pipeline::phase_builder::PipelineBuilder;
use kiln_pipeline::pipeline::Pipeline;
use kiln_render_graph::graph::FrameReport;
use kiln_render_graph::scene_context::SceneContext;
use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::GfxBackend;

use crate::camera_view::CameraView;
use crate::config::EngineConfig;
use crate::resize_signal::{ResizeReceiver, ResizeSender, resize_channel};

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

/// 渲染统计
#[derive(Clone, Debug, Default)]
pub struct RenderStats {
    pub ticks: u64,
    /// 所有相机都成功提交的帧
    pub rendered_frames: u64,
    /// 至少一个相机失败、被跳过的帧
    pub failed_frames: u64,
    pub failed_resizes: u64,
    /// 上一帧每个相机的执行结果，失败的相机为 None
    pub last_reports: Vec<Option<FrameReport>>,
}

/// Phase 回调共享的渲染状态
pub struct RenderContext {
    backend: Box<dyn GfxBackend + Send>,
    cameras: Vec<CameraView>,
    scene: SceneContext,

    resize_receiver: ResizeReceiver,
    pending_resize: Option<Extent2D>,

    start_time: Instant,
    last_time: Instant,
    time: f32,
    delta_time: f32,

    stats: RenderStats,
}

// new & init
impl RenderContext {
    fn new(
        config: &EngineConfig,
        mut backend: Box<dyn GfxBackend + Send>,
        resize_receiver: ResizeReceiver,
    ) -> anyhow::Result<Self> {
        let mut cameras: Vec<CameraView> = Vec::with_capacity(config.cameras.len());
        for camera in &config.cameras {
            match CameraView::new(camera, config.render_graph_config(), backend.as_mut()) {
                Ok(view) => {
                    if config.print_execution_plan {
                        view.graph().print_execution_plan();
                    }
                    cameras.push(view);
                }
                Err(err) => {
                    for view in &mut cameras {
                        view.destroy(backend.as_mut());
                    }
                    return Err(err);
                }
            }
        }

        let now = Instant::now();
        Ok(Self {
            backend,
            cameras,
            scene: SceneContext::default(),
            resize_receiver,
            pending_resize: None,
            start_time: now,
            last_time: now,
            time: 0.0,
            delta_time: 0.0,
            stats: RenderStats::default(),
        })
    }
}

// destroy
impl RenderContext {
    fn destroy(&mut self) {
        let _span = tracy_client::span!("RenderContext::destroy");
        if let Err(err) = self.backend.wait_idle() {
            log::error!("wait idle failed before destroying cameras: {err}");
        }
        for view in &mut self.cameras {
            view.destroy(self.backend.as_mut());
        }
        self.cameras.clear();
    }
}

// getters
impl RenderContext {
    #[inline]
    pub fn cameras(&self) -> &[CameraView] {
        &self.cameras
    }

    pub fn camera(&self, name: &str) -> Option<&CameraView> {
        self.cameras.iter().find(|view| view.name() == name)
    }

    #[inline]
    pub fn scene_mut(&mut self) -> &mut SceneContext {
        &mut self.scene
    }

    #[inline]
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    #[inline]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

// update
impl RenderContext {
    fn poll_input(&mut self) {
        if let Some(extent) = self.resize_receiver.latest() {
            log::debug!("resize requested: {extent}");
            self.pending_resize = Some(extent);
        }
    }

    fn update_time(&mut self) {
        let now = Instant::now();
        self.delta_time = (now - self.last_time).as_secs_f32();
        self.time = (now - self.start_time).as_secs_f32();
        self.last_time = now;

        for view in &mut self.cameras {
            view.update(self.time, self.delta_time, &self.scene);
        }
    }

    fn apply_resize(&mut self) {
        let Some(extent) = self.pending_resize.take() else {
            return;
        };
        for view in &mut self.cameras {
            match view.resize(self.backend.as_mut(), extent) {
                Ok(true) => log::info!("camera '{}' resized to {extent}", view.name()),
                Ok(false) => {}
                Err(err) => {
                    self.stats.failed_resizes += 1;
                    log::error!("{err:#}");
                }
            }
        }
    }

    fn render(&mut self) {
        let _span = tracy_client::span!("RenderContext::render");

        self.stats.ticks += 1;
        let mut all_succeeded = true;
        let mut reports = Vec::with_capacity(self.cameras.len());
        for view in &mut self.cameras {
            match view.render(self.backend.as_mut()) {
                Ok(report) => reports.push(Some(report)),
                Err(err) => {
                    log::error!("skip frame: {err:#}");
                    all_succeeded = false;
                    reports.push(None);
                }
            }
        }

        if all_succeeded {
            self.stats.rendered_frames += 1;
        } else {
            self.stats.failed_frames += 1;
        }
        self.stats.last_reports = reports;
    }
}

/// 引擎入口
///
/// 每次 [`RenderApp::tick`] 依次执行 `Input -> Update -> PostUpdate -> Render`，
/// 用户可以通过 [`RenderApp::pipeline`] 在这些 Phase 上挂载自己的回调。
pub struct RenderApp {
    pipeline: Pipeline,
    context: Arc<Mutex<RenderContext>>,
    resize_sender: ResizeSender,
}

// new & init
impl RenderApp {
    pub const INPUT_PHASE: &'static str = "Input";
    pub const UPDATE_PHASE: &'static str = "Update";
    pub const POST_UPDATE_PHASE: &'static str = "PostUpdate";
    pub const RENDER_PHASE: &'static str = "Render";

    pub fn new(config: &EngineConfig, backend: Box<dyn GfxBackend + Send>) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("RenderApp::new");

        let (resize_sender, resize_receiver) = resize_channel();
        let context = Arc::new(Mutex::new(RenderContext::new(config, backend, resize_receiver)?));

        let mut builder = PipelineBuilder::new();
        builder
            .new_phase(Self::INPUT_PHASE)
            .then(Self::UPDATE_PHASE)
            .then(Self::POST_UPDATE_PHASE)
            .then(Self::RENDER_PHASE);
        let mut pipeline = Pipeline::new(builder, config.pipeline_config());
        // 渲染只在调用 tick 的线程上执行
        pipeline.set_phase_parallelize(Self::RENDER_PHASE, false);

        Self::attach_phase(&pipeline, Self::INPUT_PHASE, &context, RenderContext::poll_input);
        Self::attach_phase(&pipeline, Self::UPDATE_PHASE, &context, RenderContext::update_time);
        Self::attach_phase(&pipeline, Self::POST_UPDATE_PHASE, &context, RenderContext::apply_resize);
        Self::attach_phase(&pipeline, Self::RENDER_PHASE, &context, RenderContext::render);

        log::info!("render app created: {} cameras, phases {:?}", config.cameras.len(), pipeline.levels());

        Ok(Self {
            pipeline,
            context,
            resize_sender,
        })
    }

    fn attach_phase(
        pipeline: &Pipeline,
        phase: &str,
        context: &Arc<Mutex<RenderContext>>,
        func: fn(&mut RenderContext),
    ) {
        let context = Arc::clone(context);
        pipeline.attach(phase, move || {
            let mut context = context.lock().unwrap_or_else(PoisonError::into_inner);
            func(&mut context);
        });
    }

    pub fn init_env() {
        std::panic::set_hook(Box::new(panic_handler));

        init_log();

        tracy_client::Client::start();
        tracy_client::set_thread_name!("RenderThread");
    }
}

// destroy
impl RenderApp {
    pub fn destroy(self) {
        self.context().destroy();
        log::info!("render app destroyed");
    }
}

// update
impl RenderApp {
    pub fn tick(&mut self) {
        let _span = tracy_client::span!("RenderApp::tick");
        self.pipeline.tick();

        if let Some(client) = tracy_client::Client::running() {
            client.frame_mark();
        }
    }
}

// getters
impl RenderApp {
    #[inline]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[inline]
    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// 可以发送到窗口线程
    #[inline]
    pub fn resize_sender(&self) -> ResizeSender {
        self.resize_sender.clone()
    }

    /// 不能在 Phase 回调中调用，回调执行时已经持有这个锁
    pub fn context(&self) -> MutexGuard<'_, RenderContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> RenderStats {
        self.context().stats().clone()
    }
}
