use anyhow::Context;
use glam::{Mat4, Quat, Vec3};

use kiln_render_graph::config::RenderGraphConfig;
use kiln_render_graph::graph::{FrameReport, RenderGraph};
use kiln_render_graph::passes::{CopyToBackbufferPass, standard_passes};
use kiln_render_graph::scene_context::SceneContext;
use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::GfxBackend;
use kiln_render_interface::handles::GfxImageHandle;
use kiln_render_interface::resource_desc::{GfxImageDesc, GfxImageUsage};
use kiln_render_interface::resource_state::GfxResourceState;

use crate::config::CameraConfig;

/// 模拟 swapchain 中的一张图像
#[derive(Clone, Copy, Debug)]
struct Backbuffer {
    handle: GfxImageHandle,
    state: GfxResourceState,
}

/// 一个相机的渲染目标
///
/// 每个相机拥有独立的渲染图与 storage，backbuffer 的数量与 FIF 数量相同，
/// 每帧通过 rebind_import 把当前 slot 的 backbuffer 交给渲染图。
pub struct CameraView {
    config: CameraConfig,
    graph: RenderGraph,

    backbuffers: Vec<Backbuffer>,
    backbuffer_desc: GfxImageDesc,

    /// 绕 target 旋转的累计角度
    orbit_deg: f32,
}

// new & init
impl CameraView {
    pub fn new(
        config: &CameraConfig,
        graph_config: RenderGraphConfig,
        backend: &mut dyn GfxBackend,
    ) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("CameraView::new");

        let frame_settings = graph_config.frame_settings;
        let backbuffer_desc = GfxImageDesc::new_2d(frame_settings.frame_extent, frame_settings.color_format)
            .with_usage(GfxImageUsage::TRANSFER_DST);
        let backbuffers =
            Self::create_backbuffers(backend, &config.name, &backbuffer_desc, graph_config.frames_in_flight)?;

        let mut graph = RenderGraph::new(graph_config);
        let build_result = {
            let mut builder = graph.reset();
            builder.storage_mut().set_output_image_size(config.output_size);
            for pass in standard_passes(backbuffers[0].handle, backbuffer_desc, backbuffers[0].state) {
                builder.add_boxed_pass(pass);
            }
            builder.build(backend)
        };
        if let Err(err) = build_result {
            graph.destroy(backend);
            Self::destroy_backbuffers(backend, &backbuffers);
            return Err(err).with_context(|| format!("构建相机 '{}' 的渲染图失败", config.name));
        }

        log::info!("camera '{}' created, output size {}", config.name, graph.storage().output_size());

        Ok(Self {
            config: config.clone(),
            graph,
            backbuffers,
            backbuffer_desc,
            orbit_deg: 0.0,
        })
    }

    /// 创建失败时销毁已经创建的部分
    fn create_backbuffers(
        backend: &mut dyn GfxBackend,
        camera_name: &str,
        desc: &GfxImageDesc,
        count: usize,
    ) -> anyhow::Result<Vec<Backbuffer>> {
        let mut backbuffers = Vec::with_capacity(count);
        for idx in 0..count {
            let name = format!("{camera_name}-backbuffer-{idx}");
            match backend.create_image(desc, GfxResourceState::UNDEFINED, &name) {
                Ok(handle) => backbuffers.push(Backbuffer {
                    handle,
                    state: GfxResourceState::UNDEFINED,
                }),
                Err(err) => {
                    Self::destroy_backbuffers(backend, &backbuffers);
                    return Err(err).with_context(|| format!("创建 backbuffer '{name}' ({}) 失败", desc.extent));
                }
            }
        }
        Ok(backbuffers)
    }
}

// destroy
impl CameraView {
    fn destroy_backbuffers(backend: &mut dyn GfxBackend, backbuffers: &[Backbuffer]) {
        for backbuffer in backbuffers {
            backend.destroy_image(backbuffer.handle);
        }
    }

    pub fn destroy(&mut self, backend: &mut dyn GfxBackend) {
        self.graph.destroy(backend);
        Self::destroy_backbuffers(backend, &self.backbuffers);
        self.backbuffers.clear();
    }
}

impl Drop for CameraView {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && !std::thread::panicking() {
            assert!(self.backbuffers.is_empty(), "CameraView '{}' dropped without destroy()", self.config.name);
        }
    }
}

// getters
impl CameraView {
    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[inline]
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut RenderGraph {
        &mut self.graph
    }

    #[inline]
    pub fn backbuffer_extent(&self) -> Extent2D {
        self.backbuffer_desc.extent
    }

    /// 当前 slot 的 backbuffer 状态
    pub fn backbuffer_state(&self) -> GfxResourceState {
        self.backbuffers[self.graph.storage().current_slot()].state
    }

    /// 当前的相机位置，考虑了旋转
    pub fn eye_position(&self) -> Vec3 {
        let offset = self.config.position - self.config.target;
        self.config.target + Quat::from_rotation_y(self.orbit_deg.to_radians()) * offset
    }
}

// update
impl CameraView {
    /// 更新相机数据与场景，在 Update / PostUpdate Phase 中调用
    pub fn update(&mut self, time: f32, delta_time: f32, scene: &SceneContext) {
        self.orbit_deg = (self.orbit_deg + self.config.orbit_deg_per_sec * delta_time) % 360.0;

        let eye = self.eye_position();
        let output_size = self.graph.storage().output_size();
        let aspect = output_size.width.max(1) as f32 / output_size.height.max(1) as f32;
        let view = Mat4::look_at_rh(eye, self.config.target, Vec3::Y);
        let projection = Mat4::perspective_rh(self.config.fov_deg.to_radians(), aspect, 0.1, 1000.0);

        let storage = self.graph.storage_mut();
        let frame_data = storage.frame_data_mut();
        frame_data.set_camera(view, projection, eye);
        frame_data.time = time;
        frame_data.delta_time = delta_time;
        *storage.scene_mut() = scene.clone();
    }

    pub fn render(&mut self, backend: &mut dyn GfxBackend) -> anyhow::Result<FrameReport> {
        let slot = self.graph.storage().current_slot();
        let backbuffer = self.backbuffers[slot];
        self.graph.storage_mut().rebind_import(&CopyToBackbufferPass::backbuffer_id(), backbuffer.handle, backbuffer.state);

        let report = self.graph.run(backend).with_context(|| format!("相机 '{}' 渲染失败", self.config.name))?;
        self.backbuffers[slot].state = GfxResourceState::PRESENT;
        Ok(report)
    }

    /// 窗口尺寸变化：重新创建 backbuffer，然后重建渲染图中 window size 的资源
    ///
    /// backbuffer 创建失败时保留旧的 backbuffer，渲染图不做修改。
    pub fn resize(&mut self, backend: &mut dyn GfxBackend, extent: Extent2D) -> anyhow::Result<bool> {
        let _span = tracy_client::span!("CameraView::resize");

        if extent.is_empty() {
            return Ok(false);
        }

        if extent != self.backbuffer_desc.extent {
            backend.wait_idle().context("resize 之前等待 GPU 空闲失败")?;

            let mut desc = self.backbuffer_desc;
            desc.extent = extent;
            let backbuffers = Self::create_backbuffers(backend, &self.config.name, &desc, self.backbuffers.len())?;
            Self::destroy_backbuffers(backend, &self.backbuffers);
            self.backbuffers = backbuffers;
            self.backbuffer_desc = desc;
        }

        self.graph.resize(backend, extent).with_context(|| format!("相机 '{}' resize 失败", self.config.name))
    }
}
