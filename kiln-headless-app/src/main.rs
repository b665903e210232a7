mod args;

use clap::Parser;
use glam::Vec3;

use kiln_app::config::EngineConfig;
use kiln_app::render_app::RenderApp;
use kiln_render_graph::scene_context::{DrawItem, PointLight};
use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::headless::HeadlessBackend;

use crate::args::HeadlessArgs;

fn main() -> anyhow::Result<()> {
    let args = HeadlessArgs::parse();
    RenderApp::init_env();

    let frame_count = args.frames;
    let config_path = args.config_path();
    let config = EngineConfig::load(&config_path)?;
    let mut app = RenderApp::new(&config, Box::new(HeadlessBackend::new()))?;
    fill_scene(&app);

    // 模拟一次窗口拖拽
    let resize_sender = app.resize_sender();
    let window_extent = config.frame_settings.frame_extent;
    for frame in 0..frame_count {
        if frame == frame_count / 2 {
            resize_sender.notify(Extent2D::new(window_extent.width / 2, window_extent.height / 2));
        }
        app.tick();
    }

    let stats = app.stats();
    log::info!(
        "run {} frames: {} rendered, {} failed, {} failed resizes",
        stats.ticks,
        stats.rendered_frames,
        stats.failed_frames,
        stats.failed_resizes
    );
    for report in stats.last_reports.iter().flatten() {
        log::info!("last frame: {report:?}");
    }

    app.destroy();
    log::info!("end run.");
    Ok(())
}

fn fill_scene(app: &RenderApp) {
    let mut context = app.context();
    let scene = context.scene_mut();
    scene.add_draw(DrawItem {
        name: "floor".to_string(),
        index_count: 6,
        instance_count: 1,
    });
    scene.add_draw(DrawItem {
        name: "cube".to_string(),
        index_count: 36,
        instance_count: 16,
    });
    for i in 0..8 {
        let angle = i as f32 / 8.0 * std::f32::consts::TAU;
        scene.add_light(PointLight {
            position: Vec3::new(angle.cos() * 4.0, 2.0, angle.sin() * 4.0),
            radius: 6.0,
            color: Vec3::new(1.0, 0.9, 0.8),
            intensity: 2.0,
        });
    }
}
