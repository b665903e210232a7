//! Kiln app 层
//!
//! - [`config::EngineConfig`]: TOML 配置，文件不存在时使用默认值
//! - [`resize_signal`]: 窗口尺寸变化通过 crossbeam channel 传递给渲染线程
//! - [`render_app::RenderApp`]: `Input -> Update -> PostUpdate -> Render` 四个 Phase，
//!   Render Phase 中依次执行每个相机的渲染图

pub mod camera_view;
pub mod config;
pub mod render_app;
pub mod resize_signal;
