//! GPU 的边界
//!
//! 调度层只通过这里的 trait 与图形后端交互，不依赖任何具体的图形 API：
//!
//! - [`gfx_backend::GfxBackend`] / [`gfx_backend::GfxCommandList`]: 资源创建销毁、按 queue 录制命令、barrier、提交与 timeline semaphore
//! - [`resource_state::GfxResourceState`]: stage / access / layout 三元组，barrier 的计算依据
//! - [`frame_counter::FrameCounter`] / [`frame_settings::FrameSettings`]: Frames in Flight 与帧级配置
//! - [`headless::HeadlessBackend`]: 在内存中执行命令的后端，带 barrier 校验，供测试与无窗口运行使用

pub mod async_load;
pub mod camera_frame_data;
pub mod frame_counter;
pub mod frame_settings;
pub mod gfx_backend;
pub mod gfx_error;
pub mod handles;
pub mod headless;
pub mod resource_desc;
pub mod resource_state;
