use kiln_render_interface::frame_counter::FrameCounter;
use kiln_render_interface::frame_settings::FrameSettings;

/// 渲染图的构造参数，构造后不可修改
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderGraphConfig {
    /// Frames in Flight 数量，storage 为每个 slot 保留一份资源
    pub frames_in_flight: usize,
    pub frame_settings: FrameSettings,
}

impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: FrameCounter::DEFAULT_FIF_COUNT,
            frame_settings: FrameSettings::default(),
        }
    }
}
