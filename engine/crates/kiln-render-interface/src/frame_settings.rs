use std::fmt::Display;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// 二维尺寸
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 宽或高为 0，例如窗口最小化
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Display for Extent2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 资源格式
///
/// 只保留调度层需要区分的格式，具体的图形 API 格式由后端映射。
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GfxFormat {
    #[default]
    Undefined,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Srgb,
    Rgba16Float,
    Rgba32Float,
    R32Uint,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

impl GfxFormat {
    /// 每个像素的字节数
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::Rgba8Unorm | Self::Rgba8Srgb | Self::Bgra8Srgb | Self::R32Uint => 4,
            Self::D32Float | Self::D24UnormS8Uint => 4,
            Self::D32FloatS8Uint => 8,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }
}

/// 渲染器默认配置
pub struct DefaultRendererSettings;
impl DefaultRendererSettings {
    /// shader 输出会被自动改变： liner -> sRGB
    pub const DEFAULT_SURFACE_FORMAT: GfxFormat = GfxFormat::Rgba8Srgb;
    pub const DEPTH_FORMAT_CANDIDATES: &'static [GfxFormat] =
        &[GfxFormat::D32FloatS8Uint, GfxFormat::D32Float, GfxFormat::D24UnormS8Uint];
    pub const DEFAULT_FRAME_EXTENT: Extent2D = Extent2D::new(1280, 720);
}

/// 帧级渲染配置
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSettings {
    pub color_format: GfxFormat,
    pub depth_format: GfxFormat,
    pub frame_extent: Extent2D,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            color_format: DefaultRendererSettings::DEFAULT_SURFACE_FORMAT,
            depth_format: DefaultRendererSettings::DEPTH_FORMAT_CANDIDATES[1],
            frame_extent: DefaultRendererSettings::DEFAULT_FRAME_EXTENT,
        }
    }
}

/// 帧标签（A/B/C/...）
///
/// 表示当前处于 Frames in Flight 的哪一帧。
/// 通过 `Deref` 转换为索引 0/1/2/...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameLabel(usize);

impl FrameLabel {
    /// 支持的最大 Frames in Flight 数量
    pub const MAX_COUNT: usize = 8;

    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        assert!(idx < Self::MAX_COUNT, "Invalid frame index: {idx}");
        Self(idx)
    }
}

impl Deref for FrameLabel {
    type Target = usize;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", (b'A' + self.0 as u8) as char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_label_display() {
        assert_eq!(FrameLabel::from_usize(0).to_string(), "A");
        assert_eq!(FrameLabel::from_usize(2).to_string(), "C");
        assert_eq!(*FrameLabel::from_usize(2), 2);
    }

    #[test]
    #[should_panic(expected = "Invalid frame index")]
    fn test_frame_label_out_of_range() {
        FrameLabel::from_usize(FrameLabel::MAX_COUNT);
    }

    #[test]
    fn test_format_queries() {
        assert!(GfxFormat::D32Float.is_depth());
        assert!(!GfxFormat::D32Float.has_stencil());
        assert!(GfxFormat::D24UnormS8Uint.has_stencil());
        assert_eq!(GfxFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert!(Extent2D::new(0, 10).is_empty());
    }
}
