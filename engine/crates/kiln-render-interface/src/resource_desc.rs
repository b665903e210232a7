use bitflags::bitflags;

use crate::frame_settings::{Extent2D, GfxFormat};

bitflags! {
    /// Image 的用途，决定后端创建资源时的 usage
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GfxImageUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const COLOR_ATTACHMENT = 1 << 2;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
    }
}

bitflags! {
    /// Buffer 的用途
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GfxBufferUsage: u32 {
        const UNIFORM = 1 << 0;
        const STORAGE = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const INDIRECT = 1 << 4;
        const TRANSFER_SRC = 1 << 5;
        const TRANSFER_DST = 1 << 6;
        /// CPU 可写，用于每帧上传的数据
        const HOST_VISIBLE = 1 << 7;
    }
}

/// 2D Image 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxImageDesc {
    pub extent: Extent2D,
    pub format: GfxFormat,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: GfxImageUsage,
}

impl GfxImageDesc {
    pub fn new_2d(extent: Extent2D, format: GfxFormat) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            array_layers: 1,
            usage: GfxImageUsage::empty(),
        }
    }

    #[inline]
    pub fn with_usage(mut self, usage: GfxImageUsage) -> Self {
        self.usage |= usage;
        self
    }

    /// 粗略的显存占用（不计 mip 与对齐）
    #[inline]
    pub fn memory_size(&self) -> u64 {
        self.extent.pixel_count() * self.format.bytes_per_pixel() as u64 * self.array_layers.max(1) as u64
    }
}

/// Buffer 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxBufferDesc {
    pub size: u64,
    pub usage: GfxBufferUsage,
}

impl GfxBufferDesc {
    #[inline]
    pub fn new(size: u64, usage: GfxBufferUsage) -> Self {
        Self { size, usage }
    }
}

/// 任意一种资源的描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxResourceDesc {
    Image(GfxImageDesc),
    Buffer(GfxBufferDesc),
}

impl GfxResourceDesc {
    #[inline]
    pub fn memory_size(&self) -> u64 {
        match self {
            Self::Image(desc) => desc.memory_size(),
            Self::Buffer(desc) => desc.size,
        }
    }

    #[inline]
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    #[inline]
    pub fn as_image(&self) -> Option<&GfxImageDesc> {
        match self {
            Self::Image(desc) => Some(desc),
            Self::Buffer(_) => None,
        }
    }

    #[inline]
    pub fn as_image_mut(&mut self) -> Option<&mut GfxImageDesc> {
        match self {
            Self::Image(desc) => Some(desc),
            Self::Buffer(_) => None,
        }
    }

    #[inline]
    pub fn as_buffer(&self) -> Option<&GfxBufferDesc> {
        match self {
            Self::Buffer(desc) => Some(desc),
            Self::Image(_) => None,
        }
    }

    #[inline]
    pub fn as_buffer_mut(&mut self) -> Option<&mut GfxBufferDesc> {
        match self {
            Self::Buffer(desc) => Some(desc),
            Self::Image(_) => None,
        }
    }
}
