use slotmap::new_key_type;

new_key_type! {
    /// 后端 Image Handle
    pub struct GfxImageHandle;
    /// 后端 Buffer Handle
    pub struct GfxBufferHandle;
    /// 后端 Timeline Semaphore Handle
    pub struct GfxSemaphoreHandle;
}

/// 任意一种后端资源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxResourceHandle {
    Image(GfxImageHandle),
    Buffer(GfxBufferHandle),
}

impl GfxResourceHandle {
    #[inline]
    pub fn as_image(self) -> Option<GfxImageHandle> {
        match self {
            Self::Image(handle) => Some(handle),
            Self::Buffer(_) => None,
        }
    }

    #[inline]
    pub fn as_buffer(self) -> Option<GfxBufferHandle> {
        match self {
            Self::Buffer(handle) => Some(handle),
            Self::Image(_) => None,
        }
    }
}

impl From<GfxImageHandle> for GfxResourceHandle {
    #[inline]
    fn from(handle: GfxImageHandle) -> Self {
        Self::Image(handle)
    }
}

impl From<GfxBufferHandle> for GfxResourceHandle {
    #[inline]
    fn from(handle: GfxBufferHandle) -> Self {
        Self::Buffer(handle)
    }
}
