use bitflags::bitflags;
use indexmap::IndexSet;

use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::handles::GfxResourceHandle;
use kiln_render_interface::resource_desc::GfxResourceDesc;
use kiln_render_interface::resource_state::GfxResourceState;

use crate::resource_id::{ResourceId, ResourceViewId};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u8 {
        /// 外部导入，渲染图不负责创建与销毁
        const IMPORTED = 1 << 0;
        /// 尺寸跟随输出图像，resize 时重新创建
        const WINDOW_SIZE_DEPENDENT = 1 << 1;
        /// 可以与生命周期不重叠的其他资源共用同一份显存
        const ALIASABLE = 1 << 2;
    }
}

/// window size buffer 的大小，由输出尺寸计算
pub type BufferSizeFn = fn(Extent2D) -> u64;

/// 导入资源的物理句柄以及当前状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportInfo {
    pub handle: GfxResourceHandle,
    pub state: GfxResourceState,
}

/// 渲染图中声明的一个资源
#[derive(Debug)]
pub struct ResourceHandle {
    id: ResourceId,
    desc: GfxResourceDesc,
    flags: ResourceFlags,
    /// Pass 声明过的所有 view
    views: IndexSet<ResourceViewId>,
    import: Option<ImportInfo>,
    buffer_size: Option<BufferSizeFn>,
    /// 编译后分配的物理资源下标
    backing: Option<usize>,
}

// new & init
impl ResourceHandle {
    pub fn new(id: ResourceId, desc: GfxResourceDesc, flags: ResourceFlags) -> Self {
        debug_assert!(!flags.contains(ResourceFlags::IMPORTED), "Use ResourceHandle::imported for '{id}'");
        Self {
            id,
            desc,
            flags,
            views: IndexSet::new(),
            import: None,
            buffer_size: None,
            backing: None,
        }
    }

    /// 大小跟随输出尺寸的 buffer，不参与 alias
    pub fn window_buffer(id: ResourceId, desc: GfxResourceDesc, size: BufferSizeFn) -> Self {
        debug_assert!(desc.as_buffer().is_some(), "'{id}' is not a buffer");
        Self {
            id,
            desc,
            flags: ResourceFlags::WINDOW_SIZE_DEPENDENT,
            views: IndexSet::new(),
            import: None,
            buffer_size: Some(size),
            backing: None,
        }
    }

    pub fn imported(
        id: ResourceId,
        desc: GfxResourceDesc,
        handle: GfxResourceHandle,
        state: GfxResourceState,
    ) -> Self {
        Self {
            id,
            desc,
            flags: ResourceFlags::IMPORTED,
            views: IndexSet::new(),
            import: Some(ImportInfo { handle, state }),
            buffer_size: None,
            backing: None,
        }
    }
}

// getters
impl ResourceHandle {
    #[inline]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }
    #[inline]
    pub fn desc(&self) -> &GfxResourceDesc {
        &self.desc
    }
    #[inline]
    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }
    #[inline]
    pub fn is_imported(&self) -> bool {
        self.flags.contains(ResourceFlags::IMPORTED)
    }
    #[inline]
    pub fn is_window_size_dependent(&self) -> bool {
        self.flags.contains(ResourceFlags::WINDOW_SIZE_DEPENDENT)
    }
    #[inline]
    pub fn is_aliasable(&self) -> bool {
        self.flags.contains(ResourceFlags::ALIASABLE) && !self.is_imported()
    }
    #[inline]
    pub fn views(&self) -> impl Iterator<Item = &ResourceViewId> {
        self.views.iter()
    }
    #[inline]
    pub fn contains_view(&self, view: &ResourceViewId) -> bool {
        self.views.contains(view)
    }
    #[inline]
    pub fn import(&self) -> Option<&ImportInfo> {
        self.import.as_ref()
    }
    #[inline]
    pub fn buffer_size_fn(&self) -> Option<BufferSizeFn> {
        self.buffer_size
    }
    #[inline]
    pub fn backing(&self) -> Option<usize> {
        self.backing
    }
}

// update
impl ResourceHandle {
    #[inline]
    pub(crate) fn add_view(&mut self, view: ResourceViewId) {
        self.views.insert(view);
    }
    #[inline]
    pub(crate) fn set_backing(&mut self, backing: Option<usize>) {
        self.backing = backing;
    }
    #[inline]
    pub(crate) fn import_mut(&mut self) -> Option<&mut ImportInfo> {
        self.import.as_mut()
    }
}
