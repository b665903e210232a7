//! Pass 定义
//!
//! 提供 [`RenderPass`] trait。`resolve` 与 `dispatch` 是两个独立的调用：
//! 前者在 build 时声明资源，后者在每帧执行时录制命令。

use bitflags::bitflags;

use kiln_render_interface::camera_frame_data::CameraFrameData;
use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::{GfxCommandList, QueueClass};
use kiln_render_interface::handles::{GfxBufferHandle, GfxImageHandle};

use crate::resolver::{PassResources, ResourceResolver};
use crate::resource_id::ResourceViewId;
use crate::scene_context::SceneContext;
use crate::storage::GraphStorage;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PassFlags: u8 {
        /// 保留在执行顺序中，但不会被执行
        const CULL = 1 << 0;
    }
}

/// 渲染 Pass
///
/// 录制可能在 worker 线程上进行，所以需要 `Send + Sync`。
pub trait RenderPass: Send + Sync {
    fn name(&self) -> &str;

    fn queue_class(&self) -> QueueClass {
        QueueClass::Graphics
    }

    fn flags(&self) -> PassFlags {
        PassFlags::empty()
    }

    /// 声明资源依赖
    fn resolve(&mut self, resolver: &mut ResourceResolver);

    /// 录制命令，barrier 已经由渲染图插入
    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList);
}

/// 渲染图内部的 Pass 节点
pub(crate) struct PassNode {
    pub name: String,
    pub queue: QueueClass,
    pub flags: PassFlags,
    pub pass: Box<dyn RenderPass>,
    pub resources: PassResources,
}

impl PassNode {
    /// 被 cull 或没有指定 queue 的 Pass 不会被执行
    #[inline]
    pub fn is_dispatchable(&self) -> bool {
        self.queue.is_dispatchable() && !self.flags.contains(PassFlags::CULL)
    }
}

/// Pass 执行时的上下文
///
/// 提供当前 FIF slot 上的物理资源查询，以及场景与相机数据。
pub struct PassContext<'a> {
    pub(crate) storage: &'a GraphStorage,
    pub(crate) slot: usize,
    pub(crate) pass_name: &'a str,
    pub(crate) render_targets: &'a [ResourceViewId],
    pub(crate) depth_stencil: Option<&'a ResourceViewId>,
}

impl PassContext<'_> {
    #[inline]
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    #[inline]
    pub fn storage(&self) -> &GraphStorage {
        self.storage
    }

    #[inline]
    pub fn scene(&self) -> &SceneContext {
        self.storage.scene()
    }

    #[inline]
    pub fn frame_data(&self) -> &CameraFrameData {
        self.storage.frame_data()
    }

    #[inline]
    pub fn frame_data_handle(&self) -> Option<GfxBufferHandle> {
        self.storage.frame_data_handle()
    }

    #[inline]
    pub fn output_size(&self) -> Extent2D {
        self.storage.output_size()
    }

    #[inline]
    pub fn try_image(&self, view: &ResourceViewId) -> Option<GfxImageHandle> {
        self.storage.resource_slot(view.resource(), self.slot)?.handle.as_image()
    }

    #[inline]
    pub fn try_buffer(&self, view: &ResourceViewId) -> Option<GfxBufferHandle> {
        self.storage.resource_slot(view.resource(), self.slot)?.handle.as_buffer()
    }

    /// 获取 image 的物理句柄
    ///
    /// # Panics
    /// view 没有在该 Pass 的 resolve 中声明，或者不是 image
    pub fn image(&self, view: &ResourceViewId) -> GfxImageHandle {
        self.try_image(view)
            .unwrap_or_else(|| panic!("Image '{view}' is not available in pass '{}'", self.pass_name))
    }

    /// 获取 buffer 的物理句柄
    ///
    /// # Panics
    /// view 没有在该 Pass 的 resolve 中声明，或者不是 buffer
    pub fn buffer(&self, view: &ResourceViewId) -> GfxBufferHandle {
        self.try_buffer(view)
            .unwrap_or_else(|| panic!("Buffer '{view}' is not available in pass '{}'", self.pass_name))
    }

    /// resolve 中声明的 render target，按声明顺序
    pub fn render_targets(&self) -> Vec<GfxImageHandle> {
        self.render_targets.iter().filter_map(|view| self.try_image(view)).collect()
    }

    pub fn depth_stencil(&self) -> Option<GfxImageHandle> {
        self.depth_stencil.and_then(|view| self.try_image(view))
    }
}
