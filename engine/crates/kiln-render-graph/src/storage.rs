//! Graph Storage
//!
//! 保存渲染图声明的所有资源、编译后分配的物理资源（每个 FIF slot 一份）、
//! 每个物理资源的当前状态，以及每帧共享的相机数据和场景数据。

use indexmap::IndexMap;
use itertools::Itertools;

use kiln_render_interface::camera_frame_data::CameraFrameData;
use kiln_render_interface::frame_counter::FrameCounter;
use kiln_render_interface::frame_settings::{Extent2D, FrameSettings};
use kiln_render_interface::gfx_backend::GfxBackend;
use kiln_render_interface::gfx_error::GfxResult;
use kiln_render_interface::handles::{GfxBufferHandle, GfxImageHandle, GfxResourceHandle};
use kiln_render_interface::resource_desc::{GfxBufferDesc, GfxBufferUsage, GfxResourceDesc};
use kiln_render_interface::resource_state::GfxResourceState;

use crate::config::RenderGraphConfig;
use crate::error::RenderGraphError;
use crate::resource_handle::{BufferSizeFn, ResourceHandle};
use crate::resource_id::{ResourceId, ResourceViewId};
use crate::scene_context::SceneContext;

/// 某个 FIF slot 上的物理资源
#[derive(Clone, Copy, Debug)]
pub(crate) struct BackingSlot {
    pub handle: GfxResourceHandle,
    pub state: GfxResourceState,
}

/// 物理资源
///
/// 多个可以 alias 的逻辑资源会共用同一个 backing。
#[derive(Debug)]
pub(crate) struct Backing {
    pub name: String,
    pub desc: GfxResourceDesc,
    pub window_sized: bool,
    /// window size buffer 按输出尺寸计算大小
    pub buffer_size: Option<BufferSizeFn>,
    /// 导入资源没有 slot，句柄和状态保存在 [`ResourceHandle`] 中
    pub imported: Option<ResourceId>,
    /// 每帧第一次访问时需要的状态，新建的资源直接处于这个状态
    pub entry_state: GfxResourceState,
    pub slots: Vec<BackingSlot>,
}

impl Backing {
    pub(crate) fn owned(name: String, desc: GfxResourceDesc, window_sized: bool) -> Self {
        Self {
            name,
            desc,
            window_sized,
            buffer_size: None,
            imported: None,
            entry_state: GfxResourceState::UNDEFINED,
            slots: Vec::new(),
        }
    }

    pub(crate) fn imported(id: ResourceId, desc: GfxResourceDesc) -> Self {
        Self {
            name: id.name().to_string(),
            desc,
            window_sized: false,
            buffer_size: None,
            imported: Some(id),
            entry_state: GfxResourceState::UNDEFINED,
            slots: Vec::new(),
        }
    }
}

pub struct GraphStorage {
    resources: IndexMap<ResourceId, ResourceHandle>,
    backings: Vec<Backing>,

    frame_counter: FrameCounter,
    frame_settings: FrameSettings,
    /// 固定的输出分辨率，为 None 时跟随窗口尺寸
    output_image_size: Option<Extent2D>,
    /// 当前 window size 资源的实际尺寸
    allocated_extent: Option<Extent2D>,

    frame_data: CameraFrameData,
    /// 每个 FIF slot 一个 uniform buffer
    frame_data_buffers: Vec<GfxBufferHandle>,
    scene: SceneContext,

    /// 待销毁队列 (handle, frame_id)
    pending_destroy: Vec<(GfxResourceHandle, u64)>,
}

// new & init
impl GraphStorage {
    pub const OUTPUT_IMAGE: &'static str = "OutputImage";

    pub(crate) fn new(config: &RenderGraphConfig) -> Self {
        Self {
            resources: IndexMap::new(),
            backings: Vec::new(),
            frame_counter: FrameCounter::new(0, config.frames_in_flight),
            frame_settings: config.frame_settings,
            output_image_size: None,
            allocated_extent: None,
            frame_data: CameraFrameData::default(),
            frame_data_buffers: Vec::new(),
            scene: SceneContext::default(),
            pending_destroy: Vec::new(),
        }
    }

    #[inline]
    pub fn output_image_id() -> ResourceId {
        ResourceId::new(Self::OUTPUT_IMAGE)
    }
}

// destroy
impl GraphStorage {
    /// 立即销毁所有物理资源，调用前需要确保 GPU 已经空闲
    pub(crate) fn destroy(&mut self, backend: &mut dyn GfxBackend) {
        let _span = tracy_client::span!("GraphStorage::destroy");

        for backing in self.backings.drain(..) {
            for slot in backing.slots {
                backend.destroy_resource(slot.handle);
            }
        }
        for (handle, _) in self.pending_destroy.drain(..) {
            backend.destroy_resource(handle);
        }
        for buffer in self.frame_data_buffers.drain(..) {
            backend.destroy_buffer(buffer);
        }
        for resource in self.resources.values_mut() {
            resource.set_backing(None);
        }
        self.allocated_extent = None;
    }

    fn owns_gpu_resources(&self) -> bool {
        !self.pending_destroy.is_empty()
            || !self.frame_data_buffers.is_empty()
            || self.backings.iter().any(|backing| !backing.slots.is_empty())
    }
}
impl Drop for GraphStorage {
    fn drop(&mut self) {
        if cfg!(debug_assertions) && !std::thread::panicking() {
            assert!(!self.owns_gpu_resources(), "GraphStorage dropped without destroy()");
        }
    }
}

// 资源声明
impl GraphStorage {
    pub(crate) fn declare_resource(&mut self, handle: ResourceHandle) {
        self.resources.insert(handle.id().clone(), handle);
    }

    pub(crate) fn register_view(&mut self, view: &ResourceViewId) {
        if let Some(resource) = self.resources.get_mut(view.resource()) {
            resource.add_view(view.clone());
        }
    }

    /// 拓扑改变：清除所有声明，物理资源延迟销毁
    pub(crate) fn clear_resources(&mut self) {
        self.retire_backings();
        self.resources.clear();
    }

    #[inline]
    pub fn contains_resource(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    #[inline]
    pub fn contains_view(&self, view: &ResourceViewId) -> bool {
        self.resources.get(view.resource()).is_some_and(|resource| resource.contains_view(view))
    }

    #[inline]
    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceHandle> {
        self.resources.get(id)
    }

    /// 按声明顺序遍历
    #[inline]
    pub fn resources(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.resources.values()
    }

    #[inline]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// 替换导入资源的句柄与当前状态，例如每帧换一张 swapchain image
    pub fn rebind_import(&mut self, id: &ResourceId, handle: impl Into<GfxResourceHandle>, state: GfxResourceState) {
        let resource = self.resources.get_mut(id).unwrap_or_else(|| panic!("Resource '{id}' does not exist"));
        let import = resource.import_mut().unwrap_or_else(|| panic!("Resource '{id}' is not imported"));
        import.handle = handle.into();
        import.state = state;
    }
}

// 物理资源
impl GraphStorage {
    /// 安装编译得到的 backing，`assignment` 为 (资源, backing 下标)
    pub(crate) fn install_backings(&mut self, backings: Vec<Backing>, assignment: Vec<(ResourceId, usize)>) {
        self.retire_backings();
        self.backings = backings;
        for (id, backing) in assignment {
            if let Some(resource) = self.resources.get_mut(&id) {
                resource.set_backing(Some(backing));
            }
        }
    }

    /// 所有 backing 延迟销毁，资源声明保留
    pub(crate) fn retire_backings(&mut self) {
        let frame_id = self.frame_counter.frame_id();
        for backing in self.backings.drain(..) {
            self.pending_destroy.extend(backing.slots.into_iter().map(|slot| (slot.handle, frame_id)));
        }
        for resource in self.resources.values_mut() {
            resource.set_backing(None);
        }
        self.allocated_extent = None;
    }

    /// 为每个 backing 的每个 FIF slot 创建物理资源
    ///
    /// 失败时本次创建的资源会被立即销毁。
    pub(crate) fn allocate(&mut self, backend: &mut dyn GfxBackend) -> Result<(), RenderGraphError> {
        let _span = tracy_client::span!("GraphStorage::allocate");

        if self.frame_data_buffers.is_empty() {
            self.create_frame_data_buffers(backend)?;
        }

        let output_size = self.output_size();
        let indices = (0..self.backings.len()).filter(|&i| self.backings[i].imported.is_none()).collect_vec();
        if let Err(err) = self.create_backing_slots(backend, &indices, output_size) {
            for &i in &indices {
                for slot in self.backings[i].slots.drain(..) {
                    backend.destroy_resource(slot.handle);
                }
            }
            return Err(err);
        }

        self.allocated_extent = Some(output_size);
        Ok(())
    }

    /// 重新创建 window size 资源
    ///
    /// 输出尺寸没有变化时什么都不做，返回 `Ok(false)`。
    pub(crate) fn resize_window_resources(&mut self, backend: &mut dyn GfxBackend) -> Result<bool, RenderGraphError> {
        let output_size = self.output_size();
        if self.allocated_extent == Some(output_size) {
            return Ok(false);
        }

        let _span = tracy_client::span!("GraphStorage::resize_window_resources");
        let frame_id = self.frame_counter.frame_id();
        let indices = (0..self.backings.len())
            .filter(|&i| self.backings[i].window_sized && self.backings[i].imported.is_none())
            .collect_vec();
        for &i in &indices {
            let slots = std::mem::take(&mut self.backings[i].slots);
            self.pending_destroy.extend(slots.into_iter().map(|slot| (slot.handle, frame_id)));
        }

        self.create_backing_slots(backend, &indices, output_size)?;
        log::info!(
            "resize window resources to {output_size}: {} backing(s), {} pending destroy",
            indices.len(),
            self.pending_destroy.len()
        );

        self.allocated_extent = Some(output_size);
        Ok(true)
    }

    fn create_backing_slots(
        &mut self,
        backend: &mut dyn GfxBackend,
        indices: &[usize],
        output_size: Extent2D,
    ) -> Result<(), RenderGraphError> {
        let fif_labels = self.frame_counter.frame_labels().collect_vec();
        for &i in indices {
            let backing = &mut self.backings[i];
            if backing.window_sized {
                if let Some(desc) = backing.desc.as_image_mut() {
                    desc.extent = output_size;
                }
                if let (Some(desc), Some(size)) = (backing.desc.as_buffer_mut(), backing.buffer_size) {
                    desc.size = size(output_size);
                }
            }
            for label in &fif_labels {
                let name = format!("{}-{}", backing.name, label);
                let handle = backend.create_resource(&backing.desc, backing.entry_state, &name).map_err(|source| {
                    log::error!("failed to create '{name}': {source}");
                    RenderGraphError::ResourceAllocation {
                        resource: backing.name.clone(),
                        source,
                    }
                })?;
                backing.slots.push(BackingSlot {
                    handle,
                    state: backing.entry_state,
                });
            }
        }
        Ok(())
    }

    fn create_frame_data_buffers(&mut self, backend: &mut dyn GfxBackend) -> Result<(), RenderGraphError> {
        let desc = GfxBufferDesc::new(CameraFrameData::SIZE, GfxBufferUsage::UNIFORM | GfxBufferUsage::HOST_VISIBLE);
        for label in self.frame_counter.frame_labels() {
            let name = format!("CameraFrameData-{label}");
            match backend.create_buffer(&desc, GfxResourceState::UNIFORM_READ, &name) {
                Ok(buffer) => self.frame_data_buffers.push(buffer),
                Err(source) => {
                    for buffer in self.frame_data_buffers.drain(..) {
                        backend.destroy_buffer(buffer);
                    }
                    return Err(RenderGraphError::ResourceAllocation { resource: name, source });
                }
            }
        }
        Ok(())
    }

    /// 销毁已经不再被 GPU 使用的资源
    pub(crate) fn retire(&mut self, backend: &mut dyn GfxBackend) {
        let _span = tracy_client::span!("GraphStorage::retire");

        let frame_counter = &self.frame_counter;
        let (retired, pending): (Vec<_>, Vec<_>) =
            self.pending_destroy.drain(..).partition(|(_, frame_id)| frame_counter.is_retired(*frame_id));
        self.pending_destroy = pending;
        for (handle, _) in retired {
            backend.destroy_resource(handle);
        }
    }

    #[inline]
    pub(crate) fn backing_mut(&mut self, backing: usize) -> &mut Backing {
        &mut self.backings[backing]
    }

    pub(crate) fn backing_slot(&self, backing: usize, slot: usize) -> Option<BackingSlot> {
        let backing = self.backings.get(backing)?;
        match &backing.imported {
            Some(id) => self.resources.get(id)?.import().map(|import| BackingSlot {
                handle: import.handle,
                state: import.state,
            }),
            None => backing.slots.get(slot).copied(),
        }
    }

    pub(crate) fn set_backing_state(&mut self, backing: usize, slot: usize, state: GfxResourceState) {
        let Some(backing) = self.backings.get_mut(backing) else {
            return;
        };
        match &backing.imported {
            Some(id) => {
                if let Some(import) = self.resources.get_mut(id).and_then(|resource| resource.import_mut()) {
                    import.state = state;
                }
            }
            None => {
                if let Some(slot) = backing.slots.get_mut(slot) {
                    slot.state = state;
                }
            }
        }
    }

    pub(crate) fn resource_slot(&self, id: &ResourceId, slot: usize) -> Option<BackingSlot> {
        let backing = self.resources.get(id)?.backing()?;
        self.backing_slot(backing, slot)
    }

    #[inline]
    pub fn backing_count(&self) -> usize {
        self.backings.len()
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.pending_destroy.len()
    }

    /// 当前 FIF slot 中 view 对应的 image
    #[inline]
    pub fn image(&self, view: &ResourceViewId) -> Option<GfxImageHandle> {
        self.resource_slot(view.resource(), self.current_slot())?.handle.as_image()
    }

    /// 当前 FIF slot 中 view 对应的 buffer
    #[inline]
    pub fn buffer(&self, view: &ResourceViewId) -> Option<GfxBufferHandle> {
        self.resource_slot(view.resource(), self.current_slot())?.handle.as_buffer()
    }

    /// 资源在当前 FIF slot 上记录的状态
    #[inline]
    pub fn resource_state(&self, id: &ResourceId) -> Option<GfxResourceState> {
        self.resource_slot(id, self.current_slot()).map(|slot| slot.state)
    }
}

// 帧数据
impl GraphStorage {
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        *self.frame_counter.frame_label()
    }

    #[inline]
    pub(crate) fn next_frame(&mut self) {
        self.frame_counter.next_frame();
    }

    #[inline]
    pub fn frame_settings(&self) -> &FrameSettings {
        &self.frame_settings
    }

    #[inline]
    pub(crate) fn set_frame_extent(&mut self, extent: Extent2D) {
        self.frame_settings.frame_extent = extent;
    }

    #[inline]
    pub fn output_image_size(&self) -> Option<Extent2D> {
        self.output_image_size
    }

    /// 固定输出分辨率，`None` 表示跟随窗口，在下一次 resize 时生效
    #[inline]
    pub fn set_output_image_size(&mut self, size: Option<Extent2D>) {
        self.output_image_size = size;
    }

    /// window size 资源应当使用的尺寸
    #[inline]
    pub fn output_size(&self) -> Extent2D {
        self.output_image_size.unwrap_or(self.frame_settings.frame_extent)
    }

    #[inline]
    pub fn frame_data(&self) -> &CameraFrameData {
        &self.frame_data
    }

    #[inline]
    pub fn frame_data_mut(&mut self) -> &mut CameraFrameData {
        &mut self.frame_data
    }

    /// 当前 FIF slot 的相机 uniform buffer
    #[inline]
    pub fn frame_data_handle(&self) -> Option<GfxBufferHandle> {
        self.frame_data_buffers.get(self.current_slot()).copied()
    }

    pub(crate) fn upload_frame_data(&mut self, backend: &mut dyn GfxBackend) -> GfxResult<()> {
        let output_size = self.output_size();
        self.frame_data.set_resolution(output_size.width, output_size.height);
        self.frame_data.frame_id = self.frame_counter.frame_id() as u32;

        match self.frame_data_handle() {
            Some(buffer) => backend.write_buffer(buffer, 0, self.frame_data.as_bytes()),
            None => Ok(()),
        }
    }

    #[inline]
    pub fn scene(&self) -> &SceneContext {
        &self.scene
    }

    #[inline]
    pub fn scene_mut(&mut self) -> &mut SceneContext {
        &mut self.scene
    }
}
