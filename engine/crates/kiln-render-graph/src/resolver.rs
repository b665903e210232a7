//! 资源解析
//!
//! Pass 在 `resolve` 中通过 [`ResourceResolver`] 声明自己创建、导入、读取和写入的资源。
//! 声明只会被记录下来，具体的状态、顺序以及物理资源都在 build 时统一计算。

use kiln_render_interface::async_load::AsyncLoadHandle;
use kiln_render_interface::frame_settings::{Extent2D, FrameSettings, GfxFormat};
use kiln_render_interface::handles::{GfxBufferHandle, GfxImageHandle};
use kiln_render_interface::resource_desc::{GfxBufferDesc, GfxBufferUsage, GfxImageDesc, GfxResourceDesc};
use kiln_render_interface::resource_state::{GfxAccess, GfxImageLayout, GfxPipelineStage, GfxResourceState};

use crate::resource_handle::{BufferSizeFn, ResourceFlags, ResourceHandle};
use crate::resource_id::{ResourceId, ResourceViewId};
use crate::storage::GraphStorage;

/// 读取资源的 shader 阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceReadAccess {
    PixelShader,
    NonPixelShader,
    Any,
}

impl ResourceReadAccess {
    fn stages(self) -> GfxPipelineStage {
        match self {
            Self::PixelShader => GfxPipelineStage::FRAGMENT_SHADER,
            Self::NonPixelShader => GfxPipelineStage::VERTEX_SHADER | GfxPipelineStage::COMPUTE_SHADER,
            Self::Any => {
                GfxPipelineStage::VERTEX_SHADER | GfxPipelineStage::FRAGMENT_SHADER | GfxPipelineStage::COMPUTE_SHADER
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteUsage {
    RenderTarget,
    DepthStencil,
    UnorderedAccess,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadUsage {
    ShaderResource,
    ConstantBuffer,
    DepthStencil,
    UnorderedAccess,
}

/// Pass 对某个 view 的访问意图
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AccessIntent {
    Write(WriteUsage),
    /// copy 目标
    WriteDst,
    Read(ReadUsage, ResourceReadAccess),
    /// copy 源
    ReadSrc,
}

impl AccessIntent {
    #[inline]
    pub(crate) fn is_write(self) -> bool {
        matches!(self, Self::Write(_) | Self::WriteDst)
    }

    /// 根据资源类型得到具体的资源状态
    ///
    /// 返回 `None` 表示该用法不适用于这种资源，例如把 buffer 当作 render target。
    pub(crate) fn state_for(self, is_image: bool) -> Option<GfxResourceState> {
        use GfxResourceState as S;

        let state = match (self, is_image) {
            (Self::Write(WriteUsage::RenderTarget), true) => S::COLOR_ATTACHMENT_WRITE,
            (Self::Write(WriteUsage::DepthStencil), true) => S::DEPTH_ATTACHMENT_WRITE,
            (Self::Write(WriteUsage::UnorderedAccess), true) => S::new(
                GfxPipelineStage::COMPUTE_SHADER | GfxPipelineStage::FRAGMENT_SHADER,
                GfxAccess::SHADER_STORAGE_WRITE,
                GfxImageLayout::General,
            ),
            (Self::Write(WriteUsage::UnorderedAccess), false) => S::STORAGE_BUFFER_WRITE,
            (Self::Write(_), false) => return None,

            (Self::WriteDst, true) => S::TRANSFER_DST,
            (Self::WriteDst, false) => S::BUFFER_TRANSFER_DST,

            (Self::Read(ReadUsage::ShaderResource, access), true) => {
                S::new(access.stages(), GfxAccess::SHADER_SAMPLED_READ, GfxImageLayout::ShaderReadOnly)
            }
            (Self::Read(ReadUsage::ShaderResource, access), false) => {
                S::buffer(access.stages(), GfxAccess::SHADER_STORAGE_READ)
            }
            (Self::Read(ReadUsage::ConstantBuffer, access), false) => S::buffer(access.stages(), GfxAccess::UNIFORM_READ),
            (Self::Read(ReadUsage::ConstantBuffer, _), true) => return None,
            (Self::Read(ReadUsage::DepthStencil, _), true) => S::DEPTH_ATTACHMENT_READ,
            (Self::Read(ReadUsage::DepthStencil, _), false) => return None,
            (Self::Read(ReadUsage::UnorderedAccess, access), true) => {
                S::new(access.stages(), GfxAccess::SHADER_STORAGE_READ, GfxImageLayout::General)
            }
            (Self::Read(ReadUsage::UnorderedAccess, access), false) => {
                S::buffer(access.stages(), GfxAccess::SHADER_STORAGE_READ)
            }

            (Self::ReadSrc, true) => S::TRANSFER_SRC,
            (Self::ReadSrc, false) => S::BUFFER_TRANSFER_SRC,
        };
        Some(state)
    }
}

/// 一次 view 访问
#[derive(Clone, Debug)]
pub(crate) struct ViewAccess {
    pub view: ResourceViewId,
    pub intent: AccessIntent,
}

/// 一个 Pass 在 resolve 阶段声明的全部内容
#[derive(Clone, Debug, Default)]
pub(crate) struct PassResources {
    pub created: Vec<ResourceId>,
    pub imported: Vec<ResourceId>,
    pub accesses: Vec<ViewAccess>,
    pub render_targets: Vec<ResourceViewId>,
    pub depth_stencil: Option<ResourceViewId>,
    pub exports: Vec<(ResourceId, GfxResourceState)>,
    pub async_dependencies: Vec<AsyncLoadHandle>,
}

/// 供 Pass 声明资源的解析器
pub struct ResourceResolver<'a> {
    storage: &'a mut GraphStorage,
    pass_name: &'a str,
    resources: PassResources,
}

// new & init
impl<'a> ResourceResolver<'a> {
    pub(crate) fn new(storage: &'a mut GraphStorage, pass_name: &'a str) -> Self {
        Self {
            storage,
            pass_name,
            resources: PassResources::default(),
        }
    }

    pub(crate) fn finish(self) -> PassResources {
        self.resources
    }
}

// 创建资源
impl ResourceResolver<'_> {
    pub fn create_buffer(&mut self, id: ResourceId, desc: GfxBufferDesc) {
        self.declare(ResourceHandle::new(id, GfxResourceDesc::Buffer(desc), ResourceFlags::empty()));
    }

    pub fn create_texture(&mut self, id: ResourceId, desc: GfxImageDesc, flags: ResourceFlags) {
        self.declare(ResourceHandle::new(id, GfxResourceDesc::Image(desc), flags));
    }

    /// 尺寸跟随输出图像的 texture，`desc.extent` 会被忽略
    pub fn create_window_texture(&mut self, id: ResourceId, mut desc: GfxImageDesc, flags: ResourceFlags) {
        desc.extent = self.storage.output_size();
        self.declare(ResourceHandle::new(
            id,
            GfxResourceDesc::Image(desc),
            flags | ResourceFlags::WINDOW_SIZE_DEPENDENT,
        ));
    }

    /// 大小跟随输出图像的 buffer，resize 时按 `size` 重新计算
    pub fn create_window_buffer(&mut self, id: ResourceId, usage: GfxBufferUsage, size: BufferSizeFn) {
        let desc = GfxBufferDesc::new(size(self.storage.output_size()), usage);
        self.declare(ResourceHandle::window_buffer(id, GfxResourceDesc::Buffer(desc), size));
    }

    fn declare(&mut self, handle: ResourceHandle) {
        let id = handle.id().clone();
        assert!(
            !self.storage.contains_resource(&id),
            "Pass '{}' declares resource '{}' which already exists",
            self.pass_name,
            id
        );
        self.storage.declare_resource(handle);
        self.resources.created.push(id);
    }
}

// 导入资源
impl ResourceResolver<'_> {
    pub fn import_buffer(
        &mut self,
        id: ResourceId,
        handle: GfxBufferHandle,
        desc: GfxBufferDesc,
        state: GfxResourceState,
    ) {
        self.import(ResourceHandle::imported(id, GfxResourceDesc::Buffer(desc), handle.into(), state));
    }

    pub fn import_texture(
        &mut self,
        id: ResourceId,
        handle: GfxImageHandle,
        desc: GfxImageDesc,
        state: GfxResourceState,
    ) {
        self.import(ResourceHandle::imported(id, GfxResourceDesc::Image(desc), handle.into(), state));
    }

    fn import(&mut self, handle: ResourceHandle) {
        let id = handle.id().clone();
        assert!(
            !self.storage.contains_resource(&id),
            "Pass '{}' imports resource '{}' which already exists",
            self.pass_name,
            id
        );
        self.storage.declare_resource(handle);
        self.resources.imported.push(id);
    }

    /// 资源在帧结束时需要处于 `final_state`，例如 swapchain image 需要处于 Present
    pub fn export_resource(&mut self, id: ResourceId, final_state: GfxResourceState) {
        self.resources.exports.push((id, final_state));
    }
}

// 读写
impl ResourceResolver<'_> {
    pub fn write_resource(&mut self, view: ResourceViewId, usage: WriteUsage) -> ResourceViewId {
        match usage {
            WriteUsage::RenderTarget => self.resources.render_targets.push(view.clone()),
            WriteUsage::DepthStencil => self.set_depth_stencil(&view),
            WriteUsage::UnorderedAccess => {}
        }
        self.access(view, AccessIntent::Write(usage))
    }

    /// 作为 copy 的目标写入
    pub fn write_dst_resource(&mut self, view: ResourceViewId) -> ResourceViewId {
        self.access(view, AccessIntent::WriteDst)
    }

    pub fn read_resource(
        &mut self,
        view: ResourceViewId,
        access: ResourceReadAccess,
        usage: ReadUsage,
    ) -> ResourceViewId {
        if usage == ReadUsage::DepthStencil {
            self.set_depth_stencil(&view);
        }
        self.access(view, AccessIntent::Read(usage, access))
    }

    /// 作为 copy 的源读取
    pub fn read_src_resource(&mut self, view: ResourceViewId) -> ResourceViewId {
        self.access(view, AccessIntent::ReadSrc)
    }

    fn set_depth_stencil(&mut self, view: &ResourceViewId) {
        if let Some(existing) = &self.resources.depth_stencil {
            assert!(
                existing.resource() == view.resource(),
                "Pass '{}' binds two depth stencils: '{}' and '{}'",
                self.pass_name,
                existing,
                view
            );
        }
        self.resources.depth_stencil = Some(view.clone());
    }

    fn access(&mut self, view: ResourceViewId, intent: AccessIntent) -> ResourceViewId {
        self.resources.accesses.push(ViewAccess {
            view: view.clone(),
            intent,
        });
        view
    }
}

// 其他
impl ResourceResolver<'_> {
    /// build 时检查，加载尚未完成则 build 返回错误
    pub fn require_loaded(&mut self, handle: &AsyncLoadHandle) {
        self.resources.async_dependencies.push(handle.clone());
    }

    /// 最终输出图像的资源名称
    #[inline]
    pub fn output_image(&self) -> ResourceId {
        GraphStorage::output_image_id()
    }

    #[inline]
    pub fn swapchain_format(&self) -> GfxFormat {
        self.storage.frame_settings().color_format
    }

    #[inline]
    pub fn frame_settings(&self) -> &FrameSettings {
        self.storage.frame_settings()
    }

    /// window size texture 当前的尺寸
    #[inline]
    pub fn output_size(&self) -> Extent2D {
        self.storage.output_size()
    }

    #[inline]
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        let rt = AccessIntent::Write(WriteUsage::RenderTarget);
        assert!(rt.is_write());
        assert_eq!(rt.state_for(true), Some(GfxResourceState::COLOR_ATTACHMENT_WRITE));
        assert_eq!(rt.state_for(false), None);

        let cb = AccessIntent::Read(ReadUsage::ConstantBuffer, ResourceReadAccess::PixelShader);
        assert!(!cb.is_write());
        let state = cb.state_for(false).unwrap();
        assert_eq!(state.access, GfxAccess::UNIFORM_READ);
        assert_eq!(state.stage, GfxPipelineStage::FRAGMENT_SHADER);
        assert_eq!(cb.state_for(true), None);

        let srv = AccessIntent::Read(ReadUsage::ShaderResource, ResourceReadAccess::NonPixelShader);
        let state = srv.state_for(true).unwrap();
        assert_eq!(state.layout, GfxImageLayout::ShaderReadOnly);
        assert!(state.stage.contains(GfxPipelineStage::COMPUTE_SHADER));
        assert!(!state.stage.contains(GfxPipelineStage::FRAGMENT_SHADER));
    }

    #[test]
    fn test_copy_intents() {
        assert_eq!(AccessIntent::ReadSrc.state_for(true), Some(GfxResourceState::TRANSFER_SRC));
        assert_eq!(AccessIntent::WriteDst.state_for(false), Some(GfxResourceState::BUFFER_TRANSFER_DST));
        assert!(AccessIntent::WriteDst.is_write());
    }
}
