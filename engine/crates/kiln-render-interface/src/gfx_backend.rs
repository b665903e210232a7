//! 图形后端抽象
//!
//! 调度层通过 [`GfxBackend`] 创建资源、分配命令列表并提交，
//! 通过 [`GfxCommandList`] 录制命令。两者都不暴露具体的图形 API。

use std::any::Any;
use std::fmt::Display;
use std::time::Duration;

use crate::frame_settings::Extent2D;
use crate::gfx_error::GfxResult;
use crate::handles::{GfxBufferHandle, GfxImageHandle, GfxResourceHandle, GfxSemaphoreHandle};
use crate::resource_desc::{GfxBufferDesc, GfxImageDesc, GfxResourceDesc};
use crate::resource_state::{GfxPipelineStage, GfxResourceState};

/// Queue 类型
///
/// `Unknown` 表示 Pass 没有指定 queue，这样的 Pass 不会被执行。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueClass {
    #[default]
    Unknown,
    Graphics,
    Compute,
    Copy,
}

impl QueueClass {
    /// 可以提交命令的 queue
    pub const DISPATCHABLE: [QueueClass; 3] = [QueueClass::Graphics, QueueClass::Compute, QueueClass::Copy];

    /// 在 [`Self::DISPATCHABLE`] 中的下标
    #[inline]
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Unknown => None,
            Self::Graphics => Some(0),
            Self::Compute => Some(1),
            Self::Copy => Some(2),
        }
    }

    #[inline]
    pub fn is_dispatchable(self) -> bool {
        self != Self::Unknown
    }
}

impl Display for QueueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Graphics => "Graphics",
            Self::Compute => "Compute",
            Self::Copy => "Copy",
        };
        f.write_str(name)
    }
}

/// 资源状态转换
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxBarrier {
    pub resource: GfxResourceHandle,
    pub before: GfxResourceState,
    pub after: GfxResourceState,
}

impl GfxBarrier {
    #[inline]
    pub fn new(resource: impl Into<GfxResourceHandle>, before: GfxResourceState, after: GfxResourceState) -> Self {
        Self {
            resource: resource.into(),
            before,
            after,
        }
    }
}

/// 提交时等待的 timeline semaphore
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreWait {
    pub semaphore: GfxSemaphoreHandle,
    pub value: u64,
    /// 在哪个 stage 之前等待
    pub stage: GfxPipelineStage,
}

/// 提交完成后发出的 timeline semaphore 信号
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreSignal {
    pub semaphore: GfxSemaphoreHandle,
    pub value: u64,
    pub stage: GfxPipelineStage,
}

/// 命令列表
///
/// 由 [`GfxBackend::allocate_command_list`] 分配，录制可以在任意线程进行，
/// 录制完成后交还给同一个后端提交。
pub trait GfxCommandList: Send {
    fn queue_class(&self) -> QueueClass;
    fn name(&self) -> &str;

    // debug label
    fn begin_label(&mut self, label: &str);
    fn end_label(&mut self);

    fn pipeline_barrier(&mut self, barriers: &[GfxBarrier]);

    fn clear_color(&mut self, image: GfxImageHandle, color: [f32; 4]);
    fn clear_depth(&mut self, image: GfxImageHandle, depth: f32);

    fn set_render_targets(&mut self, colors: &[GfxImageHandle], depth: Option<GfxImageHandle>);
    fn set_viewport(&mut self, extent: Extent2D);
    fn bind_pipeline(&mut self, name: &str);
    fn bind_buffer(&mut self, slot: u32, buffer: GfxBufferHandle);
    fn bind_image(&mut self, slot: u32, image: GfxImageHandle);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32);
    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32);

    fn copy_image(&mut self, src: GfxImageHandle, dst: GfxImageHandle);
    fn copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, size: u64);

    /// 提交时用于还原成后端自己的类型
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// 图形后端
pub trait GfxBackend {
    fn name(&self) -> &str;

    // 资源
    fn create_image(
        &mut self,
        desc: &GfxImageDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<GfxImageHandle>;
    fn create_buffer(
        &mut self,
        desc: &GfxBufferDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<GfxBufferHandle>;
    fn destroy_image(&mut self, handle: GfxImageHandle);
    fn destroy_buffer(&mut self, handle: GfxBufferHandle);

    /// 向 host visible 的 buffer 写入数据
    fn write_buffer(&mut self, handle: GfxBufferHandle, offset: u64, data: &[u8]) -> GfxResult<()>;

    // timeline semaphore
    fn create_timeline_semaphore(&mut self, initial_value: u64, name: &str) -> GfxResult<GfxSemaphoreHandle>;
    fn destroy_semaphore(&mut self, handle: GfxSemaphoreHandle);
    fn semaphore_value(&self, handle: GfxSemaphoreHandle) -> GfxResult<u64>;
    /// 阻塞直到 semaphore 的值不小于 `value`
    fn wait_semaphore(&mut self, handle: GfxSemaphoreHandle, value: u64, timeout: Duration) -> GfxResult<()>;

    // 命令
    fn allocate_command_list(&mut self, queue: QueueClass, name: &str) -> Box<dyn GfxCommandList>;
    fn submit(
        &mut self,
        queue: QueueClass,
        command_lists: Vec<Box<dyn GfxCommandList>>,
        waits: &[GfxSemaphoreWait],
        signals: &[GfxSemaphoreSignal],
    ) -> GfxResult<()>;
    fn wait_idle(&mut self) -> GfxResult<()>;

    fn create_resource(
        &mut self,
        desc: &GfxResourceDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<GfxResourceHandle> {
        match desc {
            GfxResourceDesc::Image(desc) => self.create_image(desc, initial_state, name).map(GfxResourceHandle::Image),
            GfxResourceDesc::Buffer(desc) => {
                self.create_buffer(desc, initial_state, name).map(GfxResourceHandle::Buffer)
            }
        }
    }

    fn destroy_resource(&mut self, handle: GfxResourceHandle) {
        match handle {
            GfxResourceHandle::Image(handle) => self.destroy_image(handle),
            GfxResourceHandle::Buffer(handle) => self.destroy_buffer(handle),
        }
    }
}
