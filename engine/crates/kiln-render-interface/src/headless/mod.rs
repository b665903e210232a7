//! 无窗口后端
//!
//! 在内存中记录并回放命令，不访问任何 GPU。回放时跟踪每个资源的 layout，
//! 检查 barrier 的 before 状态以及命令对 layout 的要求，发现的问题记录在
//! [`HeadlessBackend::validation_errors`] 中。用于测试和 headless 运行。

mod command_list;

use std::time::Duration;

use slotmap::SlotMap;

pub use command_list::{HeadlessCommandList, RecordedCommand};

use crate::gfx_backend::{GfxBackend, GfxCommandList, GfxSemaphoreSignal, GfxSemaphoreWait, QueueClass};
use crate::gfx_error::{GfxError, GfxResult};
use crate::handles::{GfxBufferHandle, GfxImageHandle, GfxResourceHandle, GfxSemaphoreHandle};
use crate::resource_desc::{GfxBufferDesc, GfxBufferUsage, GfxImageDesc};
use crate::resource_state::{GfxImageLayout, GfxResourceState};

#[derive(Debug)]
pub struct HeadlessImage {
    pub name: String,
    pub desc: GfxImageDesc,
    pub state: GfxResourceState,
}

#[derive(Debug)]
pub struct HeadlessBuffer {
    pub name: String,
    pub desc: GfxBufferDesc,
    pub state: GfxResourceState,
    /// 只有 host visible 的 buffer 才保存内容
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessSemaphore {
    name: String,
    value: u64,
}

/// 一次 queue submit 的记录
#[derive(Debug)]
pub struct HeadlessSubmission {
    pub queue: QueueClass,
    pub command_lists: Vec<HeadlessCommandList>,
    pub waits: Vec<GfxSemaphoreWait>,
    pub signals: Vec<GfxSemaphoreSignal>,
}

impl HeadlessSubmission {
    /// 所有命令列表中的命令
    pub fn commands(&self) -> impl Iterator<Item = &RecordedCommand> {
        self.command_lists.iter().flat_map(|list| list.commands().iter())
    }

    /// 按顺序出现的 debug label，即 Pass 名称
    pub fn labels(&self) -> Vec<&str> {
        self.commands()
            .filter_map(|cmd| match cmd {
                RecordedCommand::BeginLabel(label) => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }
}

pub struct HeadlessBackend {
    images: SlotMap<GfxImageHandle, HeadlessImage>,
    buffers: SlotMap<GfxBufferHandle, HeadlessBuffer>,
    semaphores: SlotMap<GfxSemaphoreHandle, HeadlessSemaphore>,

    memory_budget: Option<u64>,
    memory_used: u64,

    submissions: Vec<HeadlessSubmission>,
    validation_errors: Vec<String>,

    /// (还需要成功的 submit 次数, 之后返回的错误)
    pending_submit_error: Option<(usize, GfxError)>,

    created_image_count: usize,
    created_buffer_count: usize,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            images: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            memory_budget: None,
            memory_used: 0,
            submissions: Vec::new(),
            validation_errors: Vec::new(),
            pending_submit_error: None,
            created_image_count: 0,
            created_buffer_count: 0,
        }
    }

    /// 限制显存总量，超出时创建资源返回 [`GfxError::OutOfDeviceMemory`]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }
}

// 测试与诊断
impl HeadlessBackend {
    /// 让下一次 submit 失败
    pub fn fail_next_submit(&mut self, error: GfxError) {
        self.fail_submit_after(0, error);
    }

    /// 再成功 `successful` 次之后，让下一次 submit 失败
    pub fn fail_submit_after(&mut self, successful: usize, error: GfxError) {
        self.pending_submit_error = Some((successful, error));
    }

    pub fn set_memory_budget(&mut self, bytes: Option<u64>) {
        self.memory_budget = bytes;
    }

    #[inline]
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }
    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }
    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }
    #[inline]
    pub fn live_semaphore_count(&self) -> usize {
        self.semaphores.len()
    }
    /// 累计创建过的 image 数量
    #[inline]
    pub fn created_image_count(&self) -> usize {
        self.created_image_count
    }
    #[inline]
    pub fn created_buffer_count(&self) -> usize {
        self.created_buffer_count
    }
    #[inline]
    pub fn image(&self, handle: GfxImageHandle) -> Option<&HeadlessImage> {
        self.images.get(handle)
    }
    #[inline]
    pub fn buffer(&self, handle: GfxBufferHandle) -> Option<&HeadlessBuffer> {
        self.buffers.get(handle)
    }
    pub fn resource_state(&self, handle: GfxResourceHandle) -> Option<GfxResourceState> {
        match handle {
            GfxResourceHandle::Image(h) => self.images.get(h).map(|image| image.state),
            GfxResourceHandle::Buffer(h) => self.buffers.get(h).map(|buffer| buffer.state),
        }
    }
    #[inline]
    pub fn submissions(&self) -> &[HeadlessSubmission] {
        &self.submissions
    }
    pub fn take_submissions(&mut self) -> Vec<HeadlessSubmission> {
        std::mem::take(&mut self.submissions)
    }
    #[inline]
    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }
}

// 回放
impl HeadlessBackend {
    fn report(&mut self, msg: String) {
        log::warn!("[headless] {msg}");
        self.validation_errors.push(msg);
    }

    fn check_image_layout(&mut self, list: &str, op: &str, image: GfxImageHandle, allowed: &[GfxImageLayout]) {
        match self.images.get(image) {
            None => self.report(format!("{list}: {op} uses a destroyed image")),
            Some(img) if !allowed.contains(&img.state.layout) => {
                let msg = format!(
                    "{list}: {op} on image '{}' in layout {:?}, expected one of {:?}",
                    img.name, img.state.layout, allowed
                );
                self.report(msg);
            }
            Some(_) => {}
        }
    }

    fn check_buffer(&mut self, list: &str, op: &str, buffer: GfxBufferHandle) {
        if !self.buffers.contains_key(buffer) {
            self.report(format!("{list}: {op} uses a destroyed buffer"));
        }
    }

    fn apply_barrier(&mut self, list: &str, barrier: &crate::gfx_backend::GfxBarrier) {
        let (name, state) = match barrier.resource {
            GfxResourceHandle::Image(h) => match self.images.get_mut(h) {
                Some(image) => (image.name.clone(), &mut image.state),
                None => return self.report(format!("{list}: barrier on a destroyed image")),
            },
            GfxResourceHandle::Buffer(h) => match self.buffers.get_mut(h) {
                Some(buffer) => (buffer.name.clone(), &mut buffer.state),
                None => return self.report(format!("{list}: barrier on a destroyed buffer")),
            },
        };

        let current = *state;
        *state = barrier.after;
        if current.layout != barrier.before.layout {
            self.report(format!(
                "{list}: barrier on '{name}' expects layout {:?} but resource is in {:?}",
                barrier.before.layout, current.layout
            ));
        }
    }

    fn replay(&mut self, list: &HeadlessCommandList) {
        use GfxImageLayout as L;

        let name = list.name.as_str();
        if list.open_labels() != 0 {
            self.report(format!("{name}: {} debug label(s) not closed", list.open_labels()));
        }
        for cmd in &list.commands {
            match cmd {
                RecordedCommand::Barrier(barriers) => {
                    for barrier in barriers {
                        self.apply_barrier(name, barrier);
                    }
                }
                RecordedCommand::ClearColor { image, .. } => {
                    self.check_image_layout(name, "clear_color", *image, &[L::TransferDst, L::General, L::ColorAttachment])
                }
                RecordedCommand::ClearDepth { image, .. } => self.check_image_layout(
                    name,
                    "clear_depth",
                    *image,
                    &[L::DepthStencilAttachment, L::TransferDst, L::General],
                ),
                RecordedCommand::SetRenderTargets { colors, depth } => {
                    for color in colors {
                        self.check_image_layout(name, "color target", *color, &[L::ColorAttachment, L::General]);
                    }
                    if let Some(depth) = depth {
                        self.check_image_layout(
                            name,
                            "depth target",
                            *depth,
                            &[L::DepthStencilAttachment, L::DepthStencilReadOnly],
                        );
                    }
                }
                RecordedCommand::BindImage { image, .. } => self.check_image_layout(
                    name,
                    "bind_image",
                    *image,
                    &[L::ShaderReadOnly, L::General, L::DepthStencilReadOnly],
                ),
                RecordedCommand::BindBuffer { buffer, .. } => self.check_buffer(name, "bind_buffer", *buffer),
                RecordedCommand::CopyImage { src, dst } => {
                    self.check_image_layout(name, "copy src", *src, &[L::TransferSrc, L::General]);
                    self.check_image_layout(name, "copy dst", *dst, &[L::TransferDst, L::General]);
                }
                RecordedCommand::CopyBuffer { src, dst, .. } => {
                    self.check_buffer(name, "copy src", *src);
                    self.check_buffer(name, "copy dst", *dst);
                }
                RecordedCommand::BeginLabel(_)
                | RecordedCommand::EndLabel
                | RecordedCommand::SetViewport(_)
                | RecordedCommand::BindPipeline(_)
                | RecordedCommand::Draw { .. }
                | RecordedCommand::DrawIndexed { .. }
                | RecordedCommand::Dispatch { .. } => {}
            }
        }
    }

    fn reserve_memory(&mut self, bytes: u64, name: &str) -> GfxResult<()> {
        if let Some(budget) = self.memory_budget {
            let available = budget.saturating_sub(self.memory_used);
            if bytes > available {
                log::error!("[headless] failed to allocate {bytes} bytes for '{name}'");
                return Err(GfxError::OutOfDeviceMemory {
                    requested: bytes,
                    available,
                });
            }
        }
        self.memory_used += bytes;
        Ok(())
    }
}

impl GfxBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_image(
        &mut self,
        desc: &GfxImageDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<GfxImageHandle> {
        if desc.extent.is_empty() {
            return Err(GfxError::ResourceCreationFailed(format!("image '{name}' has empty extent {}", desc.extent)));
        }
        self.reserve_memory(desc.memory_size(), name)?;
        self.created_image_count += 1;
        log::trace!("[headless] create image '{name}' {} {:?}", desc.extent, desc.format);
        Ok(self.images.insert(HeadlessImage {
            name: name.to_string(),
            desc: *desc,
            state: initial_state,
        }))
    }

    fn create_buffer(
        &mut self,
        desc: &GfxBufferDesc,
        initial_state: GfxResourceState,
        name: &str,
    ) -> GfxResult<GfxBufferHandle> {
        if desc.size == 0 {
            return Err(GfxError::ResourceCreationFailed(format!("buffer '{name}' has zero size")));
        }
        self.reserve_memory(desc.size, name)?;
        self.created_buffer_count += 1;
        log::trace!("[headless] create buffer '{name}' {} bytes", desc.size);
        let data = if desc.usage.contains(GfxBufferUsage::HOST_VISIBLE) {
            vec![0; desc.size as usize]
        } else {
            Vec::new()
        };
        Ok(self.buffers.insert(HeadlessBuffer {
            name: name.to_string(),
            desc: *desc,
            state: initial_state,
            data,
        }))
    }

    fn destroy_image(&mut self, handle: GfxImageHandle) {
        if let Some(image) = self.images.remove(handle) {
            self.memory_used = self.memory_used.saturating_sub(image.desc.memory_size());
        }
    }

    fn destroy_buffer(&mut self, handle: GfxBufferHandle) {
        if let Some(buffer) = self.buffers.remove(handle) {
            self.memory_used = self.memory_used.saturating_sub(buffer.desc.size);
        }
    }

    fn write_buffer(&mut self, handle: GfxBufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let buffer = self.buffers.get_mut(handle).ok_or(GfxError::InvalidHandle)?;
        if !buffer.desc.usage.contains(GfxBufferUsage::HOST_VISIBLE) {
            return Err(GfxError::ResourceCreationFailed(format!("buffer '{}' is not host visible", buffer.name)));
        }
        let begin = offset as usize;
        let end = begin + data.len();
        if end > buffer.data.len() {
            return Err(GfxError::ResourceCreationFailed(format!(
                "write of {} bytes at {offset} overflows buffer '{}'",
                data.len(),
                buffer.name
            )));
        }
        buffer.data[begin..end].copy_from_slice(data);
        Ok(())
    }

    fn create_timeline_semaphore(&mut self, initial_value: u64, name: &str) -> GfxResult<GfxSemaphoreHandle> {
        Ok(self.semaphores.insert(HeadlessSemaphore {
            name: name.to_string(),
            value: initial_value,
        }))
    }

    fn destroy_semaphore(&mut self, handle: GfxSemaphoreHandle) {
        self.semaphores.remove(handle);
    }

    fn semaphore_value(&self, handle: GfxSemaphoreHandle) -> GfxResult<u64> {
        self.semaphores.get(handle).map(|s| s.value).ok_or(GfxError::InvalidHandle)
    }

    fn wait_semaphore(&mut self, handle: GfxSemaphoreHandle, value: u64, _timeout: Duration) -> GfxResult<()> {
        // 命令在 submit 时已经执行完成，没有达到的值永远不会达到
        let semaphore = self.semaphores.get(handle).ok_or(GfxError::InvalidHandle)?;
        if semaphore.value >= value { Ok(()) } else { Err(GfxError::Timeout) }
    }

    fn allocate_command_list(&mut self, queue: QueueClass, name: &str) -> Box<dyn GfxCommandList> {
        Box::new(HeadlessCommandList::new(queue, name))
    }

    fn submit(
        &mut self,
        queue: QueueClass,
        command_lists: Vec<Box<dyn GfxCommandList>>,
        waits: &[GfxSemaphoreWait],
        signals: &[GfxSemaphoreSignal],
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("HeadlessBackend::submit");

        match self.pending_submit_error.take() {
            Some((0, err)) => return Err(err),
            Some((remaining, err)) => self.pending_submit_error = Some((remaining - 1, err)),
            None => {}
        }
        if !queue.is_dispatchable() {
            return Err(GfxError::SubmitFailed(format!("cannot submit to queue {queue}")));
        }

        for wait in waits {
            let semaphore = self.semaphores.get(wait.semaphore).ok_or(GfxError::InvalidHandle)?;
            if semaphore.value < wait.value {
                return Err(GfxError::SubmitFailed(format!(
                    "wait on '{}' for value {} which is never signaled (current {})",
                    semaphore.name, wait.value, semaphore.value
                )));
            }
        }

        let mut lists = Vec::with_capacity(command_lists.len());
        for list in command_lists {
            let list = list
                .into_any()
                .downcast::<HeadlessCommandList>()
                .map_err(|_| GfxError::SubmitFailed("command list was not allocated by this backend".to_string()))?;
            if list.queue != queue {
                return Err(GfxError::SubmitFailed(format!(
                    "command list '{}' recorded for {} submitted to {queue}",
                    list.name, list.queue
                )));
            }
            lists.push(*list);
        }

        for list in &lists {
            self.replay(list);
        }

        for signal in signals {
            let semaphore = self.semaphores.get_mut(signal.semaphore).ok_or(GfxError::InvalidHandle)?;
            semaphore.value = semaphore.value.max(signal.value);
        }

        self.submissions.push(HeadlessSubmission {
            queue,
            command_lists: lists,
            waits: waits.to_vec(),
            signals: signals.to_vec(),
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_settings::{Extent2D, GfxFormat};
    use crate::gfx_backend::GfxBarrier;
    use crate::resource_desc::GfxImageUsage;
    use crate::resource_state::GfxPipelineStage;

    fn color_desc() -> GfxImageDesc {
        GfxImageDesc::new_2d(Extent2D::new(4, 4), GfxFormat::Rgba8Unorm).with_usage(GfxImageUsage::COLOR_ATTACHMENT)
    }

    #[test]
    fn test_memory_budget() {
        let mut backend = HeadlessBackend::new().with_memory_budget(100);
        // 4 * 4 * 4 = 64 bytes
        let image = backend.create_image(&color_desc(), GfxResourceState::UNDEFINED, "a").unwrap();
        let err = backend.create_image(&color_desc(), GfxResourceState::UNDEFINED, "b").unwrap_err();
        assert_eq!(
            err,
            GfxError::OutOfDeviceMemory {
                requested: 64,
                available: 36
            }
        );

        backend.destroy_image(image);
        assert_eq!(backend.memory_used(), 0);
        assert_eq!(backend.live_image_count(), 0);
    }

    #[test]
    fn test_barrier_validation() {
        let mut backend = HeadlessBackend::new();
        let image = backend.create_image(&color_desc(), GfxResourceState::UNDEFINED, "color").unwrap();

        let mut cmd = backend.allocate_command_list(QueueClass::Graphics, "frame");
        cmd.pipeline_barrier(&[GfxBarrier::new(
            image,
            GfxResourceState::UNDEFINED,
            GfxResourceState::COLOR_ATTACHMENT_WRITE,
        )]);
        cmd.set_render_targets(&[image], None);
        // 错误的 before 状态
        cmd.pipeline_barrier(&[GfxBarrier::new(
            image,
            GfxResourceState::TRANSFER_DST,
            GfxResourceState::SHADER_READ_FRAGMENT,
        )]);
        backend.submit(QueueClass::Graphics, vec![cmd], &[], &[]).unwrap();

        assert_eq!(backend.validation_errors().len(), 1);
        assert_eq!(
            backend.resource_state(image.into()).map(|s| s.layout),
            Some(GfxImageLayout::ShaderReadOnly)
        );
    }

    #[test]
    fn test_render_target_in_wrong_layout_is_reported() {
        let mut backend = HeadlessBackend::new();
        let image = backend.create_image(&color_desc(), GfxResourceState::UNDEFINED, "color").unwrap();

        let mut cmd = backend.allocate_command_list(QueueClass::Graphics, "frame");
        cmd.set_render_targets(&[image], None);
        backend.submit(QueueClass::Graphics, vec![cmd], &[], &[]).unwrap();

        assert_eq!(backend.validation_errors().len(), 1);
    }

    #[test]
    fn test_semaphore_wait_and_signal() {
        let mut backend = HeadlessBackend::new();
        let semaphore = backend.create_timeline_semaphore(0, "compute").unwrap();
        let wait = GfxSemaphoreWait {
            semaphore,
            value: 1,
            stage: GfxPipelineStage::ALL_COMMANDS,
        };

        let cmd = backend.allocate_command_list(QueueClass::Graphics, "gfx");
        assert!(matches!(
            backend.submit(QueueClass::Graphics, vec![cmd], &[wait], &[]),
            Err(GfxError::SubmitFailed(_))
        ));

        let cmd = backend.allocate_command_list(QueueClass::Compute, "compute");
        let signal = GfxSemaphoreSignal {
            semaphore,
            value: 1,
            stage: GfxPipelineStage::ALL_COMMANDS,
        };
        backend.submit(QueueClass::Compute, vec![cmd], &[], &[signal]).unwrap();
        assert_eq!(backend.semaphore_value(semaphore), Ok(1));

        let cmd = backend.allocate_command_list(QueueClass::Graphics, "gfx");
        backend.submit(QueueClass::Graphics, vec![cmd], &[wait], &[]).unwrap();
        assert!(backend.wait_semaphore(semaphore, 1, Duration::from_secs(1)).is_ok());
        assert_eq!(backend.wait_semaphore(semaphore, 2, Duration::from_secs(1)), Err(GfxError::Timeout));
    }

    #[test]
    fn test_fail_next_submit() {
        let mut backend = HeadlessBackend::new();
        backend.fail_next_submit(GfxError::DeviceLost);
        let cmd = backend.allocate_command_list(QueueClass::Graphics, "gfx");
        assert_eq!(backend.submit(QueueClass::Graphics, vec![cmd], &[], &[]), Err(GfxError::DeviceLost));

        let cmd = backend.allocate_command_list(QueueClass::Graphics, "gfx");
        assert!(backend.submit(QueueClass::Graphics, vec![cmd], &[], &[]).is_ok());

        backend.fail_submit_after(1, GfxError::DeviceLost);
        let cmd = backend.allocate_command_list(QueueClass::Graphics, "gfx");
        assert!(backend.submit(QueueClass::Graphics, vec![cmd], &[], &[]).is_ok());
        let cmd = backend.allocate_command_list(QueueClass::Graphics, "gfx");
        assert_eq!(backend.submit(QueueClass::Graphics, vec![cmd], &[], &[]), Err(GfxError::DeviceLost));
    }

    #[test]
    fn test_write_buffer() {
        let mut backend = HeadlessBackend::new();
        let desc = GfxBufferDesc::new(8, GfxBufferUsage::UNIFORM | GfxBufferUsage::HOST_VISIBLE);
        let buffer = backend.create_buffer(&desc, GfxResourceState::UNIFORM_READ, "camera").unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.buffer(buffer).unwrap().data, vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(backend.write_buffer(buffer, 6, &[1, 2, 3, 4]).is_err());
    }
}
