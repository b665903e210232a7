use std::any::Any;

use crate::frame_settings::Extent2D;
use crate::gfx_backend::{GfxBarrier, GfxCommandList, QueueClass};
use crate::handles::{GfxBufferHandle, GfxImageHandle};

/// 录制下来的一条命令
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BeginLabel(String),
    EndLabel,
    Barrier(Vec<GfxBarrier>),
    ClearColor { image: GfxImageHandle, color: [f32; 4] },
    ClearDepth { image: GfxImageHandle, depth: f32 },
    SetRenderTargets { colors: Vec<GfxImageHandle>, depth: Option<GfxImageHandle> },
    SetViewport(Extent2D),
    BindPipeline(String),
    BindBuffer { slot: u32, buffer: GfxBufferHandle },
    BindImage { slot: u32, image: GfxImageHandle },
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch { group_x: u32, group_y: u32, group_z: u32 },
    CopyImage { src: GfxImageHandle, dst: GfxImageHandle },
    CopyBuffer { src: GfxBufferHandle, dst: GfxBufferHandle, size: u64 },
}

/// 只在内存中记录命令的命令列表
#[derive(Debug)]
pub struct HeadlessCommandList {
    pub(crate) queue: QueueClass,
    pub(crate) name: String,
    pub(crate) commands: Vec<RecordedCommand>,
    label_depth: usize,
}

impl HeadlessCommandList {
    pub(crate) fn new(queue: QueueClass, name: &str) -> Self {
        Self {
            queue,
            name: name.to_string(),
            commands: Vec::new(),
            label_depth: 0,
        }
    }

    #[inline]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// 未闭合的 debug label 数量
    #[inline]
    pub fn open_labels(&self) -> usize {
        self.label_depth
    }
}

impl GfxCommandList for HeadlessCommandList {
    #[inline]
    fn queue_class(&self) -> QueueClass {
        self.queue
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_label(&mut self, label: &str) {
        self.label_depth += 1;
        self.commands.push(RecordedCommand::BeginLabel(label.to_string()));
    }

    fn end_label(&mut self) {
        self.label_depth = self.label_depth.saturating_sub(1);
        self.commands.push(RecordedCommand::EndLabel);
    }

    fn pipeline_barrier(&mut self, barriers: &[GfxBarrier]) {
        if !barriers.is_empty() {
            self.commands.push(RecordedCommand::Barrier(barriers.to_vec()));
        }
    }

    fn clear_color(&mut self, image: GfxImageHandle, color: [f32; 4]) {
        self.commands.push(RecordedCommand::ClearColor { image, color });
    }

    fn clear_depth(&mut self, image: GfxImageHandle, depth: f32) {
        self.commands.push(RecordedCommand::ClearDepth { image, depth });
    }

    fn set_render_targets(&mut self, colors: &[GfxImageHandle], depth: Option<GfxImageHandle>) {
        self.commands.push(RecordedCommand::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    fn set_viewport(&mut self, extent: Extent2D) {
        self.commands.push(RecordedCommand::SetViewport(extent));
    }

    fn bind_pipeline(&mut self, name: &str) {
        self.commands.push(RecordedCommand::BindPipeline(name.to_string()));
    }

    fn bind_buffer(&mut self, slot: u32, buffer: GfxBufferHandle) {
        self.commands.push(RecordedCommand::BindBuffer { slot, buffer });
    }

    fn bind_image(&mut self, slot: u32, image: GfxImageHandle) {
        self.commands.push(RecordedCommand::BindImage { slot, image });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn dispatch(&mut self, group_x: u32, group_y: u32, group_z: u32) {
        self.commands.push(RecordedCommand::Dispatch {
            group_x,
            group_y,
            group_z,
        });
    }

    fn copy_image(&mut self, src: GfxImageHandle, dst: GfxImageHandle) {
        self.commands.push(RecordedCommand::CopyImage { src, dst });
    }

    fn copy_buffer(&mut self, src: GfxBufferHandle, dst: GfxBufferHandle, size: u64) {
        self.commands.push(RecordedCommand::CopyBuffer { src, dst, size });
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
