//! 窗口尺寸变化的信号
//!
//! 窗口线程通过 [`ResizeSender`] 发送新的尺寸，渲染线程在 Input Phase 中
//! 通过 [`ResizeReceiver::latest`] 取出最后一次的尺寸，中间的尺寸直接丢弃。

use crossbeam_channel::{Receiver, Sender};

use kiln_render_interface::frame_settings::Extent2D;

pub fn resize_channel() -> (ResizeSender, ResizeReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded::<Extent2D>();
    (ResizeSender { sender: tx }, ResizeReceiver { receiver: rx })
}

#[derive(Clone)]
pub struct ResizeSender {
    sender: Sender<Extent2D>,
}

impl ResizeSender {
    /// 接收端已经销毁时返回 false
    pub fn notify(&self, extent: Extent2D) -> bool {
        if let Err(e) = self.sender.send(extent) {
            log::warn!("Failed to send resize signal: {}", e);
            return false;
        }
        true
    }
}

pub struct ResizeReceiver {
    receiver: Receiver<Extent2D>,
}

impl ResizeReceiver {
    /// 取出所有待处理的尺寸，只返回最后一个
    pub fn latest(&self) -> Option<Extent2D> {
        self.receiver.try_iter().last()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}
