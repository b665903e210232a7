use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// 资源加载状态机
///
/// 状态流转: Unloaded -> Loading -> Uploading -> Ready
///                                  \-> Failed
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum LoadStatus {
    /// 尚未请求加载
    Unloaded = 0,
    /// IO 阶段：后台线程正在读取或解码
    Loading = 1,
    /// GPU 上传阶段：数据已提交，还不能使用
    Uploading = 2,
    /// 可以使用
    Ready = 3,
    Failed = 4,
}

impl LoadStatus {
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unloaded,
            1 => Self::Loading,
            2 => Self::Uploading,
            3 => Self::Ready,
            _ => Self::Failed,
        }
    }

    #[inline]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Unloaded | Self::Loading | Self::Uploading)
    }
}

/// 异步加载任务的句柄
///
/// 加载线程持有一份 clone 并推进状态，render graph 在 build 时轮询，不会阻塞。
#[derive(Clone, Debug)]
pub struct AsyncLoadHandle {
    name: Arc<str>,
    status: Arc<AtomicU8>,
}

impl AsyncLoadHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            status: Arc::new(AtomicU8::new(LoadStatus::Loading as u8)),
        }
    }

    /// 已经就绪的句柄
    pub fn ready(name: impl Into<Arc<str>>) -> Self {
        let handle = Self::new(name);
        handle.set_status(LoadStatus::Ready);
        handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn status(&self) -> LoadStatus {
        LoadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_status(&self, status: LoadStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.status() == LoadStatus::Ready
    }
}

impl Display for AsyncLoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:?})", self.name, self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_shared_between_clones() {
        let handle = AsyncLoadHandle::new("sky.hdr");
        let loader = handle.clone();
        assert!(handle.status().is_pending());

        std::thread::spawn(move || loader.set_status(LoadStatus::Ready)).join().unwrap();
        assert!(handle.is_ready());
        assert_eq!(handle.to_string(), "sky.hdr(Ready)");
    }
}
