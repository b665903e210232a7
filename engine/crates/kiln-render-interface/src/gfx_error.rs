use std::fmt::Display;

/// 后端返回的错误
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GfxError {
    /// 显存不足
    OutOfDeviceMemory { requested: u64, available: u64 },
    ResourceCreationFailed(String),
    DeviceLost,
    SubmitFailed(String),
    /// 等待 semaphore 超时
    Timeout,
    /// handle 已经被销毁或者不属于当前后端
    InvalidHandle,
}

impl Display for GfxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfDeviceMemory { requested, available } => {
                write!(f, "out of device memory: requested {requested} bytes, {available} bytes available")
            }
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::DeviceLost => write!(f, "device lost"),
            Self::SubmitFailed(msg) => write!(f, "submit failed: {msg}"),
            Self::Timeout => write!(f, "timeout while waiting for semaphore"),
            Self::InvalidHandle => write!(f, "invalid handle"),
        }
    }
}

impl std::error::Error for GfxError {}

pub type GfxResult<T> = Result<T, GfxError>;
