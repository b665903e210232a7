use std::fmt::Display;

use kiln_render_interface::gfx_error::GfxError;

/// 渲染图可以恢复的错误
///
/// 拓扑错误（读未写的资源、重复声明等）属于编程错误，在 build 时直接 panic，不会出现在这里。
#[derive(Debug)]
pub enum RenderGraphError {
    /// 后端无法创建资源，当前 graph 保持 Unbuilt，可以在下一次 resize 时重试
    ResourceAllocation { resource: String, source: GfxError },
    /// 提交失败，当前帧作废
    Submission { batch: String, source: GfxError },
    /// 还没有 build 成功
    NotBuilt,
    /// Pass 依赖的异步资源还在加载
    DependencyPending { pass: String, dependency: String },
    /// Pass 依赖的异步资源加载失败
    DependencyFailed { pass: String, dependency: String },
}

impl Display for RenderGraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceAllocation { resource, source } => {
                write!(f, "failed to allocate resource '{resource}': {source}")
            }
            Self::Submission { batch, source } => write!(f, "failed to submit '{batch}': {source}"),
            Self::NotBuilt => write!(f, "render graph is not built"),
            Self::DependencyPending { pass, dependency } => {
                write!(f, "pass '{pass}' waits for '{dependency}' which is still loading")
            }
            Self::DependencyFailed { pass, dependency } => {
                write!(f, "pass '{pass}' depends on '{dependency}' which failed to load")
            }
        }
    }
}

impl std::error::Error for RenderGraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceAllocation { source, .. } | Self::Submission { source, .. } => Some(source),
            _ => None,
        }
    }
}
