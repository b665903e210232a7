//! 资源状态定义
//!
//! 资源在某个 Pass 中的使用方式由 pipeline stage、access mask 和 image layout 三者描述，
//! barrier 的计算只依赖这三者。这里提供常用状态的预定义组合。

use bitflags::bitflags;

bitflags! {
    /// Pipeline stage
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GfxPipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const EARLY_FRAGMENT_TESTS = 1 << 4;
        const FRAGMENT_SHADER = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const ALL_COMMANDS = 1 << 11;
    }
}

bitflags! {
    /// Access mask
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GfxAccess: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_SAMPLED_READ = 1 << 4;
        const SHADER_STORAGE_READ = 1 << 5;
        const SHADER_STORAGE_WRITE = 1 << 6;
        const COLOR_ATTACHMENT_READ = 1 << 7;
        const COLOR_ATTACHMENT_WRITE = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 9;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 10;
        const TRANSFER_READ = 1 << 11;
        const TRANSFER_WRITE = 1 << 12;
        const MEMORY_READ = 1 << 13;
        const MEMORY_WRITE = 1 << 14;
    }
}

/// Image layout，buffer 始终为 `Undefined`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GfxImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

/// 资源状态
///
/// 描述资源在某个 Pass 中的使用方式，用于自动计算 barrier。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxResourceState {
    pub stage: GfxPipelineStage,
    pub access: GfxAccess,
    pub layout: GfxImageLayout,
}

impl Default for GfxResourceState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl GfxResourceState {
    #[inline]
    pub const fn new(stage: GfxPipelineStage, access: GfxAccess, layout: GfxImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// buffer 状态，没有 layout
    #[inline]
    pub const fn buffer(stage: GfxPipelineStage, access: GfxAccess) -> Self {
        Self::new(stage, access, GfxImageLayout::Undefined)
    }

    // ============ 通用 ============

    /// 未定义状态（初始状态或不关心内容）
    pub const UNDEFINED: Self = Self::new(GfxPipelineStage::TOP_OF_PIPE, GfxAccess::empty(), GfxImageLayout::Undefined);

    pub const GENERAL: Self = Self::new(
        GfxPipelineStage::ALL_COMMANDS,
        GfxAccess::MEMORY_READ.union(GfxAccess::MEMORY_WRITE),
        GfxImageLayout::General,
    );

    // ============ Image ============

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        GfxPipelineStage::COLOR_ATTACHMENT_OUTPUT,
        GfxAccess::COLOR_ATTACHMENT_WRITE,
        GfxImageLayout::ColorAttachment,
    );

    pub const DEPTH_ATTACHMENT_WRITE: Self = Self::new(
        GfxPipelineStage::EARLY_FRAGMENT_TESTS.union(GfxPipelineStage::LATE_FRAGMENT_TESTS),
        GfxAccess::DEPTH_STENCIL_ATTACHMENT_READ.union(GfxAccess::DEPTH_STENCIL_ATTACHMENT_WRITE),
        GfxImageLayout::DepthStencilAttachment,
    );

    /// 只读深度（depth test 但不写入）
    pub const DEPTH_ATTACHMENT_READ: Self = Self::new(
        GfxPipelineStage::EARLY_FRAGMENT_TESTS.union(GfxPipelineStage::LATE_FRAGMENT_TESTS),
        GfxAccess::DEPTH_STENCIL_ATTACHMENT_READ,
        GfxImageLayout::DepthStencilReadOnly,
    );

    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        GfxPipelineStage::FRAGMENT_SHADER,
        GfxAccess::SHADER_SAMPLED_READ,
        GfxImageLayout::ShaderReadOnly,
    );

    pub const SHADER_READ_NON_FRAGMENT: Self = Self::new(
        GfxPipelineStage::VERTEX_SHADER.union(GfxPipelineStage::COMPUTE_SHADER),
        GfxAccess::SHADER_SAMPLED_READ,
        GfxImageLayout::ShaderReadOnly,
    );

    pub const STORAGE_WRITE_COMPUTE: Self =
        Self::new(GfxPipelineStage::COMPUTE_SHADER, GfxAccess::SHADER_STORAGE_WRITE, GfxImageLayout::General);

    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        GfxPipelineStage::COMPUTE_SHADER,
        GfxAccess::SHADER_STORAGE_READ.union(GfxAccess::SHADER_STORAGE_WRITE),
        GfxImageLayout::General,
    );

    pub const TRANSFER_SRC: Self =
        Self::new(GfxPipelineStage::TRANSFER, GfxAccess::TRANSFER_READ, GfxImageLayout::TransferSrc);

    pub const TRANSFER_DST: Self =
        Self::new(GfxPipelineStage::TRANSFER, GfxAccess::TRANSFER_WRITE, GfxImageLayout::TransferDst);

    /// 呈现（swapchain image）
    pub const PRESENT: Self = Self::new(GfxPipelineStage::BOTTOM_OF_PIPE, GfxAccess::empty(), GfxImageLayout::Present);

    // ============ Buffer ============

    pub const UNIFORM_READ: Self = Self::buffer(
        GfxPipelineStage::VERTEX_SHADER.union(GfxPipelineStage::FRAGMENT_SHADER).union(GfxPipelineStage::COMPUTE_SHADER),
        GfxAccess::UNIFORM_READ,
    );

    pub const STORAGE_BUFFER_READ: Self = Self::buffer(
        GfxPipelineStage::VERTEX_SHADER.union(GfxPipelineStage::FRAGMENT_SHADER).union(GfxPipelineStage::COMPUTE_SHADER),
        GfxAccess::SHADER_STORAGE_READ,
    );

    pub const STORAGE_BUFFER_WRITE: Self = Self::buffer(
        GfxPipelineStage::COMPUTE_SHADER.union(GfxPipelineStage::FRAGMENT_SHADER),
        GfxAccess::SHADER_STORAGE_WRITE,
    );

    pub const BUFFER_TRANSFER_SRC: Self = Self::buffer(GfxPipelineStage::TRANSFER, GfxAccess::TRANSFER_READ);

    pub const BUFFER_TRANSFER_DST: Self = Self::buffer(GfxPipelineStage::TRANSFER, GfxAccess::TRANSFER_WRITE);
}

// 辅助方法
impl GfxResourceState {
    /// 写操作的 access flags
    const WRITE_ACCESS: GfxAccess = GfxAccess::SHADER_STORAGE_WRITE
        .union(GfxAccess::COLOR_ATTACHMENT_WRITE)
        .union(GfxAccess::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(GfxAccess::TRANSFER_WRITE)
        .union(GfxAccess::MEMORY_WRITE);

    /// 检查是否为写操作
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        !self.is_write()
    }

    /// 获取用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> GfxAccess {
        self.access & Self::WRITE_ACCESS
    }

    /// 从 `self` 转换到 `next` 是否需要 barrier
    ///
    /// - layout 不同一定需要
    /// - 任意一方有写操作需要（保证可见性）
    /// - 同 layout 的只读到只读可以跳过
    #[inline]
    pub fn needs_barrier_to(&self, next: &Self) -> bool {
        self.layout != next.layout || self.is_write() || next.is_write()
    }

    /// 合并同一个 Pass 对同一资源的多次访问
    ///
    /// layout 冲突时返回 `None`。`Undefined` 的 layout 与任何 layout 兼容。
    pub fn merge(&self, other: &Self) -> Option<Self> {
        let layout = match (self.layout, other.layout) {
            (a, b) if a == b => a,
            (GfxImageLayout::Undefined, b) => b,
            (a, GfxImageLayout::Undefined) => a,
            _ => return None,
        };
        Some(Self::new(self.stage | other.stage, self.access | other.access, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_change_needs_barrier() {
        assert!(GfxResourceState::UNDEFINED.needs_barrier_to(&GfxResourceState::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_read_to_read_same_layout_skips_barrier() {
        assert!(
            !GfxResourceState::SHADER_READ_FRAGMENT.needs_barrier_to(&GfxResourceState::SHADER_READ_NON_FRAGMENT)
        );
    }

    #[test]
    fn test_write_to_write_same_layout_needs_barrier() {
        assert!(
            GfxResourceState::COLOR_ATTACHMENT_WRITE.needs_barrier_to(&GfxResourceState::COLOR_ATTACHMENT_WRITE)
        );
        assert!(GfxResourceState::STORAGE_BUFFER_WRITE.needs_barrier_to(&GfxResourceState::STORAGE_BUFFER_READ));
    }

    #[test]
    fn test_merge() {
        let merged =
            GfxResourceState::SHADER_READ_FRAGMENT.merge(&GfxResourceState::SHADER_READ_NON_FRAGMENT).unwrap();
        assert_eq!(merged.layout, GfxImageLayout::ShaderReadOnly);
        assert!(merged.stage.contains(GfxPipelineStage::FRAGMENT_SHADER | GfxPipelineStage::COMPUTE_SHADER));

        assert!(GfxResourceState::TRANSFER_SRC.merge(&GfxResourceState::COLOR_ATTACHMENT_WRITE).is_none());
        assert!(GfxResourceState::UNIFORM_READ.merge(&GfxResourceState::STORAGE_BUFFER_READ).is_some());
    }
}
