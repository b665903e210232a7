//! 通用工具
//!
//! - `dependency_graph`: Phase 图与 RenderGraph 共用的依赖图（环检测、稳定拓扑排序、依赖层级）

pub mod dependency_graph;
