//! 声明式渲染图
//!
//! Pass 声明自己读写的资源，渲染图负责排序、分配物理资源、插入 barrier，
//! 以及按 queue 分批提交。
//!
//! # 核心概念
//!
//! - **ResourceId / ResourceViewId**: 逻辑资源名称，以及某个 Pass 对它的一次访问
//! - **RenderPass**: `resolve` 声明资源，`dispatch` 录制命令
//! - **RenderGraphBuilder**: 由 `RenderGraph::reset` 得到，添加 Pass 并 build
//! - **GraphStorage**: 资源声明、每个 FIF slot 的物理资源、相机与场景数据
//! - **RenderGraph**: `Unbuilt -> Built -> Running` 的状态机，每帧 `run`
//!
//! # 使用示例
//!
//! ```ignore
//! use kiln_render_graph::*;
//!
//! let mut graph = RenderGraph::new(RenderGraphConfig::default());
//! let mut builder = graph.reset();
//! for pass in standard_passes(backbuffer, backbuffer_desc, GfxResourceState::UNDEFINED) {
//!     builder.add_boxed_pass(pass);
//! }
//! builder.build(&mut backend)?;
//! graph.print_execution_plan();
//!
//! loop {
//!     graph.storage_mut().rebind_import(&CopyToBackbufferPass::backbuffer_id(), next_backbuffer, state);
//!     graph.run(&mut backend)?;
//! }
//!
//! graph.destroy(&mut backend);
//! ```

pub mod barrier;
pub mod builder;
mod compile;
pub mod config;
pub mod error;
pub mod graph;
pub mod pass;
pub mod passes;
pub mod resolver;
pub mod resource_handle;
pub mod resource_id;
pub mod scene_context;
pub mod storage;
pub mod sync;

pub use barrier::{BarrierDesc, PassBarriers};
pub use builder::RenderGraphBuilder;
pub use config::RenderGraphConfig;
pub use error::RenderGraphError;
pub use graph::{FrameReport, RenderGraph, RenderGraphState};
pub use pass::{PassContext, PassFlags, RenderPass};
pub use passes::standard_passes;
pub use resolver::{ReadUsage, ResourceReadAccess, ResourceResolver, WriteUsage};
pub use resource_handle::{ResourceFlags, ResourceHandle};
pub use resource_id::{ResourceId, ResourceViewId};
pub use scene_context::{DrawItem, PointLight, SceneContext};
pub use storage::GraphStorage;
pub use sync::SubmitBatch;
