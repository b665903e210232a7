//! Phase 管线
//!
//! 引擎每帧的粗粒度阶段（输入、物理、渲染……）由命名的 Phase 组成：
//!
//! - [`PipelineBuilder`]: 注册 Phase、声明依赖，在加边时拒绝循环依赖
//! - [`Pipeline`]: 由 builder 编译而来，拓扑序只计算一次；每个 tick 按依赖层级执行 Phase 上挂载的回调
//!
//! ```ignore
//! let mut builder = PipelineBuilder::new();
//! builder.new_phase("Update").then("PostUpdate").then("Render");
//!
//! let pipeline = Pipeline::new(builder, PipelineConfig::default());
//! pipeline.attach("Render", || render_cameras());
//! pipeline.tick();
//! ```

pub mod phase_builder;
pub mod pipeline;

pub use phase_builder::{IntoPhaseId, PhaseId, PhaseRef, PipelineBuilder};
pub use pipeline::{CallbackId, PhaseFlags, Pipeline, PipelineConfig};
