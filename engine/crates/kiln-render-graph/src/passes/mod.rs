//! 内置的 Pass
//!
//! 标准的前向渲染流程：
//! `DepthPrepass -> LightCullPass(compute) -> LightingPass -> PostProcessPass -> CopyToBackbufferPass`

pub mod copy_to_backbuffer;
pub mod depth_prepass;
pub mod lambda;
pub mod light_cull;
pub mod lighting;
pub mod post_process;

use kiln_render_interface::handles::GfxImageHandle;
use kiln_render_interface::resource_desc::GfxImageDesc;
use kiln_render_interface::resource_state::GfxResourceState;

use crate::pass::RenderPass;

pub use copy_to_backbuffer::CopyToBackbufferPass;
pub use depth_prepass::DepthPrepass;
pub use lambda::LambdaPass;
pub use light_cull::LightCullPass;
pub use lighting::LightingPass;
pub use post_process::PostProcessPass;

pub const DEPTH_BUFFER: &str = "DepthBuffer";
pub const LIGHT_GRID: &str = "LightGrid";
pub const LIGHTING_COLOR: &str = "LightingColor";
pub const BACKBUFFER: &str = "Backbuffer";

/// 按执行顺序返回标准流程的所有 Pass
pub fn standard_passes(
    backbuffer: GfxImageHandle,
    backbuffer_desc: GfxImageDesc,
    backbuffer_state: GfxResourceState,
) -> Vec<Box<dyn RenderPass>> {
    vec![
        Box::new(DepthPrepass::default()),
        Box::new(LightCullPass::default()),
        Box::new(LightingPass::default()),
        Box::new(PostProcessPass::default()),
        Box::new(CopyToBackbufferPass::new(backbuffer, backbuffer_desc, backbuffer_state)),
    ]
}
