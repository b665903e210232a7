use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::GfxCommandList;
use kiln_render_interface::resource_desc::{GfxImageDesc, GfxImageUsage};

use crate::pass::{PassContext, RenderPass};
use crate::passes::DEPTH_BUFFER;
use crate::resolver::{ResourceResolver, WriteUsage};
use crate::resource_handle::ResourceFlags;
use crate::resource_id::ResourceId;

/// 只写深度，供之后的 light culling 与 lighting 使用
#[derive(Default)]
pub struct DepthPrepass;

impl DepthPrepass {
    pub const NAME: &'static str = "DepthPrepass";
}

impl RenderPass for DepthPrepass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn resolve(&mut self, resolver: &mut ResourceResolver) {
        let depth = ResourceId::new(DEPTH_BUFFER);
        let desc = GfxImageDesc::new_2d(Extent2D::default(), resolver.frame_settings().depth_format)
            .with_usage(GfxImageUsage::DEPTH_STENCIL_ATTACHMENT | GfxImageUsage::SAMPLED);
        resolver.create_window_texture(depth.clone(), desc, ResourceFlags::empty());
        resolver.write_resource(depth.create_view("prepass"), WriteUsage::DepthStencil);
    }

    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
        let depth = ctx.depth_stencil();
        if let Some(depth) = depth {
            cmd.clear_depth(depth, 1.0);
        }
        cmd.set_render_targets(&[], depth);
        cmd.set_viewport(ctx.output_size());
        cmd.bind_pipeline("depth-prepass");
        if let Some(frame_data) = ctx.frame_data_handle() {
            cmd.bind_buffer(0, frame_data);
        }
        for draw in ctx.scene().draws() {
            cmd.draw_indexed(draw.index_count, draw.instance_count);
        }
    }
}
