use kiln_render_interface::frame_settings::{Extent2D, GfxFormat};
use kiln_render_interface::gfx_backend::GfxCommandList;
use kiln_render_interface::resource_desc::{GfxImageDesc, GfxImageUsage};

use crate::pass::{PassContext, RenderPass};
use crate::passes::{DEPTH_BUFFER, LIGHT_GRID, LIGHTING_COLOR};
use crate::resolver::{ReadUsage, ResourceReadAccess, ResourceResolver, WriteUsage};
use crate::resource_handle::ResourceFlags;
use crate::resource_id::{ResourceId, ResourceViewId};

/// 前向着色，深度只读（depth test equal），结果写入 HDR 的 lighting color
#[derive(Default)]
pub struct LightingPass {
    light_grid: Option<ResourceViewId>,
}

impl LightingPass {
    pub const NAME: &'static str = "LightingPass";
    pub const COLOR_FORMAT: GfxFormat = GfxFormat::Rgba16Float;
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn resolve(&mut self, resolver: &mut ResourceResolver) {
        let color = ResourceId::new(LIGHTING_COLOR);
        let desc = GfxImageDesc::new_2d(Extent2D::default(), Self::COLOR_FORMAT)
            .with_usage(GfxImageUsage::COLOR_ATTACHMENT | GfxImageUsage::SAMPLED);
        resolver.create_window_texture(color.clone(), desc, ResourceFlags::empty());

        resolver.read_resource(
            ResourceId::new(DEPTH_BUFFER).create_view("lighting-depth-test"),
            ResourceReadAccess::PixelShader,
            ReadUsage::DepthStencil,
        );
        self.light_grid = Some(resolver.read_resource(
            ResourceId::new(LIGHT_GRID).create_view("lighting"),
            ResourceReadAccess::PixelShader,
            ReadUsage::ShaderResource,
        ));
        resolver.write_resource(color.create_view("lighting-output"), WriteUsage::RenderTarget);
    }

    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
        let render_targets = ctx.render_targets();
        for &color in &render_targets {
            cmd.clear_color(color, [0.0, 0.0, 0.0, 1.0]);
        }
        cmd.set_render_targets(&render_targets, ctx.depth_stencil());
        cmd.set_viewport(ctx.output_size());
        cmd.bind_pipeline("forward-lighting");
        if let Some(frame_data) = ctx.frame_data_handle() {
            cmd.bind_buffer(0, frame_data);
        }
        if let Some(light_grid) = self.light_grid.as_ref().and_then(|view| ctx.try_buffer(view)) {
            cmd.bind_buffer(1, light_grid);
        }
        for draw in ctx.scene().draws() {
            cmd.draw_indexed(draw.index_count, draw.instance_count);
        }
    }
}
