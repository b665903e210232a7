use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::GfxCommandList;
use kiln_render_interface::resource_desc::{GfxImageDesc, GfxImageUsage};

use crate::pass::{PassContext, RenderPass};
use crate::passes::LIGHTING_COLOR;
use crate::resolver::{ReadUsage, ResourceReadAccess, ResourceResolver, WriteUsage};
use crate::resource_handle::ResourceFlags;
use crate::resource_id::{ResourceId, ResourceViewId};

/// tone mapping，把 HDR 的 lighting color 写入 swapchain 格式的输出图像
#[derive(Default)]
pub struct PostProcessPass {
    lighting: Option<ResourceViewId>,
}

impl PostProcessPass {
    pub const NAME: &'static str = "PostProcessPass";
}

impl RenderPass for PostProcessPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn resolve(&mut self, resolver: &mut ResourceResolver) {
        let output = resolver.output_image();
        let desc = GfxImageDesc::new_2d(Extent2D::default(), resolver.swapchain_format())
            .with_usage(GfxImageUsage::COLOR_ATTACHMENT | GfxImageUsage::TRANSFER_SRC);
        resolver.create_window_texture(output.clone(), desc, ResourceFlags::empty());

        self.lighting = Some(resolver.read_resource(
            ResourceId::new(LIGHTING_COLOR).create_view("tonemap-input"),
            ResourceReadAccess::PixelShader,
            ReadUsage::ShaderResource,
        ));
        resolver.write_resource(output.create_view("tonemap-output"), WriteUsage::RenderTarget);
    }

    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
        let Some(lighting) = &self.lighting else {
            return;
        };
        cmd.set_render_targets(&ctx.render_targets(), None);
        cmd.set_viewport(ctx.output_size());
        cmd.bind_pipeline("tonemap");
        cmd.bind_image(0, ctx.image(lighting));
        cmd.draw(3, 1);
    }
}
