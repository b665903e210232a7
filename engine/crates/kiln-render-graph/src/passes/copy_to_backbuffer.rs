use kiln_render_interface::gfx_backend::GfxCommandList;
use kiln_render_interface::handles::GfxImageHandle;
use kiln_render_interface::resource_desc::GfxImageDesc;
use kiln_render_interface::resource_state::GfxResourceState;

use crate::pass::{PassContext, RenderPass};
use crate::passes::BACKBUFFER;
use crate::resolver::ResourceResolver;
use crate::resource_id::{ResourceId, ResourceViewId};

/// 把输出图像拷贝到外部的 backbuffer，并在帧结束时转换到 Present
///
/// backbuffer 每帧可能不同，通过 [`GraphStorage::rebind_import`](crate::storage::GraphStorage::rebind_import) 替换。
pub struct CopyToBackbufferPass {
    backbuffer: GfxImageHandle,
    backbuffer_desc: GfxImageDesc,
    backbuffer_state: GfxResourceState,

    src: Option<ResourceViewId>,
    dst: Option<ResourceViewId>,
}

impl CopyToBackbufferPass {
    pub const NAME: &'static str = "CopyToBackbufferPass";

    pub fn new(backbuffer: GfxImageHandle, backbuffer_desc: GfxImageDesc, backbuffer_state: GfxResourceState) -> Self {
        Self {
            backbuffer,
            backbuffer_desc,
            backbuffer_state,
            src: None,
            dst: None,
        }
    }

    #[inline]
    pub fn backbuffer_id() -> ResourceId {
        ResourceId::new(BACKBUFFER)
    }
}

impl RenderPass for CopyToBackbufferPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn resolve(&mut self, resolver: &mut ResourceResolver) {
        let backbuffer = Self::backbuffer_id();
        resolver.import_texture(backbuffer.clone(), self.backbuffer, self.backbuffer_desc, self.backbuffer_state);

        let output = resolver.output_image();
        self.src = Some(resolver.read_src_resource(output.create_view("copy-src")));
        self.dst = Some(resolver.write_dst_resource(backbuffer.create_view("copy-dst")));
        resolver.export_resource(backbuffer, GfxResourceState::PRESENT);
    }

    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
        let (Some(src), Some(dst)) = (&self.src, &self.dst) else {
            return;
        };
        cmd.copy_image(ctx.image(src), ctx.image(dst));
    }
}
