use kiln_render_interface::frame_settings::Extent2D;
use kiln_render_interface::gfx_backend::{GfxCommandList, QueueClass};
use kiln_render_interface::resource_desc::GfxBufferUsage;

use crate::pass::{PassContext, RenderPass};
use crate::passes::{DEPTH_BUFFER, LIGHT_GRID};
use crate::resolver::{ReadUsage, ResourceReadAccess, ResourceResolver, WriteUsage};
use crate::resource_id::{ResourceId, ResourceViewId};
use crate::scene_context::SceneContext;

/// 分 tile 剔除点光源，结果写入 light grid
///
/// 每个 tile 占 `1 + MAX_LIGHTS_PER_TILE` 个 u32：光源数量与光源下标。
/// light grid 是 window size 资源，输出尺寸变化时重新创建。
#[derive(Default)]
pub struct LightCullPass {
    depth: Option<ResourceViewId>,
    light_grid: Option<ResourceViewId>,
}

impl LightCullPass {
    pub const NAME: &'static str = "LightCullPass";

    pub fn tile_count(width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(SceneContext::LIGHT_TILE_SIZE), height.div_ceil(SceneContext::LIGHT_TILE_SIZE))
    }

    pub fn light_grid_size(tiles: (u32, u32)) -> u64 {
        let stride = (1 + SceneContext::MAX_LIGHTS_PER_TILE as u64) * size_of::<u32>() as u64;
        tiles.0.max(1) as u64 * tiles.1.max(1) as u64 * stride
    }

    fn light_grid_size_for(output_size: Extent2D) -> u64 {
        Self::light_grid_size(Self::tile_count(output_size.width, output_size.height))
    }
}

impl RenderPass for LightCullPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn queue_class(&self) -> QueueClass {
        QueueClass::Compute
    }

    fn resolve(&mut self, resolver: &mut ResourceResolver) {
        let light_grid = ResourceId::new(LIGHT_GRID);
        resolver.create_window_buffer(light_grid.clone(), GfxBufferUsage::STORAGE, Self::light_grid_size_for);

        self.depth = Some(resolver.read_resource(
            ResourceId::new(DEPTH_BUFFER).create_view("light-cull"),
            ResourceReadAccess::NonPixelShader,
            ReadUsage::ShaderResource,
        ));
        self.light_grid = Some(resolver.write_resource(light_grid.create_view("cull-output"), WriteUsage::UnorderedAccess));
    }

    fn dispatch(&self, ctx: &PassContext<'_>, cmd: &mut dyn GfxCommandList) {
        let (Some(depth), Some(light_grid)) = (&self.depth, &self.light_grid) else {
            return;
        };

        cmd.bind_pipeline("light-cull");
        if let Some(frame_data) = ctx.frame_data_handle() {
            cmd.bind_buffer(0, frame_data);
        }
        cmd.bind_image(1, ctx.image(depth));
        cmd.bind_buffer(2, ctx.buffer(light_grid));

        let output_size = ctx.output_size();
        let (tiles_x, tiles_y) = Self::tile_count(output_size.width, output_size.height);
        cmd.dispatch(tiles_x, tiles_y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_count_rounds_up() {
        assert_eq!(LightCullPass::tile_count(1280, 720), (80, 45));
        assert_eq!(LightCullPass::tile_count(17, 1), (2, 1));
    }

    #[test]
    fn test_light_grid_size() {
        assert_eq!(LightCullPass::light_grid_size((2, 3)), 6 * 65 * 4);
        assert_eq!(LightCullPass::light_grid_size((0, 0)), 65 * 4);
        assert_eq!(LightCullPass::light_grid_size_for(Extent2D::new(64, 64)), 16 * 65 * 4);
    }
}
