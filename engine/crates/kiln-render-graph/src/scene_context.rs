use glam::Vec3;

/// 一次绘制
#[derive(Clone, Debug, PartialEq)]
pub struct DrawItem {
    pub name: String,
    pub index_count: u32,
    pub instance_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

/// 场景提供给 Pass 的数据
///
/// 由场景侧每帧填充，Pass 在 dispatch 时只读访问。
#[derive(Clone, Debug, Default)]
pub struct SceneContext {
    draws: Vec<DrawItem>,
    lights: Vec<PointLight>,
}

impl SceneContext {
    /// light grid 中每个 tile 最多记录的光源数量
    pub const MAX_LIGHTS_PER_TILE: u32 = 64;
    /// light culling 的 tile 尺寸（像素）
    pub const LIGHT_TILE_SIZE: u32 = 16;

    pub fn clear(&mut self) {
        self.draws.clear();
        self.lights.clear();
    }

    #[inline]
    pub fn add_draw(&mut self, draw: DrawItem) {
        self.draws.push(draw);
    }

    #[inline]
    pub fn add_light(&mut self, light: PointLight) {
        self.lights.push(light);
    }

    #[inline]
    pub fn draws(&self) -> &[DrawItem] {
        &self.draws
    }

    #[inline]
    pub fn lights(&self) -> &[PointLight] {
        &self.lights
    }
}
