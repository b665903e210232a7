use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// 每帧上传到 GPU 的相机数据
///
/// 布局与 shader 中的 uniform buffer 一致，16 字节对齐。
#[repr(C)]
#[derive(Pod, Zeroable, Copy, Clone, Debug, PartialEq)]
pub struct CameraFrameData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inv_view_projection: Mat4,
    /// xyz: 相机位置
    pub camera_position: Vec4,
    /// x: 宽, y: 高, z: 1/宽, w: 1/高
    pub resolution: Vec4,
    /// 累计时间（秒）
    pub time: f32,
    pub delta_time: f32,
    pub frame_id: u32,
    pub _padding: u32,
}

impl Default for CameraFrameData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            inv_view_projection: Mat4::IDENTITY,
            camera_position: Vec4::ZERO,
            resolution: Vec4::ZERO,
            time: 0.0,
            delta_time: 0.0,
            frame_id: 0,
            _padding: 0,
        }
    }
}

impl CameraFrameData {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// 更新相机矩阵，同时刷新派生出来的 view-projection
    pub fn set_camera(&mut self, view: Mat4, projection: Mat4, position: Vec3) {
        self.view = view;
        self.projection = projection;
        self.view_projection = projection * view;
        self.inv_view_projection = self.view_projection.inverse();
        self.camera_position = position.extend(1.0);
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        self.resolution = Vec4::new(w, h, 1.0 / w, 1.0 / h);
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_16_byte_aligned() {
        assert_eq!(CameraFrameData::SIZE % 16, 0);
        assert_eq!(CameraFrameData::default().as_bytes().len() as u64, CameraFrameData::SIZE);
    }

    #[test]
    fn test_set_camera() {
        let mut data = CameraFrameData::default();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0);
        data.set_camera(view, proj, Vec3::new(0.0, 2.0, 5.0));

        assert_eq!(data.view_projection, proj * view);
        let identity = data.view_projection * data.inv_view_projection;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert_eq!(data.camera_position.w, 1.0);
    }
}
